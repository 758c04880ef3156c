use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use pq_client::domain::{MeterId, ProfileId, WeightId};
use serde::Deserialize;

use crate::{
    engine::{EngineError, RecalculationReport, SarfiEngine, SarfiReport},
    export,
    import::ImportReport,
    store::{EventFilter, StoreError},
};

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Engine(e) => {
                let status = match &e {
                    EngineError::ProfileNotFound(_)
                    | EngineError::WeightNotFound { .. }
                    | EngineError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                    EngineError::InvalidImport(_) | EngineError::InvalidCustomerCount(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(error = %e, "request failed");
                }
                (status, e.to_string())
            }
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(engine: Arc<SarfiEngine>, max_import_bytes: usize) -> Router {
    Router::new()
        .route("/profiles/:profile_id/weights/recalculate", post(recalculate))
        .route("/profiles/:profile_id/weights/import", post(import_weights))
        .route("/profiles/:profile_id/weights/export", get(export_weights))
        .route("/profiles/:profile_id/weights/entries/:weight_id", delete(remove_weight))
        .route("/profiles/:profile_id/weights/:meter_id", put(set_customer_count))
        .route("/profiles/:profile_id/sarfi", get(sarfi_report))
        .layer(DefaultBodyLimit::max(max_import_bytes))
        .with_state(engine)
}

async fn recalculate(
    State(engine): State<Arc<SarfiEngine>>,
    Path(profile_id): Path<ProfileId>,
) -> ApiResult<Json<RecalculationReport>> {
    Ok(Json(engine.recalculate(profile_id).await?))
}

async fn import_weights(
    State(engine): State<Arc<SarfiEngine>>,
    Path(profile_id): Path<ProfileId>,
    body: String,
) -> ApiResult<Json<ImportReport>> {
    Ok(Json(engine.import_weights(profile_id, &body).await?))
}

#[derive(Debug, Deserialize)]
struct CustomerCountBody {
    customer_count: i64,
    note: Option<String>,
}

async fn set_customer_count(
    State(engine): State<Arc<SarfiEngine>>,
    Path((profile_id, meter_id)): Path<(ProfileId, MeterId)>,
    Json(body): Json<CustomerCountBody>,
) -> ApiResult<Json<RecalculationReport>> {
    let report = engine
        .set_customer_count(profile_id, meter_id, body.customer_count, body.note.as_deref())
        .await?;
    Ok(Json(report))
}

async fn remove_weight(
    State(engine): State<Arc<SarfiEngine>>,
    Path((profile_id, weight_id)): Path<(ProfileId, WeightId)>,
) -> ApiResult<Json<RecalculationReport>> {
    Ok(Json(engine.remove_weight(profile_id, weight_id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct SarfiQuery {
    voltage_level: Option<String>,
    #[serde(default)]
    exclude_special: bool,
    year: Option<i32>,
}

async fn sarfi_report(
    State(engine): State<Arc<SarfiEngine>>,
    Path(profile_id): Path<ProfileId>,
    Query(q): Query<SarfiQuery>,
) -> ApiResult<Json<SarfiReport>> {
    let mut filter = EventFilter {
        voltage_level: q.voltage_level.filter(|v| !v.is_empty()),
        exclude_special: q.exclude_special,
        ..Default::default()
    };
    if let Some(year) = q.year {
        filter = filter
            .within_year(year)
            .map_err(|e| ApiError::BadRequest(format!("invalid year {year}: {e}")))?;
    }

    Ok(Json(engine.sarfi_report(profile_id, &filter).await?))
}

async fn export_weights(
    State(engine): State<Arc<SarfiEngine>>,
    Path(profile_id): Path<ProfileId>,
) -> ApiResult<impl IntoResponse> {
    let rows = engine.export_rows(profile_id).await?;

    let mut body = Vec::new();
    export::write_csv(&rows, &mut body).map_err(|e| ApiError::Internal(format!("csv export failed: {e}")))?;

    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body))
}
