pub mod dip_event_queries;
pub mod meter_queries;
pub mod profile_queries;
pub mod weight_queries;
