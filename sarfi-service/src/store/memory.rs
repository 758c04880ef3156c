use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use pq_client::domain::{DipEvent, Meter, MeterId, Profile, ProfileId, WeightEntry, WeightId};

use super::{EventFilter, EventSource, StoreError, WeightFactorUpdate, WeightStore, WeightWriteOutcome};

#[derive(Default)]
struct State {
    profiles: HashMap<ProfileId, Profile>,
    meters: BTreeMap<MeterId, Meter>,
    weights: BTreeMap<WeightId, WeightEntry>,
    events: Vec<DipEvent>,
    failing_weight_writes: HashSet<WeightId>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store implementing both collaborators.
///
/// Weight factor batches are applied row by row without atomicity, so a
/// failing row leaves the other rows committed.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    pub fn insert_profile(&self, name: &str, year: i32, is_active: bool) -> Result<Profile, StoreError> {
        let mut state = self.state()?;
        let profile = Profile {
            id: state.next_id(),
            name: name.to_string(),
            year,
            is_active,
        };
        state.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    pub fn insert_meter(&self, code: &str, location: Option<&str>) -> Result<Meter, StoreError> {
        let mut state = self.state()?;
        if state.meters.values().any(|m| m.code == code) {
            return Err(StoreError::Backend(format!("duplicate meter code '{code}'")));
        }
        let meter = Meter {
            id: state.next_id(),
            code: code.to_string(),
            location: location.map(str::to_string),
        };
        state.meters.insert(meter.id, meter.clone());
        Ok(meter)
    }

    pub fn insert_dip_event(&self, event: DipEvent) -> Result<(), StoreError> {
        self.state()?.events.push(event);
        Ok(())
    }

    /// Make every future factor write for `id` fail.
    pub fn fail_weight_writes(&self, id: WeightId) -> Result<(), StoreError> {
        self.state()?.failing_weight_writes.insert(id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl WeightStore for MemoryStore {
    async fn get_profile(&self, id: ProfileId) -> Result<Option<Profile>, StoreError> {
        Ok(self.state()?.profiles.get(&id).cloned())
    }

    async fn list_weights(&self, profile_id: ProfileId) -> Result<Vec<WeightEntry>, StoreError> {
        Ok(self
            .state()?
            .weights
            .values()
            .filter(|w| w.profile_id == profile_id)
            .cloned()
            .collect())
    }

    async fn upsert_weight(
        &self,
        profile_id: ProfileId,
        meter_id: MeterId,
        customer_count: i64,
        note: Option<&str>,
    ) -> Result<WeightEntry, StoreError> {
        let mut state = self.state()?;
        if !state.profiles.contains_key(&profile_id) {
            return Err(StoreError::NotFound(format!("profile {profile_id}")));
        }
        if !state.meters.contains_key(&meter_id) {
            return Err(StoreError::NotFound(format!("meter {meter_id}")));
        }

        let existing = state
            .weights
            .values_mut()
            .find(|w| w.profile_id == profile_id && w.meter_id == meter_id);
        if let Some(entry) = existing {
            entry.customer_count = customer_count;
            if let Some(note) = note {
                entry.note = Some(note.to_string());
            }
            return Ok(entry.clone());
        }

        let entry = WeightEntry {
            id: state.next_id(),
            profile_id,
            meter_id,
            customer_count,
            weight_factor: 0.0,
            note: note.map(str::to_string),
        };
        state.weights.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn batch_set_weight_factors(
        &self,
        profile_id: ProfileId,
        updates: &[WeightFactorUpdate],
    ) -> Result<Vec<WeightWriteOutcome>, StoreError> {
        let mut state = self.state()?;
        let mut outcomes = Vec::with_capacity(updates.len());

        for update in updates {
            if state.failing_weight_writes.contains(&update.id) {
                outcomes.push(WeightWriteOutcome::failed(update.id, "write rejected by store"));
                continue;
            }
            match state.weights.get_mut(&update.id) {
                Some(entry) if entry.profile_id == profile_id => {
                    entry.weight_factor = update.weight_factor;
                    outcomes.push(WeightWriteOutcome::ok(update.id));
                }
                _ => outcomes.push(WeightWriteOutcome::failed(
                    update.id,
                    format!("weight entry not found in profile {profile_id}"),
                )),
            }
        }

        Ok(outcomes)
    }

    async fn delete_weight(&self, id: WeightId) -> Result<(), StoreError> {
        match self.state()?.weights.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("weight entry {id}"))),
        }
    }

    async fn resolve_meter_code(&self, code: &str) -> Result<Option<MeterId>, StoreError> {
        Ok(self
            .state()?
            .meters
            .values()
            .find(|m| m.code == code)
            .map(|m| m.id))
    }

    async fn list_meters(&self, ids: &[MeterId]) -> Result<Vec<Meter>, StoreError> {
        let state = self.state()?;
        Ok(ids.iter().filter_map(|id| state.meters.get(id).cloned()).collect())
    }
}

#[async_trait::async_trait]
impl EventSource for MemoryStore {
    async fn query_dip_events(
        &self,
        meter_ids: &[MeterId],
        filter: &EventFilter,
    ) -> Result<Vec<DipEvent>, StoreError> {
        let wanted: HashSet<MeterId> = meter_ids.iter().copied().collect();
        Ok(self
            .state()?
            .events
            .iter()
            .filter(|e| wanted.contains(&e.meter_id) && filter.matches(e))
            .cloned()
            .collect())
    }
}
