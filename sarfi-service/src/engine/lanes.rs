use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use pq_client::domain::ProfileId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LaneMap = HashMap<ProfileId, Arc<AsyncMutex<()>>>;

/// Single-writer execution lanes keyed by profile id.
///
/// Holding the guard returned by [`ProfileLanes::acquire`] excludes every
/// other operation on the same profile. Different profiles never contend.
/// A lane lives in the map only while someone holds or waits on it.
#[derive(Default)]
pub struct ProfileLanes {
    lanes: Mutex<LaneMap>,
}

impl ProfileLanes {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LaneMap> {
        // The map only ever holds cloned Arcs, so a poisoned lock is still consistent.
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn acquire(&self, profile_id: ProfileId) -> LaneGuard<'_> {
        // Created before the wait so a cancelled acquire still prunes its lane.
        let mut guard = LaneGuard {
            lanes: self,
            profile_id,
            held: None,
        };
        let lane = self.map().entry(profile_id).or_default().clone();
        guard.held = Some(lane.lock_owned().await);
        guard
    }

    /// Number of lanes currently held or waited on.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, profile_id: ProfileId) {
        let mut lanes = self.map();
        if lanes
            .get(&profile_id)
            .is_some_and(|lane| Arc::strong_count(lane) == 1)
        {
            lanes.remove(&profile_id);
        }
    }
}

pub struct LaneGuard<'a> {
    lanes: &'a ProfileLanes,
    profile_id: ProfileId,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        // Unlock first so our own Arc no longer counts as a holder.
        drop(self.held.take());
        self.lanes.release(self.profile_id);
    }
}
