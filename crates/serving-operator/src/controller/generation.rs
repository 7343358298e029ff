//! Last-seen generation per instance
//!
//! Reconciles can be replayed out of order after a watch restart. A pass for a
//! generation older than one already handled is rejected so it cannot roll
//! the cluster back to an outdated spec.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serving_common::{Error, Result};

/// How an observed generation relates to the last one seen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationChange {
    /// First sighting of a freshly created instance
    Creation,
    /// The spec changed since the last pass
    Edit,
    /// Same generation as the last pass
    Resync,
}

impl fmt::Display for GenerationChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creation => write!(f, "creation"),
            Self::Edit => write!(f, "edit"),
            Self::Resync => write!(f, "resync"),
        }
    }
}

/// Tracks `metadata.generation` per instance key
#[derive(Debug, Default)]
pub struct GenerationTracker {
    seen: Mutex<HashMap<String, i64>>,
}

impl GenerationTracker {
    /// An empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a generation, rejecting one older than the last seen
    pub fn observe(&self, key: &str, generation: i64) -> Result<GenerationChange> {
        let mut seen = self.seen.lock();
        let change = match seen.get(key).copied() {
            Some(last) if generation < last => {
                return Err(Error::stale_generation(key, generation, last));
            }
            Some(last) if generation == last => GenerationChange::Resync,
            Some(_) => GenerationChange::Edit,
            None if generation <= 1 => GenerationChange::Creation,
            None => GenerationChange::Edit,
        };
        seen.insert(key.to_string(), generation);
        Ok(change)
    }

    /// Last generation recorded for a key
    pub fn last_seen(&self, key: &str) -> Option<i64> {
        self.seen.lock().get(key).copied()
    }

    /// Drop a key once its instance is gone
    pub fn forget(&self, key: &str) {
        self.seen.lock().remove(key);
    }
}
