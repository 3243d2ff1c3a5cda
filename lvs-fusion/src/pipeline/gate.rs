//! Process-wide single-flight gate for the heavy pipeline
//!
//! One token shared by every session. Entry never waits: a session that
//! finds the token held defers its window instead of queueing.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::trace;

/// Shared handle to the heavy-pipeline token
#[derive(Debug, Clone)]
pub struct HeavyGate {
    token: Arc<Semaphore>,
}

/// Proof of holding the token; released on drop
#[derive(Debug)]
pub struct HeavyPermit {
    _permit: OwnedSemaphorePermit,
}

impl HeavyGate {
    pub fn new() -> Self {
        Self {
            token: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the token if it is free at this instant
    pub fn try_enter(&self) -> Option<HeavyPermit> {
        match self.token.clone().try_acquire_owned() {
            Ok(permit) => Some(HeavyPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => {
                trace!("Heavy gate busy");
                None
            }
            // Never closed while a handle exists
            Err(TryAcquireError::Closed) => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.token.available_permits() == 0
    }
}

impl Default for HeavyGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder() {
        let gate = HeavyGate::new();
        let other_session = gate.clone();

        let permit = gate.try_enter().expect("gate should be free");
        assert!(gate.is_busy());
        assert!(other_session.try_enter().is_none());

        drop(permit);
        assert!(!gate.is_busy());
        assert!(other_session.try_enter().is_some());
    }
}
