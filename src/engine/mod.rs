mod conflict;
mod error;
mod mutations;
mod policy;
mod queries;

pub use conflict::{blocks, find_conflict, has_conflict, occupied_window};
pub use error::EngineError;

use std::sync::Arc;

use tracing::error;
use ulid::Ulid;

use crate::locks::{KeyedGuard, KeyedLocks};
use crate::model::*;
use crate::repository::{RepoError, Repository};

/// The booking engine: validates requests, detects provider conflicts and
/// gates every appointment mutation on the caller's role.
///
/// Without booking serialization the conflict scan and the insert are two
/// separate repository calls, so two concurrent bookings for the same
/// provider can both pass the scan.
pub struct Engine {
    repo: Arc<dyn Repository>,
    /// Provider id → booking lock. `None` keeps the unserialized behavior.
    booking_locks: Option<KeyedLocks>,
    /// Held from load to write by every update and delete of an appointment.
    appointment_locks: KeyedLocks,
}

impl Engine {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            booking_locks: None,
            appointment_locks: KeyedLocks::new(),
        }
    }

    /// Hold a per-provider lock across the conflict scan and the insert.
    pub fn serialize_bookings(mut self, enabled: bool) -> Self {
        self.booking_locks = enabled.then(KeyedLocks::new);
        self
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        self.repo.clone()
    }

    pub(super) async fn lock_provider(&self, provider_id: Ulid) -> Option<KeyedGuard<'_>> {
        let locks = self.booking_locks.as_ref()?;
        Some(locks.lock(provider_id).await)
    }

    pub(super) async fn lock_appointment(&self, id: Ulid) -> KeyedGuard<'_> {
        self.appointment_locks.lock(id).await
    }

    /// Fetch an appointment or fail with `NotFound`.
    pub(super) async fn load(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.repo
            .find_appointment(id)
            .await
            .map_err(storage_err)?
            .ok_or(EngineError::NotFound(id))
    }
}

/// Log a storage failure and convert it. Failed writes have already been
/// rolled back by the repository.
pub(super) fn storage_err(e: RepoError) -> EngineError {
    if let RepoError::Wal(_) = e {
        error!("persistence failure: {e}");
    }
    EngineError::from(e)
}
