mod durable;
mod memory;

pub use durable::DurableStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug)]
pub enum RepoError {
    /// The email is already registered to another user.
    EmailTaken(String),
    /// A user with this id already exists.
    UserExists(Ulid),
    /// The record to update or delete no longer exists.
    Missing(Ulid),
    /// The write-ahead log rejected the write; nothing was applied.
    Wal(String),
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoError::EmailTaken(email) => write!(f, "email already registered: {email}"),
            RepoError::UserExists(id) => write!(f, "user already exists: {id}"),
            RepoError::Missing(id) => write!(f, "record vanished: {id}"),
            RepoError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for RepoError {}

/// Storage consumed by the booking engine. Appointments are reachable by id
/// and through two independent indexes, by client and by provider.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Look up a user, optionally requiring a role.
    async fn find_user(&self, id: Ulid, role: Option<Role>) -> Result<Option<User>, RepoError>;

    /// Assigns `id` (when absent) and `created_at`. Never replaces an
    /// existing user: a taken id or email is an error.
    async fn insert_user(&self, user: NewUser) -> Result<User, RepoError>;

    /// Every appointment of a provider, regardless of status.
    async fn find_appointments_by_provider(
        &self,
        provider_id: Ulid,
    ) -> Result<Vec<Appointment>, RepoError>;

    /// Assigns `id` and `created_at`.
    async fn insert_appointment(&self, draft: AppointmentDraft) -> Result<Appointment, RepoError>;

    async fn find_appointment(&self, id: Ulid) -> Result<Option<Appointment>, RepoError>;

    async fn find_appointments_by_client(
        &self,
        client_id: Ulid,
        page: Page,
    ) -> Result<Vec<Appointment>, RepoError>;

    async fn find_appointments_by_provider_for_user(
        &self,
        provider_id: Ulid,
        page: Page,
    ) -> Result<Vec<Appointment>, RepoError>;

    async fn update_appointment(&self, appt: Appointment) -> Result<Appointment, RepoError>;

    async fn delete_appointment(&self, appt: &Appointment) -> Result<(), RepoError>;
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}
