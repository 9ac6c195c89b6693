use ulid::Ulid;

use crate::repository::RepoError;

#[derive(Debug)]
pub enum EngineError {
    Unauthenticated,
    NotClient,
    ProviderNotFound(Ulid),
    SlotUnavailable {
        provider_id: Ulid,
        conflicting: Ulid,
    },
    NotFound(Ulid),
    Forbidden,
    /// A client tried to edit an appointment that is no longer pending.
    InvalidTransition(Ulid),
    ProvidersStatusOnly,
    /// A client tried to delete an appointment that is no longer pending.
    InvalidState(Ulid),
    Validation(&'static str),
    EmailTaken(String),
    UserExists(Ulid),
    PersistenceFailure(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Unauthenticated => write!(f, "not authenticated"),
            EngineError::NotClient => write!(f, "only clients can create appointments"),
            EngineError::ProviderNotFound(id) => write!(f, "provider not found: {id}"),
            EngineError::SlotUnavailable {
                provider_id,
                conflicting,
            } => write!(
                f,
                "provider {provider_id} is not available at this time (conflicts with {conflicting})"
            ),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Forbidden => write!(f, "not enough permissions"),
            EngineError::InvalidTransition(id) => {
                write!(f, "can only modify pending appointments: {id}")
            }
            EngineError::ProvidersStatusOnly => {
                write!(f, "providers can only update appointment status")
            }
            EngineError::InvalidState(id) => {
                write!(f, "can only delete pending appointments: {id}")
            }
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::EmailTaken(email) => write!(f, "email already registered: {email}"),
            EngineError::UserExists(id) => write!(f, "user already exists: {id}"),
            EngineError::PersistenceFailure(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RepoError> for EngineError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::EmailTaken(email) => EngineError::EmailTaken(email),
            RepoError::UserExists(id) => EngineError::UserExists(id),
            RepoError::Missing(id) => EngineError::NotFound(id),
            RepoError::Wal(_) => EngineError::PersistenceFailure(e.to_string()),
        }
    }
}
