use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::Principal;
use crate::repository::Repository;

/// Supplies the authenticated caller for an engine operation.
#[async_trait]
pub trait Identity: Send + Sync {
    /// Fails with [`EngineError::Unauthenticated`] when no principal is attached.
    async fn current_principal(&self) -> Result<Principal, EngineError>;
}

/// A principal known up front (embedding, tests).
#[derive(Debug, Clone, Copy)]
pub struct StaticIdentity(pub Option<Principal>);

impl StaticIdentity {
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl From<Principal> for StaticIdentity {
    fn from(p: Principal) -> Self {
        Self(Some(p))
    }
}

#[async_trait]
impl Identity for StaticIdentity {
    async fn current_principal(&self) -> Result<Principal, EngineError> {
        self.0.ok_or(EngineError::Unauthenticated)
    }
}

/// A session that knows only the caller's user id; the role is looked up on
/// each call so the principal always reflects the stored user.
pub struct SessionIdentity {
    user_id: Option<Ulid>,
    repo: Arc<dyn Repository>,
}

impl SessionIdentity {
    pub fn new(user_id: Option<Ulid>, repo: Arc<dyn Repository>) -> Self {
        Self { user_id, repo }
    }

    /// Session for a login name; names that are not a user id stay anonymous.
    pub fn from_login(login: Option<&str>, repo: Arc<dyn Repository>) -> Self {
        let user_id = login.and_then(|name| Ulid::from_string(name).ok());
        Self::new(user_id, repo)
    }
}

#[async_trait]
impl Identity for SessionIdentity {
    async fn current_principal(&self) -> Result<Principal, EngineError> {
        let id = self.user_id.ok_or(EngineError::Unauthenticated)?;
        let user = self
            .repo
            .find_user(id, None)
            .await
            .map_err(EngineError::from)?
            .ok_or(EngineError::Unauthenticated)?;
        Ok(Principal {
            id: user.id,
            role: user.role,
        })
    }
}
