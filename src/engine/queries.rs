use ulid::Ulid;

use crate::identity::Identity;
use crate::model::*;

use super::conflict::validate_page;
use super::policy::authorize_view;
use super::{Engine, EngineError, storage_err};

impl Engine {
    /// Visible to the appointment's client and provider only.
    pub async fn get_appointment(
        &self,
        identity: &dyn Identity,
        id: Ulid,
    ) -> Result<Appointment, EngineError> {
        let principal = identity.current_principal().await?;
        let appt = self.load(id).await?;
        authorize_view(&principal, &appt)?;
        Ok(appt)
    }

    /// The caller's own appointments: as client for clients, as provider for
    /// providers.
    pub async fn list_my_appointments(
        &self,
        identity: &dyn Identity,
        page: Page,
    ) -> Result<Vec<Appointment>, EngineError> {
        let principal = identity.current_principal().await?;
        validate_page(&page)?;
        let appts = match principal.role {
            Role::Client => self.repo.find_appointments_by_client(principal.id, page).await,
            Role::Provider => {
                self.repo
                    .find_appointments_by_provider_for_user(principal.id, page)
                    .await
            }
        };
        appts.map_err(storage_err)
    }

    /// Any authenticated caller may look up a user.
    pub async fn get_user(&self, identity: &dyn Identity, id: Ulid) -> Result<User, EngineError> {
        identity.current_principal().await?;
        self.repo
            .find_user(id, None)
            .await
            .map_err(storage_err)?
            .ok_or(EngineError::NotFound(id))
    }
}
