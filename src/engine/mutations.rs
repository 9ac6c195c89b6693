use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::identity::Identity;
use crate::model::*;
use crate::observability::{APPOINTMENTS_CREATED_TOTAL, BOOKING_CONFLICTS_TOTAL};

use super::conflict::{check_no_conflict, validate_email, validate_new, validate_update};
use super::policy::{authorize_delete, authorize_update};
use super::{Engine, EngineError, storage_err};

impl Engine {
    /// Register a user. Needs no principal; the role is fixed from here on.
    pub async fn register_user(
        &self,
        id: Option<Ulid>,
        email: String,
        role: Role,
    ) -> Result<User, EngineError> {
        validate_email(&email)?;
        let user = self
            .repo
            .insert_user(NewUser { id, email, role })
            .await
            .map_err(storage_err)?;
        info!("registered {} {} as {}", user.role.as_str(), user.email, user.id);
        Ok(user)
    }

    /// Book a slot with a provider. The caller must be a client; the
    /// appointment starts out pending and belongs to the caller.
    pub async fn create_appointment(
        &self,
        identity: &dyn Identity,
        req: NewAppointment,
    ) -> Result<Appointment, EngineError> {
        let principal = identity.current_principal().await?;
        debug!(
            "creating appointment for {} with provider {} at {}",
            principal.id, req.provider_id, req.date_time
        );
        if principal.role != Role::Client {
            return Err(EngineError::NotClient);
        }
        validate_new(&req)?;

        let provider = self
            .repo
            .find_user(req.provider_id, Some(Role::Provider))
            .await
            .map_err(storage_err)?
            .ok_or(EngineError::ProviderNotFound(req.provider_id))?;

        let _serial = self.lock_provider(provider.id).await;
        let candidate = Span::from_minutes(req.date_time, req.duration_minutes);
        let existing = self
            .repo
            .find_appointments_by_provider(provider.id)
            .await
            .map_err(storage_err)?;
        debug!("checking {} existing appointments of {}", existing.len(), provider.id);
        if let Err(e) = check_no_conflict(provider.id, &existing, &candidate) {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            warn!("booking rejected: {e}");
            return Err(e);
        }

        let draft = AppointmentDraft {
            title: req.title,
            description: req.description,
            date_time: req.date_time,
            duration_minutes: req.duration_minutes,
            status: AppointmentStatus::Pending,
            client_id: principal.id,
            provider_id: provider.id,
        };
        let appt = self
            .repo
            .insert_appointment(draft)
            .await
            .map_err(storage_err)?;
        metrics::counter!(APPOINTMENTS_CREATED_TOTAL).increment(1);
        info!(
            "appointment {} booked by {} with {}",
            appt.id, appt.client_id, appt.provider_id
        );
        Ok(appt)
    }

    /// Apply a partial update. Rights depend on who is asking; the time slot
    /// is not re-checked for conflicts. Load, authorization and write happen
    /// under the appointment's lock, so rights are judged on the stored state
    /// the write replaces.
    pub async fn update_appointment(
        &self,
        identity: &dyn Identity,
        id: Ulid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, EngineError> {
        let principal = identity.current_principal().await?;
        let _record = self.lock_appointment(id).await;
        let mut appt = self.load(id).await?;
        authorize_update(&principal, &appt, update.touched())?;
        validate_update(&update)?;

        let previous = appt.status;
        update.apply_to(&mut appt);
        let appt = self
            .repo
            .update_appointment(appt)
            .await
            .map_err(storage_err)?;
        if appt.status != previous {
            info!(
                "appointment {} {} -> {} by {}",
                appt.id,
                previous.as_str(),
                appt.status.as_str(),
                principal.id
            );
        } else {
            debug!("appointment {} edited by {}", appt.id, principal.id);
        }
        Ok(appt)
    }

    /// Remove a pending appointment. Only its client may do so.
    pub async fn delete_appointment(
        &self,
        identity: &dyn Identity,
        id: Ulid,
    ) -> Result<(), EngineError> {
        let principal = identity.current_principal().await?;
        let _record = self.lock_appointment(id).await;
        let appt = self.load(id).await?;
        authorize_delete(&principal, &appt)?;
        self.repo
            .delete_appointment(&appt)
            .await
            .map_err(storage_err)?;
        info!("appointment {} deleted by {}", appt.id, principal.id);
        Ok(())
    }
}
