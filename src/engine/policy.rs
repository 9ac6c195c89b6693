use crate::model::*;

use super::EngineError;

/// How the caller relates to an appointment. The client check wins if a user
/// somehow holds both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Party {
    Client,
    Provider,
    Outsider,
}

pub(crate) fn party(principal: &Principal, appt: &Appointment) -> Party {
    if principal.id == appt.client_id {
        Party::Client
    } else if principal.id == appt.provider_id {
        Party::Provider
    } else {
        Party::Outsider
    }
}

/// What an update may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateRights {
    /// Any subset of these fields, including none.
    AnyOf(FieldSet),
    /// Precisely this set, nothing more or less.
    Exactly(FieldSet),
}

impl UpdateRights {
    fn permits(&self, touched: FieldSet) -> bool {
        match self {
            UpdateRights::AnyOf(allowed) => touched.is_subset_of(*allowed),
            UpdateRights::Exactly(required) => touched == *required,
        }
    }
}

/// Field-level rights of `principal` on `appt`.
///
/// The owning client may edit every field, status included, while the
/// appointment is pending. The assigned provider may change the status and
/// nothing else, whatever the current status is.
pub(crate) fn update_rights(principal: &Principal, appt: &Appointment) -> Result<UpdateRights, EngineError> {
    match party(principal, appt) {
        Party::Client if appt.status != AppointmentStatus::Pending => {
            Err(EngineError::InvalidTransition(appt.id))
        }
        Party::Client => Ok(UpdateRights::AnyOf(FieldSet::ALL)),
        Party::Provider => Ok(UpdateRights::Exactly(FieldSet::only(Field::Status))),
        Party::Outsider => Err(EngineError::Forbidden),
    }
}

pub(crate) fn authorize_update(
    principal: &Principal,
    appt: &Appointment,
    touched: FieldSet,
) -> Result<(), EngineError> {
    let rights = update_rights(principal, appt)?;
    if rights.permits(touched) {
        return Ok(());
    }
    match rights {
        UpdateRights::Exactly(_) => Err(EngineError::ProvidersStatusOnly),
        UpdateRights::AnyOf(_) => Err(EngineError::Forbidden),
    }
}

pub(crate) fn authorize_view(principal: &Principal, appt: &Appointment) -> Result<(), EngineError> {
    match party(principal, appt) {
        Party::Client | Party::Provider => Ok(()),
        Party::Outsider => Err(EngineError::Forbidden),
    }
}

/// Only the owning client, only while pending.
pub(crate) fn authorize_delete(principal: &Principal, appt: &Appointment) -> Result<(), EngineError> {
    if principal.id != appt.client_id {
        return Err(EngineError::Forbidden);
    }
    if appt.status != AppointmentStatus::Pending {
        return Err(EngineError::InvalidState(appt.id));
    }
    Ok(())
}
