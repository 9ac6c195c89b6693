use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::{RepoError, Repository, now_ms};

/// Index key: creation time first so listings come back oldest first.
type IndexKey = (Ms, Ulid);

/// Users and appointments held in memory. State changes go through
/// [`InMemoryStore::apply_event`], so the same code rebuilds state on WAL replay.
pub struct InMemoryStore {
    users: DashMap<Ulid, User>,
    /// Ids of registered users plus those reserved by in-flight registrations.
    user_ids: DashSet<Ulid>,
    emails: DashMap<String, Ulid>,
    appointments: DashMap<Ulid, Appointment>,
    by_client: DashMap<Ulid, BTreeSet<IndexKey>>,
    by_provider: DashMap<Ulid, BTreeSet<IndexKey>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            user_ids: DashSet::new(),
            emails: DashMap::new(),
            appointments: DashMap::new(),
            by_client: DashMap::new(),
            by_provider: DashMap::new(),
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    // ── Email index ──────────────────────────────────────────

    /// Claim `email` for `user_id`. Emails compare case-insensitively.
    pub(super) fn reserve_email(&self, email: &str, user_id: Ulid) -> Result<(), RepoError> {
        match self.emails.entry(email.to_ascii_lowercase()) {
            Entry::Occupied(_) => Err(RepoError::EmailTaken(email.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(user_id);
                Ok(())
            }
        }
    }

    /// Undo a reservation that never made it into the log.
    pub(super) fn release_email(&self, email: &str, user_id: Ulid) {
        self.emails
            .remove_if(&email.to_ascii_lowercase(), |_, owner| *owner == user_id);
    }

    /// Claim both the id and the email of a user about to be registered.
    /// On error nothing stays claimed.
    pub(super) fn reserve_identity(&self, user: &User) -> Result<(), RepoError> {
        if !self.user_ids.insert(user.id) {
            return Err(RepoError::UserExists(user.id));
        }
        if let Err(e) = self.reserve_email(&user.email, user.id) {
            self.user_ids.remove(&user.id);
            return Err(e);
        }
        Ok(())
    }

    pub(super) fn release_identity(&self, user: &User) {
        self.release_email(&user.email, user.id);
        self.user_ids.remove(&user.id);
    }

    // ── Record construction ──────────────────────────────────

    pub(super) fn prepare_user(user: NewUser) -> User {
        User {
            id: user.id.unwrap_or_else(Ulid::new),
            email: user.email,
            role: user.role,
            created_at: now_ms(),
        }
    }

    pub(super) fn prepare_appointment(draft: AppointmentDraft) -> Appointment {
        Appointment {
            id: Ulid::new(),
            title: draft.title,
            description: draft.description,
            date_time: draft.date_time,
            duration_minutes: draft.duration_minutes,
            status: draft.status,
            client_id: draft.client_id,
            provider_id: draft.provider_id,
            created_at: now_ms(),
            updated_at: None,
        }
    }

    // ── Indexed reads ────────────────────────────────────────

    fn collect(&self, index: &DashMap<Ulid, BTreeSet<IndexKey>>, owner: &Ulid, page: Option<Page>) -> Vec<Appointment> {
        let Some(keys) = index.get(owner) else {
            return Vec::new();
        };
        let (skip, take) = match page {
            Some(p) => (p.offset, p.limit),
            None => (0, usize::MAX),
        };
        keys.iter()
            .skip(skip)
            .take(take)
            .filter_map(|(_, id)| self.get_appointment(id))
            .collect()
    }

    pub fn appointments_by_provider(&self, provider_id: &Ulid) -> Vec<Appointment> {
        self.collect(&self.by_provider, provider_id, None)
    }

    pub fn appointments_by_client_page(&self, client_id: &Ulid, page: Page) -> Vec<Appointment> {
        self.collect(&self.by_client, client_id, Some(page))
    }

    pub fn appointments_by_provider_page(&self, provider_id: &Ulid, page: Page) -> Vec<Appointment> {
        self.collect(&self.by_provider, provider_id, Some(page))
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::UserRegistered {
                id,
                email,
                role,
                created_at,
            } => {
                self.user_ids.insert(*id);
                self.emails.insert(email.to_ascii_lowercase(), *id);
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        email: email.clone(),
                        role: *role,
                        created_at: *created_at,
                    },
                );
            }
            Event::AppointmentCreated {
                id,
                title,
                description,
                date_time,
                duration_minutes,
                status,
                client_id,
                provider_id,
                created_at,
                updated_at,
            } => {
                let key = (*created_at, *id);
                self.by_client.entry(*client_id).or_default().insert(key);
                self.by_provider.entry(*provider_id).or_default().insert(key);
                self.appointments.insert(
                    *id,
                    Appointment {
                        id: *id,
                        title: title.clone(),
                        description: description.clone(),
                        date_time: *date_time,
                        duration_minutes: *duration_minutes,
                        status: *status,
                        client_id: *client_id,
                        provider_id: *provider_id,
                        created_at: *created_at,
                        updated_at: *updated_at,
                    },
                );
            }
            Event::AppointmentUpdated {
                id,
                title,
                description,
                date_time,
                duration_minutes,
                status,
                updated_at,
            } => {
                if let Some(mut appt) = self.appointments.get_mut(id) {
                    appt.title = title.clone();
                    appt.description = description.clone();
                    appt.date_time = *date_time;
                    appt.duration_minutes = *duration_minutes;
                    appt.status = *status;
                    appt.updated_at = *updated_at;
                }
            }
            Event::AppointmentDeleted { id } => {
                if let Some((_, appt)) = self.appointments.remove(id) {
                    let key = (appt.created_at, appt.id);
                    if let Some(mut keys) = self.by_client.get_mut(&appt.client_id) {
                        keys.remove(&key);
                    }
                    if let Some(mut keys) = self.by_provider.get_mut(&appt.provider_id) {
                        keys.remove(&key);
                    }
                }
            }
        }
    }

    /// The minimal event sequence that recreates the current state: every
    /// user, then every live appointment oldest first.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| (u.created_at, u.id));
        let mut appts: Vec<Appointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        appts.sort_by_key(|a| (a.created_at, a.id));

        users
            .iter()
            .map(Event::registered)
            .chain(appts.iter().map(Event::created))
            .collect()
    }
}

/// Volatile repository: same semantics as the durable store, nothing on disk.
#[async_trait]
impl Repository for InMemoryStore {
    async fn find_user(&self, id: Ulid, role: Option<Role>) -> Result<Option<User>, RepoError> {
        Ok(self
            .get_user(&id)
            .filter(|u| role.is_none_or(|r| u.role == r)))
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, RepoError> {
        let user = Self::prepare_user(user);
        self.reserve_identity(&user)?;
        self.apply_event(&Event::registered(&user));
        Ok(user)
    }

    async fn find_appointments_by_provider(
        &self,
        provider_id: Ulid,
    ) -> Result<Vec<Appointment>, RepoError> {
        Ok(self.appointments_by_provider(&provider_id))
    }

    async fn insert_appointment(&self, draft: AppointmentDraft) -> Result<Appointment, RepoError> {
        let appt = Self::prepare_appointment(draft);
        self.apply_event(&Event::created(&appt));
        Ok(appt)
    }

    async fn find_appointment(&self, id: Ulid) -> Result<Option<Appointment>, RepoError> {
        Ok(self.get_appointment(&id))
    }

    async fn find_appointments_by_client(
        &self,
        client_id: Ulid,
        page: Page,
    ) -> Result<Vec<Appointment>, RepoError> {
        Ok(self.appointments_by_client_page(&client_id, page))
    }

    async fn find_appointments_by_provider_for_user(
        &self,
        provider_id: Ulid,
        page: Page,
    ) -> Result<Vec<Appointment>, RepoError> {
        Ok(self.appointments_by_provider_page(&provider_id, page))
    }

    async fn update_appointment(&self, mut appt: Appointment) -> Result<Appointment, RepoError> {
        if !self.appointments.contains_key(&appt.id) {
            return Err(RepoError::Missing(appt.id));
        }
        appt.updated_at = Some(now_ms());
        self.apply_event(&Event::updated(&appt));
        Ok(appt)
    }

    async fn delete_appointment(&self, appt: &Appointment) -> Result<(), RepoError> {
        if !self.appointments.contains_key(&appt.id) {
            return Err(RepoError::Missing(appt.id));
        }
        self.apply_event(&Event::AppointmentDeleted { id: appt.id });
        Ok(())
    }
}
