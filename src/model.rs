use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span starting at `start` lasting `minutes`.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + Ms::from(minutes) * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `start <= t < end`
    pub fn contains_start_of(&self, other: &Span) -> bool {
        self.start <= other.start && other.start < self.end
    }

    /// `start < t <= end`: the closing instant of `other` falls inside `self`,
    /// counting a shared end as inside.
    pub fn contains_end_of(&self, other: &Span) -> bool {
        self.start < other.end && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Client,
    Provider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Provider => "provider",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Some(Role::Client),
            "provider" => Some(Role::Provider),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "completed" => Some(AppointmentStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub email: String,
    /// Fixed at registration.
    pub role: Role,
    pub created_at: Ms,
}

/// Registration request. `id` is assigned by the repository when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub id: Option<Ulid>,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub date_time: Ms,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub client_id: Ulid,
    pub provider_id: Ulid,
    pub created_at: Ms,
    pub updated_at: Option<Ms>,
}

impl Appointment {
    /// The span the client asked for, `[date_time, date_time + duration)`.
    pub fn requested_span(&self) -> Span {
        Span::from_minutes(self.date_time, self.duration_minutes)
    }
}

/// Booking request as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub provider_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub date_time: Ms,
    pub duration_minutes: u32,
}

/// A validated appointment ready to be persisted. The repository assigns `id`
/// and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentDraft {
    pub title: String,
    pub description: Option<String>,
    pub date_time: Ms,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub client_id: Ulid,
    pub provider_id: Ulid,
}

/// Fields an update may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Description,
    DateTime,
    DurationMinutes,
    Status,
}

impl Field {
    const fn bit(self) -> u8 {
        match self {
            Field::Title => 1,
            Field::Description => 1 << 1,
            Field::DateTime => 1 << 2,
            Field::DurationMinutes => 1 << 3,
            Field::Status => 1 << 4,
        }
    }
}

/// Small bitset over [`Field`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet(u8);

impl FieldSet {
    pub const EMPTY: FieldSet = FieldSet(0);
    pub const ALL: FieldSet = FieldSet(0b1_1111);

    pub const fn only(field: Field) -> Self {
        FieldSet(field.bit())
    }

    pub fn insert(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_subset_of(&self, other: FieldSet) -> bool {
        self.0 & !other.0 == 0
    }
}

/// Partial update: `None` leaves a field untouched. `description: Some(None)`
/// clears the description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub date_time: Option<Ms>,
    pub duration_minutes: Option<u32>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentUpdate {
    pub fn status(status: AppointmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// The set of fields explicitly present in this update.
    pub fn touched(&self) -> FieldSet {
        let mut set = FieldSet::EMPTY;
        if self.title.is_some() {
            set.insert(Field::Title);
        }
        if self.description.is_some() {
            set.insert(Field::Description);
        }
        if self.date_time.is_some() {
            set.insert(Field::DateTime);
        }
        if self.duration_minutes.is_some() {
            set.insert(Field::DurationMinutes);
        }
        if self.status.is_some() {
            set.insert(Field::Status);
        }
        set
    }

    /// Apply present fields onto `appt`; absent fields keep their value.
    pub fn apply_to(self, appt: &mut Appointment) {
        if let Some(title) = self.title {
            appt.title = title;
        }
        if let Some(description) = self.description {
            appt.description = description;
        }
        if let Some(date_time) = self.date_time {
            appt.date_time = date_time;
        }
        if let Some(duration) = self.duration_minutes {
            appt.duration_minutes = duration;
        }
        if let Some(status) = self.status {
            appt.status = status;
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Ulid,
    pub role: Role,
}

/// Offset/limit window over a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: crate::limits::DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        email: String,
        role: Role,
        created_at: Ms,
    },
    AppointmentCreated {
        id: Ulid,
        title: String,
        description: Option<String>,
        date_time: Ms,
        duration_minutes: u32,
        status: AppointmentStatus,
        client_id: Ulid,
        provider_id: Ulid,
        created_at: Ms,
        updated_at: Option<Ms>,
    },
    AppointmentUpdated {
        id: Ulid,
        title: String,
        description: Option<String>,
        date_time: Ms,
        duration_minutes: u32,
        status: AppointmentStatus,
        updated_at: Option<Ms>,
    },
    AppointmentDeleted {
        id: Ulid,
    },
}

impl Event {
    pub fn created(appt: &Appointment) -> Self {
        Event::AppointmentCreated {
            id: appt.id,
            title: appt.title.clone(),
            description: appt.description.clone(),
            date_time: appt.date_time,
            duration_minutes: appt.duration_minutes,
            status: appt.status,
            client_id: appt.client_id,
            provider_id: appt.provider_id,
            created_at: appt.created_at,
            updated_at: appt.updated_at,
        }
    }

    pub fn updated(appt: &Appointment) -> Self {
        Event::AppointmentUpdated {
            id: appt.id,
            title: appt.title.clone(),
            description: appt.description.clone(),
            date_time: appt.date_time,
            duration_minutes: appt.duration_minutes,
            status: appt.status,
            updated_at: appt.updated_at,
        }
    }

    pub fn registered(user: &User) -> Self {
        Event::UserRegistered {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}
