use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// The interval an existing appointment blocks on its provider's calendar:
/// a fixed [`OCCUPIED_WINDOW_MS`] from its start. The stored duration is not
/// consulted.
pub fn occupied_window(existing: &Appointment) -> Span {
    Span::new(existing.date_time, existing.date_time + OCCUPIED_WINDOW_MS)
}

/// True if the occupied window of `existing` contains the candidate's start
/// (half-open) or its end (end-inclusive).
///
/// A candidate that starts before the window and ends after it is not a
/// conflict under this rule.
pub fn blocks(existing: &Appointment, candidate: &Span) -> bool {
    let window = occupied_window(existing);
    window.contains_start_of(candidate) || window.contains_end_of(candidate)
}

/// First appointment (in the given order) whose occupied window blocks
/// `candidate`. Status is not considered.
pub fn find_conflict<'a>(existing: &'a [Appointment], candidate: &Span) -> Option<&'a Appointment> {
    existing.iter().find(|appt| blocks(appt, candidate))
}

pub fn has_conflict(existing: &[Appointment], candidate: &Span) -> bool {
    find_conflict(existing, candidate).is_some()
}

pub(crate) fn check_no_conflict(
    provider_id: Ulid,
    existing: &[Appointment],
    candidate: &Span,
) -> Result<(), EngineError> {
    match find_conflict(existing, candidate) {
        Some(appt) => Err(EngineError::SlotUnavailable {
            provider_id,
            conflicting: appt.id,
        }),
        None => Ok(()),
    }
}

// ── Field validation ─────────────────────────────────────

fn validate_title(title: &str) -> Result<(), EngineError> {
    let chars = title.chars().count();
    if chars < MIN_TITLE_CHARS {
        return Err(EngineError::Validation("title too short"));
    }
    if chars > MAX_TITLE_CHARS {
        return Err(EngineError::Validation("title too long"));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<(), EngineError> {
    if let Some(d) = description
        && d.chars().count() > MAX_DESCRIPTION_CHARS
    {
        return Err(EngineError::Validation("description too long"));
    }
    Ok(())
}

fn validate_date_time(date_time: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&date_time) {
        return Err(EngineError::Validation("date_time out of range"));
    }
    Ok(())
}

fn validate_duration(minutes: u32) -> Result<(), EngineError> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(EngineError::Validation("duration_minutes must be between 15 and 480"));
    }
    Ok(())
}

pub(crate) fn validate_new(req: &NewAppointment) -> Result<(), EngineError> {
    validate_title(&req.title)?;
    validate_description(req.description.as_deref())?;
    validate_date_time(req.date_time)?;
    validate_duration(req.duration_minutes)
}

pub(crate) fn validate_update(update: &AppointmentUpdate) -> Result<(), EngineError> {
    if let Some(title) = &update.title {
        validate_title(title)?;
    }
    if let Some(description) = &update.description {
        validate_description(description.as_deref())?;
    }
    if let Some(date_time) = update.date_time {
        validate_date_time(date_time)?;
    }
    if let Some(minutes) = update.duration_minutes {
        validate_duration(minutes)?;
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), EngineError> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::Validation("email too long"));
    }
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(EngineError::Validation("malformed email")),
    }
}

pub(crate) fn validate_page(page: &Page) -> Result<(), EngineError> {
    if page.limit > MAX_PAGE_LIMIT {
        return Err(EngineError::Validation("limit too large"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = MINUTE_MS;
    const H: Ms = 60 * M;

    fn existing_at(date_time: Ms, duration_minutes: u32) -> Appointment {
        Appointment {
            id: Ulid::new(),
            title: "Existing".into(),
            description: None,
            date_time,
            duration_minutes,
            status: AppointmentStatus::Pending,
            client_id: Ulid::new(),
            provider_id: Ulid::new(),
            created_at: 0,
            updated_at: None,
        }
    }

    #[test]
    fn window_is_thirty_minutes_regardless_of_duration() {
        let appt = existing_at(10 * H, 240);
        assert_eq!(occupied_window(&appt), Span::new(10 * H, 10 * H + 30 * M));
    }

    #[test]
    fn candidate_start_inside_window_conflicts() {
        // 10:00 for 60 min, then 10:15 for 30 min
        let existing = [existing_at(10 * H, 60)];
        assert!(has_conflict(&existing, &Span::from_minutes(10 * H + 15 * M, 30)));
    }

    #[test]
    fn same_start_conflicts() {
        let existing = [existing_at(10 * H, 15)];
        assert!(has_conflict(&existing, &Span::from_minutes(10 * H, 15)));
    }

    #[test]
    fn candidate_end_inside_window_conflicts() {
        // 11:00 for 15 min against an appointment at 11:10: end 11:15 in [11:10, 11:40]
        let existing = [existing_at(11 * H + 10 * M, 30)];
        assert!(has_conflict(&existing, &Span::from_minutes(11 * H, 15)));
    }

    #[test]
    fn candidate_ending_exactly_at_window_end_conflicts() {
        let existing = [existing_at(10 * H, 30)];
        // [9:45, 10:30) ends on the window's closing instant
        assert!(has_conflict(&existing, &Span::from_minutes(9 * H + 45 * M, 45)));
    }

    #[test]
    fn candidate_ending_at_window_start_is_free() {
        let existing = [existing_at(10 * H, 30)];
        assert!(!has_conflict(&existing, &Span::from_minutes(9 * H + 30 * M, 30)));
    }

    #[test]
    fn candidate_starting_at_window_end_is_free() {
        let existing = [existing_at(10 * H, 30)];
        assert!(!has_conflict(&existing, &Span::from_minutes(10 * H + 30 * M, 30)));
    }

    #[test]
    fn start_after_window_is_free_even_inside_stored_duration() {
        // Stored duration runs to 12:00 but only [10:00, 10:30) is occupied
        let existing = [existing_at(10 * H, 120)];
        assert!(!has_conflict(&existing, &Span::from_minutes(11 * H, 30)));
    }

    #[test]
    fn candidate_enclosing_window_is_not_a_conflict() {
        // [9:00, 12:00) swallows [10:00, 10:30) but neither endpoint lands inside it
        let existing = [existing_at(10 * H, 30)];
        assert!(!has_conflict(&existing, &Span::from_minutes(9 * H, 180)));
    }

    #[test]
    fn find_conflict_reports_first_blocking_appointment() {
        let free = existing_at(8 * H, 30);
        let blocking = existing_at(10 * H, 30);
        let existing = [free, blocking.clone()];
        let hit = find_conflict(&existing, &Span::from_minutes(10 * H + 5 * M, 15)).unwrap();
        assert_eq!(hit.id, blocking.id);
    }

    #[test]
    fn check_no_conflict_maps_to_slot_unavailable() {
        let provider_id = Ulid::new();
        let existing = [existing_at(10 * H, 30)];
        let result = check_no_conflict(provider_id, &existing, &Span::from_minutes(10 * H, 30));
        match result {
            Err(EngineError::SlotUnavailable {
                provider_id: p,
                conflicting,
            }) => {
                assert_eq!(p, provider_id);
                assert_eq!(conflicting, existing[0].id);
            }
            other => panic!("expected SlotUnavailable, got {other:?}"),
        }
        assert!(check_no_conflict(provider_id, &[], &Span::from_minutes(0, 30)).is_ok());
    }

    fn request(title: &str, description: Option<&str>, minutes: u32) -> NewAppointment {
        NewAppointment {
            provider_id: Ulid::new(),
            title: title.into(),
            description: description.map(Into::into),
            date_time: 10 * H,
            duration_minutes: minutes,
        }
    }

    #[test]
    fn title_bounds() {
        assert!(validate_new(&request("abc", None, 60)).is_ok());
        assert!(validate_new(&request("ab", None, 60)).is_err());
        assert!(validate_new(&request(&"x".repeat(100), None, 60)).is_ok());
        assert!(validate_new(&request(&"x".repeat(101), None, 60)).is_err());
        // counted in characters, not bytes
        assert!(validate_new(&request("ñññ", None, 60)).is_ok());
    }

    #[test]
    fn description_bound() {
        let ok = "d".repeat(500);
        let long = "d".repeat(501);
        assert!(validate_new(&request("Title", Some(&ok), 60)).is_ok());
        assert!(matches!(
            validate_new(&request("Title", Some(&long), 60)),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn duration_bounds() {
        assert!(validate_new(&request("Title", None, 15)).is_ok());
        assert!(validate_new(&request("Title", None, 480)).is_ok());
        assert!(validate_new(&request("Title", None, 14)).is_err());
        assert!(validate_new(&request("Title", None, 481)).is_err());
    }

    #[test]
    fn date_time_range() {
        let mut req = request("Title", None, 60);
        req.date_time = -1;
        assert!(validate_new(&req).is_err());
        req.date_time = MAX_VALID_TIMESTAMP_MS + 1;
        assert!(validate_new(&req).is_err());
    }

    #[test]
    fn update_validates_only_present_fields() {
        assert!(validate_update(&AppointmentUpdate::default()).is_ok());
        let bad = AppointmentUpdate {
            duration_minutes: Some(5),
            ..Default::default()
        };
        assert!(validate_update(&bad).is_err());
        let clear = AppointmentUpdate {
            description: Some(None),
            ..Default::default()
        };
        assert!(validate_update(&clear).is_ok());
    }

    #[test]
    fn email_shape() {
        assert!(validate_email("ann@example.com").is_ok());
        assert!(validate_email("ann").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ann@").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_email("a nn@example.com").is_err());
    }

    #[test]
    fn page_limit_cap() {
        assert!(validate_page(&Page::new(0, MAX_PAGE_LIMIT)).is_ok());
        assert!(validate_page(&Page::new(0, MAX_PAGE_LIMIT + 1)).is_err());
    }
}
