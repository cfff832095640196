//!
//! Event reports and their status lifecycle.
//!
//! ```text
//! ACTIVE <-> UPDATED, ACTIVE <-> CLEARED, UPDATED <-> CLEARED   (mapper reports)
//! any    ->  any, CLOSED included                               (admin override)
//! ```
//!
//! A mapper report appends an [`EventUpdate`] and mirrors its status onto the
//! event. The admin override only sets the status. Once CLOSED, an event takes
//! no more mapper reports until an admin moves it out of CLOSED.
//!

use super::Invalid;
use crate::ODM::models::*;

pub const MAX_MEDIA: usize = 5;
pub const MAX_COMMENT_CHARS: usize = 500;
pub const MAX_TITLE_CHARS: usize = 150;
pub const MAX_DESCRIPTION_CHARS: usize = 2000;

/// Raw report fields as they arrive from the form
#[derive(Debug, Clone, Default)]
pub struct NewEventInput {
    pub category: Option<String>,
    pub custom_category: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub address: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Reporter {
    pub id: String,
    pub name: String,
    pub role: Role,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|inner| inner.trim().to_string()).filter(|inner| !inner.is_empty())
}

pub fn parse_coordinate(name: &str, raw: Option<&String>) -> Result<f64, Invalid> {
    let raw = match non_empty(raw) {
        Some(value) => value,
        None => return Err(Invalid(format!("{} is required", name))),
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(Invalid(format!("{} must be a number", name))),
    }
}

/// Statuses a mapper may report
pub fn mapper_may_report(status: EventStatus) -> bool {
    matches!(status, EventStatus::Active | EventStatus::Cleared | EventStatus::Updated)
}

/// Whether mapper reports may still be appended to the event
pub fn accepts_reports(event: &Event) -> bool {
    event.status != EventStatus::Closed
}

/// Validates a report and builds the event to store.
///
/// `customCategory` is required for OTHER and dropped for every other category.
pub fn build_event(
    id: String,
    input: &NewEventInput,
    reporter: &Reporter,
    media: Vec<Media>,
    now: Timestamp,
) -> Result<Event, Invalid> {
    let category = match non_empty(input.category.as_ref()) {
        Some(value) => value.parse::<EventCategory>().map_err(Invalid)?,
        None => return Err(Invalid("category is required".into())),
    };

    let custom_category = match category {
        EventCategory::Other => match non_empty(input.custom_category.as_ref()) {
            Some(value) => Some(value),
            None => return Err(Invalid("customCategory is required when category is OTHER".into())),
        },
        _ => None,
    };

    let title = match non_empty(input.title.as_ref()) {
        Some(value) => value,
        None => return Err(Invalid("title is required".into())),
    };
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(Invalid(format!("title must be at most {} characters", MAX_TITLE_CHARS)));
    }

    let description = non_empty(input.description.as_ref()).unwrap_or_default();
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(Invalid(format!("description must be at most {} characters", MAX_DESCRIPTION_CHARS)));
    }

    let location = GeoPoint::new(
        parse_coordinate("lat", input.lat.as_ref())?,
        parse_coordinate("lon", input.lon.as_ref())?,
    );
    if !location.is_valid() {
        return Err(Invalid("location is out of range".into()));
    }

    let severity = match non_empty(input.severity.as_ref()) {
        Some(value) => value.parse::<Severity>().map_err(Invalid)?,
        None => Severity::default(),
    };

    let status = match non_empty(input.status.as_ref()) {
        Some(value) => {
            let status = value.parse::<EventStatus>().map_err(Invalid)?;
            if !mapper_may_report(status) {
                return Err(Invalid(format!("an event cannot be created as {}", status)));
            }
            status
        },
        None => EventStatus::default(),
    };

    if media.len() > MAX_MEDIA {
        return Err(Invalid(format!("at most {} media files are allowed", MAX_MEDIA)));
    }

    Ok(Event {
        id,
        category,
        custom_category,
        title,
        description,
        location,
        address: non_empty(input.address.as_ref()),
        severity,
        status,
        media,
        reporter_id: reporter.id.clone(),
        reporter_name: reporter.name.clone(),
        reporter_role: reporter.role,
        verified: reporter.role == Role::Mapper,
        view_count: 0,
        updates: vec![],
        created_at: now,
        updated_at: now,
    })
}

/// Validates a mapper's field report and builds the update log entry
pub fn build_update(
    status: Option<&String>,
    comment: Option<&String>,
    updater: &Reporter,
    media: Vec<Media>,
    now: Timestamp,
) -> Result<EventUpdate, Invalid> {
    let status = match non_empty(status) {
        Some(value) => value.parse::<EventStatus>().map_err(Invalid)?,
        None => return Err(Invalid("status is required".into())),
    };
    if !mapper_may_report(status) {
        return Err(Invalid("status must be one of ACTIVE, CLEARED, UPDATED".into()));
    }

    let comment = match non_empty(comment) {
        Some(value) => value,
        None => return Err(Invalid("comment is required".into())),
    };
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(Invalid(format!("comment must be at most {} characters", MAX_COMMENT_CHARS)));
    }

    Ok(EventUpdate {
        updater_id: updater.id.clone(),
        updater_name: updater.name.clone(),
        updater_role: updater.role,
        status,
        comment,
        media,
        timestamp: now,
    })
}

/// Every media key an event references, its update log included
pub fn media_keys(event: &Event) -> Vec<String> {
    event.media
        .iter()
        .chain(event.updates.iter().flat_map(|update| update.media.iter()))
        .map(|media| media.key.clone())
        .collect()
}
