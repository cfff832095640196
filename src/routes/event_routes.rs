use super::*;
use log::{info, warn};
use config::config::ConfyConfig;
use ODM::models::*;
use ODM::odm_utils::new_id;
use ODM::store::{EventFilter, Page, Store};
use safety::access::{can, Action, Actor, Resource};
use safety::events::{self, NewEventInput, Reporter, MAX_MEDIA};
use safety::geo::Geofence;
use safety::ledger;
use safety::media::MediaStore;

use chrono::{Duration, Utc};
use rocket::data::Data;
use rocket::http::ContentType;
use rocket::serde::json::Value;
use rocket_multipart_form_data::{
    MultipartFormData, MultipartFormDataError, MultipartFormDataField, MultipartFormDataOptions, Repetition,
};

const MAX_UPDATE_MEDIA: usize = 1;
const DEFAULT_RECENT_HOURS: u64 = 24;
const MAX_RECENT_HOURS: u64 = 168;

const EVENT_FIELDS: [&str; 10] = [
    "category", "customCategory", "title", "description", "lat", "lon", "address", "severity", "status", "sourceType",
];
const UPDATE_FIELDS: [&str; 3] = ["status", "comment", "sourceType"];

//
// Multipart helpers
//

/// Parses a form with the given text fields and up to `max_files` files under `media`.
/// One extra file slot is read so that too many files can be told apart from the limit.
async fn parse_form(
    content_type: &ContentType,
    data: Data<'_>,
    config: &ConfyConfig,
    text_fields: &[&'static str],
    max_files: usize,
) -> ApiResult<MultipartFormData> {
    let per_file = config.max_upload_bytes();

    let mut fields: Vec<MultipartFormDataField> = text_fields
        .iter()
        .map(|name| MultipartFormDataField::text(*name))
        .collect();
    fields.push(
        MultipartFormDataField::file("media")
            .size_limit(per_file)
            .repetition(Repetition::fixed(max_files as u32 + 1)),
    );

    let mut options = MultipartFormDataOptions::with_multipart_form_data_fields(fields);
    options.max_data_bytes = per_file
        .saturating_mul(max_files as u64 + 1)
        .saturating_add(1024 * 1024);

    match MultipartFormData::parse(content_type, data, options).await {
        Ok(value) => Ok(value),
        Err(MultipartFormDataError::DataTooLargeError(field)) => {
            let name: &str = if field.is_empty() { "request" } else { &field };
            Err(ApiError::PayloadTooLarge(format!("{} exceeds the {} MB upload limit", name, config.max_upload_mb)))
        },
        Err(value) => Err(ApiError::Validation(format!("Malformed form data: {:?}", value))),
    }
}

fn form_text(form: &MultipartFormData, name: &str) -> Option<String> {
    form.texts
        .get(name)
        .and_then(|values| values.first())
        .map(|value| value.text.clone())
}

/// Copies the uploaded files into the media store, all or nothing
async fn store_media(media: &MediaStore, form: &MultipartFormData, max_files: usize) -> ApiResult<Vec<Media>> {
    let files = form.files.get("media").map(|values| values.as_slice()).unwrap_or(&[]);
    if files.len() > max_files {
        return Err(ApiError::Validation(format!("At most {} media files are allowed", max_files)));
    }
    let source = parse_enum::<MediaSource>("sourceType", form_text(form, "sourceType").as_deref())?
        .unwrap_or_default();

    let mut saved: Vec<Media> = Vec::with_capacity(files.len());
    for file in files {
        let content_type = file.content_type.as_ref().map(|value| value.essence_str().to_string());
        match media.save(&file.path, file.file_name.as_deref(), content_type.as_deref(), source).await {
            Ok(value) => saved.push(value),
            Err(value) => {
                let keys: Vec<String> = saved.into_iter().map(|item| item.key).collect();
                media.remove_all(&keys).await;
                return Err(value.into());
            },
        }
    }
    Ok(saved)
}

async fn discard(media: &MediaStore, saved: &[Media]) {
    let keys: Vec<String> = saved.iter().map(|item| item.key.clone()).collect();
    media.remove_all(&keys).await;
}

/// Display identity of whoever files a report
async fn reporter_for(store: &dyn Store, actor: &Actor) -> ApiResult<Reporter> {
    let name = match actor {
        Actor::Mapper { .. } => active_mapper(store, actor).await?.name,
        Actor::User { .. } | Actor::Admin { .. } => match store.get_user(actor.id()).await? {
            Some(user) if user.is_active => user.name,
            Some(_) => return Err(ApiError::Authentication("Account is deactivated".into())),
            None => actor.email().to_string(),
        },
    };
    Ok(Reporter { id: actor.id().to_string(), name, role: actor.role() })
}

//
// Listing
//

/// Radius queries filter first and paginate the filtered list
pub(super) async fn events_page(
    store: &dyn Store,
    mut filter: EventFilter,
    fence: Option<Geofence>,
    page: Page,
) -> ApiResult<Json<Value>> {
    match fence {
        Some(fence) => {
            filter.within = Some(fence.bounding_box());
            let candidates = store.list_events(&filter, None).await?;
            let inside = fence.filter(candidates, |event| Some(event.location));
            let (items, total) = slice_page(inside, page);
            Ok(paged(items, total, page))
        },
        None => {
            let total = store.count_events(&filter).await?;
            let items = store.list_events(&filter, Some(page)).await?;
            Ok(paged(items, total, page))
        },
    }
}

///
///Lists events, newest first
///
///INPUT:  optional category/severity/status filters, optional lat/lon/radius circle, pagination
///OUTPUT: the page of events and pagination info
///
#[get("/events?<category>&<severity>&<status>&<lat>&<lon>&<radius>&<limit>&<offset>")]
async fn list_events(
    category: Option<&str>,
    severity: Option<&str>,
    status: Option<&str>,
    lat: Option<&str>,
    lon: Option<&str>,
    radius: Option<&str>,
    limit: Option<&str>,
    offset: Option<&str>,
    db: &State<StoreState>,
    config: &State<Config>,
) -> ApiResult<Json<Value>> {
    let filter = EventFilter {
        category: parse_enum("category", category)?,
        severity: parse_enum("severity", severity)?,
        status: parse_enum("status", status)?,
        ..Default::default()
    };
    let fence = geofence(lat, lon, radius)?;
    let page = page(&config.config, limit, offset)?;
    events_page(db.store.as_ref(), filter, fence, page).await
}

#[get("/events/active?<lat>&<lon>&<radius>&<limit>&<offset>")]
async fn active_events(
    lat: Option<&str>,
    lon: Option<&str>,
    radius: Option<&str>,
    limit: Option<&str>,
    offset: Option<&str>,
    db: &State<StoreState>,
    config: &State<Config>,
) -> ApiResult<Json<Value>> {
    let filter = EventFilter { status: Some(EventStatus::Active), ..Default::default() };
    let fence = geofence(lat, lon, radius)?;
    let page = page(&config.config, limit, offset)?;
    events_page(db.store.as_ref(), filter, fence, page).await
}

#[get("/events/recent?<hours>&<limit>")]
async fn recent_events(
    hours: Option<&str>,
    limit: Option<&str>,
    db: &State<StoreState>,
    config: &State<Config>,
) -> ApiResult<Json<Value>> {
    let hours = parse_u64("hours", hours)?.unwrap_or(DEFAULT_RECENT_HOURS);
    if hours == 0 || hours > MAX_RECENT_HOURS {
        return Err(ApiError::Validation(format!("hours must be between 1 and {}", MAX_RECENT_HOURS)));
    }
    let filter = EventFilter {
        created_since: Some(Utc::now() - Duration::hours(hours as i64)),
        ..Default::default()
    };
    let page = page(&config.config, limit, None)?;
    events_page(db.store.as_ref(), filter, None, page).await
}

///
///Single event, counts as a view
///
#[get("/events/<id>")]
async fn get_event(id: &str, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    match db.store.record_event_view(id).await? {
        Some(event) => Ok(envelope(event)),
        None => Err(ApiError::NotFound("Event not found".into())),
    }
}

//
// Reporting
//

///
///Report a new event
///
///INPUT:  caller, multipart form (event fields and up to 5 `media` files)
///OUTPUT: 201 with the stored event; mappers are credited the report reward
///
#[post("/events", data = "<data>")]
async fn create_event(
    actor: Actor,
    content_type: &ContentType,
    data: Data<'_>,
    db: &State<StoreState>,
    config: &State<Config>,
    media: &State<MediaStore>,
) -> ApiResult<Created> {
    if !can(&actor, Action::ReportEvent, Resource::None) {
        return Err(ApiError::forbidden());
    }
    let store = db.store.as_ref();
    let reporter = reporter_for(store, &actor).await?;

    let form = parse_form(content_type, data, &config.config, &EVENT_FIELDS, MAX_MEDIA).await?;
    let input = NewEventInput {
        category: form_text(&form, "category"),
        custom_category: form_text(&form, "customCategory"),
        title: form_text(&form, "title"),
        description: form_text(&form, "description"),
        lat: form_text(&form, "lat"),
        lon: form_text(&form, "lon"),
        address: form_text(&form, "address"),
        severity: form_text(&form, "severity"),
        status: form_text(&form, "status"),
    };

    let now = Utc::now();
    let mut event = events::build_event(new_id(), &input, &reporter, vec![], now)?;
    event.media = store_media(media, &form, MAX_MEDIA).await?;

    if let Err(value) = store.insert_event(event.clone()).await {
        discard(media, &event.media).await;
        return Err(value.into());
    }
    info!("Server>>Client:\tEvent {} ({}) reported by {}", event.id, event.category, actor.email());

    if let Actor::Mapper { id, .. } = &actor {
        let reward = config.config.event_report_reward;
        store.apply_credit(ledger::event_report_credit(new_id(), id, &event, reward, now)).await?;
        info!("Server>>Client:\tCredited {} tokens to {} for event {}", reward, actor.email(), event.id);
    }

    Ok(created(event))
}

///
///Mapper field report on an existing event
///
///INPUT:  mapper, event id, multipart form (status, comment, optional `media` video)
///OUTPUT: the event with the new update appended; the mapper is credited the update reward
///
#[post("/events/<id>/update", data = "<data>")]
async fn update_event(
    id: &str,
    actor: Actor,
    content_type: &ContentType,
    data: Data<'_>,
    db: &State<StoreState>,
    config: &State<Config>,
    media: &State<MediaStore>,
) -> ApiResult<Json<Value>> {
    if !can(&actor, Action::UpdateEventStatus, Resource::None) {
        return Err(ApiError::Authorization("Only mappers can update events".into()));
    }
    let store = db.store.as_ref();
    let mapper = active_mapper(store, &actor).await?;
    let event = match store.get_event(id).await? {
        Some(value) => value,
        None => return Err(ApiError::NotFound("Event not found".into())),
    };
    if !can(&actor, Action::UpdateEventStatus, Resource::Event(&event)) {
        return Err(ApiError::forbidden());
    }
    if !events::accepts_reports(&event) {
        return Err(ApiError::conflict("Event is CLOSED"));
    }

    let form = parse_form(content_type, data, &config.config, &UPDATE_FIELDS, MAX_UPDATE_MEDIA).await?;
    let updater = Reporter { id: mapper.id.clone(), name: mapper.name.clone(), role: Role::Mapper };
    let now = Utc::now();
    let mut update = events::build_update(
        form_text(&form, "status").as_ref(),
        form_text(&form, "comment").as_ref(),
        &updater,
        vec![],
        now,
    )?;
    update.media = store_media(media, &form, MAX_UPDATE_MEDIA).await?;
    let status = update.status;
    let evidence = update.media.clone();

    let updated = match store.append_event_update(id, update).await {
        Ok(Some(value)) => value,
        Ok(None) => {
            discard(media, &evidence).await;
            return Err(ApiError::NotFound("Event not found".into()));
        },
        Err(value) => {
            discard(media, &evidence).await;
            return Err(value.into());
        },
    };
    info!("Server>>Client:\tEvent {} marked {} by {}", updated.id, status, mapper.email);

    let reward = config.config.event_update_reward;
    store.apply_credit(ledger::event_update_credit(new_id(), &mapper.id, &updated, status, reward, now)).await?;

    Ok(envelope(updated))
}

/// Deletes an event and every media file it references
pub(super) async fn remove_event(store: &dyn Store, media: &MediaStore, id: &str) -> ApiResult<Event> {
    let event = match store.delete_event(id).await? {
        Some(value) => value,
        None => return Err(ApiError::NotFound("Event not found".into())),
    };
    let keys = events::media_keys(&event);
    let removed = media.remove_all(&keys).await;
    if removed < keys.len() {
        warn!("Event {} deleted, {} of {} media files left behind", event.id, keys.len() - removed, keys.len());
    }
    Ok(event)
}

///
///Delete an event
///
///INPUT:  the original reporter or an admin, event id
///OUTPUT: 200 once the event and its media are gone
///
#[delete("/events/<id>")]
async fn delete_event(
    id: &str,
    actor: Actor,
    db: &State<StoreState>,
    media: &State<MediaStore>,
) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    let event = match store.get_event(id).await? {
        Some(value) => value,
        None => return Err(ApiError::NotFound("Event not found".into())),
    };
    if !can(&actor, Action::DeleteEvent, Resource::Event(&event)) {
        warn!("{} tried to delete event {} reported by {}", actor.email(), event.id, event.reporter_id);
        return Err(ApiError::Authorization("Only the reporter or an admin can delete this event".into()));
    }

    remove_event(store, media, id).await?;
    info!("Server>>Client:\tEvent {} deleted by {}", id, actor.email());
    Ok(message("Event deleted"))
}

pub fn event_routes() -> Vec<Route> {
    routes![
        list_events,
        active_events,
        recent_events,
        get_event,
        create_event,
        update_event,
        delete_event,
    ]
}
