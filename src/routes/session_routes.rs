use super::*;
use log::{debug, info, warn};
use ODM::models::*;
use ODM::odm_utils::new_id;
use ODM::store::Store;
use safety::access::{can, Action, Actor, Resource};
use safety::sessions::{self, CompletionClaim, LocationPing};

use chrono::Utc;
use rocket::serde::json::{json, Value};

#[derive(Deserialize, Debug)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct StartRequest {
    pub start_location: GeoPoint,
}

/// The session, checked to belong to the calling mapper
async fn owned_session(store: &dyn Store, actor: &Actor, id: &str) -> ApiResult<MappingSession> {
    let session = match store.get_session(id).await? {
        Some(value) => value,
        None => return Err(ApiError::NotFound("Session not found".into())),
    };
    if !can(actor, Action::ManageSession, Resource::Session(&session)) {
        return Err(ApiError::Authorization("This session belongs to another mapper".into()));
    }
    Ok(session)
}

fn not_active(session: &MappingSession) -> ApiError {
    ApiError::conflict(format!("Session is {}, not ACTIVE", session.status))
}

///
///Start mapping
///
///INPUT:  mapper, start location
///OUTPUT: 201 with the new session; 409 with `sessionId` if one is already active
///
#[post("/sessions/start", data = "<body>")]
async fn start_session(
    actor: Actor,
    body: Json<StartRequest>,
    db: &State<StoreState>,
) -> ApiResult<Created> {
    if !can(&actor, Action::StartSession, Resource::None) {
        return Err(ApiError::Authorization("Only mappers can start mapping sessions".into()));
    }
    let store = db.store.as_ref();
    let mapper = active_mapper(store, &actor).await?;
    if mapper.status == MapperStatus::Suspended {
        return Err(ApiError::Authorization("Suspended mappers cannot start sessions".into()));
    }

    let session = sessions::new_session(new_id(), &mapper.id, body.start_location, Utc::now())?;
    match store.start_session(session.clone()).await {
        Ok(()) => {},
        Err(value) => {
            warn!("{} could not start a session: {}", mapper.email, value);
            return Err(value.into());
        },
    }
    info!("Server>>Client:\tSession {} started for {}", session.id, mapper.email);
    Ok(created(session))
}

///
///Location ping for a running session
///
///INPUT:  owning mapper, session id, `{location, speed, timestamp}`
///OUTPUT: the session with the new route point and distance
///
#[post("/sessions/<id>/location", data = "<body>")]
async fn session_location(
    id: &str,
    actor: Actor,
    body: Json<LocationPing>,
    db: &State<StoreState>,
) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    active_mapper(store, &actor).await?;
    let session = owned_session(store, &actor, id).await?;
    if session.status != SessionStatus::Active {
        return Err(not_active(&session));
    }

    let (point, added) = sessions::route_step(&session, &body, Utc::now())?;
    let confidence = sessions::grid_confidence(session.route.len() + 1, session.distance + added);
    let updated = match store.record_route_point(id, point, added, confidence).await? {
        Some(value) => value,
        None => return Err(ApiError::conflict("Session is no longer ACTIVE")),
    };
    store.set_mapper_live(&updated.mapper_id, true, Some(body.location)).await?;

    debug!("Session {} at {:.5},{:.5}, {:.3} km", updated.id, body.location.lat, body.location.lon, updated.distance);
    Ok(envelope(updated))
}

///
///Complete a session
///
///INPUT:  owning mapper, session id, optional client claims
///OUTPUT: the completed session; the mapper's totals and ledger are credited from server values
///
#[post("/sessions/<id>/complete", data = "<body>")]
async fn complete_session(
    id: &str,
    actor: Actor,
    body: Option<Json<CompletionClaim>>,
    db: &State<StoreState>,
    config: &State<Config>,
) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    active_mapper(store, &actor).await?;
    let session = owned_session(store, &actor, id).await?;
    if session.status != SessionStatus::Active {
        return Err(not_active(&session));
    }

    let claim = body.map(|value| value.into_inner()).unwrap_or_default();
    let (close, credit) = sessions::complete(&session, &claim, config.config.tokens_per_km, new_id(), Utc::now());
    let finished = store.finish_session(id, close, credit).await?;

    info!(
        "Server>>Client:\tSession {} completed by {}: {:.2} km, {:.0} min, {:.2} tokens",
        finished.id, actor.email(), finished.distance, finished.duration, finished.tokens_earned
    );
    Ok(envelope(finished))
}

#[post("/sessions/<id>/cancel")]
async fn cancel_session(id: &str, actor: Actor, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    active_mapper(store, &actor).await?;
    let session = owned_session(store, &actor, id).await?;
    if session.status != SessionStatus::Active {
        return Err(not_active(&session));
    }

    let (close, credit) = sessions::cancel(&session, Utc::now());
    let finished = store.finish_session(id, close, credit).await?;
    info!("Server>>Client:\tSession {} cancelled by {}", finished.id, actor.email());
    Ok(envelope(finished))
}

/// The caller's running session, `data: null` if there is none
#[get("/sessions/active")]
async fn active_session(actor: Actor, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    let mapper = active_mapper(store, &actor).await?;
    match store.active_session(&mapper.id).await? {
        Some(session) => {
            let elapsed = sessions::elapsed_minutes(&session, Utc::now());
            Ok(Json(json!({ "success": true, "data": session, "elapsedMinutes": elapsed })))
        },
        None => Ok(Json(json!({ "success": true, "data": Value::Null }))),
    }
}

#[get("/sessions?<limit>&<offset>")]
async fn list_sessions(
    limit: Option<&str>,
    offset: Option<&str>,
    actor: Actor,
    db: &State<StoreState>,
    config: &State<Config>,
) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    let mapper = active_mapper(store, &actor).await?;
    let page = page(&config.config, limit, offset)?;
    let total = store.count_sessions(&mapper.id).await?;
    let items = store.list_sessions(&mapper.id, page).await?;
    Ok(paged(items, total, page))
}

#[get("/sessions/<id>")]
async fn get_session(id: &str, actor: Actor, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    active_mapper(store, &actor).await?;
    Ok(envelope(owned_session(store, &actor, id).await?))
}

pub fn session_routes() -> Vec<Route> {
    routes![
        start_session,
        session_location,
        complete_session,
        cancel_session,
        active_session,
        list_sessions,
        get_session,
    ]
}
