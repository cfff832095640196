use super::*;
use log::{info, warn};
use ODM::models::*;
use ODM::store::{EventFilter, MapperFilter};
use safety::access::{can, Action, Actor, Resource};
use safety::ledger;
use safety::media::MediaStore;

use rocket::serde::json::Value;

#[derive(Deserialize, Debug)]
#[serde(crate = "rocket::serde")]
pub struct StatusChange {
    pub status: String,
}

fn require(actor: &Actor, action: Action) -> ApiResult<()> {
    if can(actor, action, Resource::None) {
        return Ok(());
    }
    warn!("{} was refused admin action {:?}", actor.email(), action);
    Err(ApiError::Authorization("Admin access required".into()))
}

fn required_status<T>(body: &StatusChange) -> ApiResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    match parse_enum::<T>("status", Some(body.status.as_str()))? {
        Some(value) => Ok(value),
        None => Err(ApiError::Validation("status is required".into())),
    }
}

///
///Dashboard aggregates
///
#[get("/admin/stats")]
async fn stats(actor: Actor, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    require(&actor, Action::ViewDashboard)?;
    Ok(envelope(db.store.dashboard_stats().await?))
}

#[get("/admin/mappers?<status>&<limit>&<offset>")]
async fn list_mappers(
    status: Option<&str>,
    limit: Option<&str>,
    offset: Option<&str>,
    actor: Actor,
    db: &State<StoreState>,
    config: &State<Config>,
) -> ApiResult<Json<Value>> {
    require(&actor, Action::ModerateMappers)?;
    let filter = MapperFilter { status: parse_enum("status", status)?, ..Default::default() };
    let page = page(&config.config, limit, offset)?;
    let total = db.store.count_mappers(&filter).await?;
    let items = db.store.list_mappers(&filter, Some(page)).await?;
    Ok(paged(items, total, page))
}

///
///Moderate a mapper
///
///INPUT:  admin, mapper id, `{status}` one of ACTIVE/INACTIVE/SUSPENDED/PENDING
///OUTPUT: the updated mapper
///
#[patch("/admin/mappers/<id>/status", data = "<body>")]
async fn set_mapper_status(
    id: &str,
    actor: Actor,
    body: Json<StatusChange>,
    db: &State<StoreState>,
) -> ApiResult<Json<Value>> {
    require(&actor, Action::ModerateMappers)?;
    let status: MapperStatus = required_status(&body)?;
    match db.store.set_mapper_status(id, status).await? {
        Some(mapper) => {
            info!("Server>>Client:\tApproving status {} for mapper {} by {}", status, mapper.email, actor.email());
            Ok(envelope(mapper))
        },
        None => Err(ApiError::NotFound("Mapper not found".into())),
    }
}

#[get("/admin/events?<status>&<category>&<limit>&<offset>")]
async fn list_events(
    status: Option<&str>,
    category: Option<&str>,
    limit: Option<&str>,
    offset: Option<&str>,
    actor: Actor,
    db: &State<StoreState>,
    config: &State<Config>,
) -> ApiResult<Json<Value>> {
    require(&actor, Action::OverrideEventStatus)?;
    let filter = EventFilter {
        status: parse_enum("status", status)?,
        category: parse_enum("category", category)?,
        ..Default::default()
    };
    let page = page(&config.config, limit, offset)?;
    super::event_routes::events_page(db.store.as_ref(), filter, None, page).await
}

///
///Override an event's status, CLOSED included; no update log entry, no reward
///
#[patch("/admin/events/<id>/status", data = "<body>")]
async fn set_event_status(
    id: &str,
    actor: Actor,
    body: Json<StatusChange>,
    db: &State<StoreState>,
) -> ApiResult<Json<Value>> {
    require(&actor, Action::OverrideEventStatus)?;
    let status: EventStatus = required_status(&body)?;
    match db.store.set_event_status(id, status).await? {
        Some(event) => {
            info!("Server>>Client:\tEvent {} set to {} by {}", event.id, status, actor.email());
            Ok(envelope(event))
        },
        None => Err(ApiError::NotFound("Event not found".into())),
    }
}

#[delete("/admin/events/<id>")]
async fn delete_event(
    id: &str,
    actor: Actor,
    db: &State<StoreState>,
    media: &State<MediaStore>,
) -> ApiResult<Json<Value>> {
    require(&actor, Action::DeleteEvent)?;
    super::event_routes::remove_event(db.store.as_ref(), media, id).await?;
    info!("Server>>Client:\tEvent {} removed by admin {}", id, actor.email());
    Ok(message("Event deleted"))
}

///
///Settle a pending transaction
///
///INPUT:  admin, transaction id, `{status}` COMPLETED or FAILED
///OUTPUT: the settled transaction; 409 if it was not PENDING
///
#[patch("/admin/transactions/<id>/status", data = "<body>")]
async fn settle_transaction(
    id: &str,
    actor: Actor,
    body: Json<StatusChange>,
    db: &State<StoreState>,
) -> ApiResult<Json<Value>> {
    require(&actor, Action::SettleTransactions)?;
    let status: TransactionStatus = required_status(&body)?;
    let current = match db.store.get_transaction(id).await? {
        Some(value) => value,
        None => return Err(ApiError::NotFound("Transaction not found".into())),
    };
    if !ledger::can_settle(current.status, status) {
        return Err(ApiError::conflict(format!("Cannot move a {} transaction to {}", current.status, status)));
    }

    match db.store.settle_transaction(id, status).await? {
        Some(transaction) => {
            info!("Server>>Client:\tTransaction {} settled as {} by {}", transaction.id, status, actor.email());
            Ok(envelope(transaction))
        },
        None => Err(ApiError::NotFound("Transaction not found".into())),
    }
}

pub fn admin_routes() -> Vec<Route> {
    routes![
        stats,
        list_mappers,
        set_mapper_status,
        list_events,
        set_event_status,
        delete_event,
        settle_transaction,
    ]
}
