use super::*;
use log::info;
use ODM::models::*;
use ODM::odm_utils::new_id;
use ODM::store::{MapperFilter, ProfileChanges, TransactionFilter};
use safety::access::{can, Action, Actor, Resource};
use safety::ledger::{self, WithdrawalRequest};

use chrono::{Local, Utc};
use rocket::FromForm;
use rocket::serde::json::{json, Value};

const MAX_NAME_CHARS: usize = 100;

#[derive(Deserialize, Debug)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct LocationUpdate {
    pub location: GeoPoint,
    pub is_live: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub vehicle_type: Option<String>,
}

impl ProfileUpdate {
    fn into_changes(self) -> ApiResult<ProfileChanges> {
        let name = match self.name.map(|value| value.trim().to_string()) {
            Some(value) if value.is_empty() => return Err(ApiError::Validation("name cannot be empty".into())),
            Some(value) if value.chars().count() > MAX_NAME_CHARS => {
                return Err(ApiError::Validation(format!("name must be at most {} characters", MAX_NAME_CHARS)))
            },
            other => other,
        };
        Ok(ProfileChanges {
            name,
            phone: self.phone.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()),
            vehicle_type: parse_enum("vehicleType", self.vehicle_type.as_deref())?,
        })
    }
}

//
// Account
//

///
///Caller identity and stored profile
///
#[get("/auth/me")]
async fn me(actor: Actor, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    let profile = match &actor {
        Actor::Mapper { id, .. } => json!(store.get_mapper(id).await?),
        Actor::User { id, .. } | Actor::Admin { id, .. } => json!(store.get_user(id).await?),
    };
    Ok(envelope(json!({
        "id": actor.id(),
        "email": actor.email(),
        "role": actor.role(),
        "profile": profile,
    })))
}

/// Soft delete of the caller's account
#[delete("/auth/account")]
async fn delete_account(actor: Actor, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    let found = match &actor {
        Actor::Mapper { id, .. } => {
            if let Some(session) = store.active_session(id).await? {
                return Err(ApiError::Conflict {
                    message: "Finish the active session before deleting the account".into(),
                    session_id: Some(session.id),
                });
            }
            store.deactivate_mapper(id).await?
        },
        Actor::User { id, .. } | Actor::Admin { id, .. } => store.deactivate_user(id).await?,
    };
    if !found {
        return Err(ApiError::NotFound("Account not found".into()));
    }
    info!("Server>>Client:\tAccount {} deactivated", actor.email());
    Ok(message("Account deactivated"))
}

//
// Live map
//

///
///Live mappers, optionally around a point
///
///INPUT:  optional lat/lon/radius circle, pagination
///OUTPUT: the public projection of every live, active mapper with a known location
///
#[get("/mappers/live?<lat>&<lon>&<radius>&<limit>&<offset>")]
async fn live_mappers(
    lat: Option<&str>,
    lon: Option<&str>,
    radius: Option<&str>,
    limit: Option<&str>,
    offset: Option<&str>,
    db: &State<StoreState>,
    config: &State<Config>,
) -> ApiResult<Json<Value>> {
    let fence = geofence(lat, lon, radius)?;
    let page = page(&config.config, limit, offset)?;
    let filter = MapperFilter {
        live_only: true,
        active_only: true,
        within: fence.map(|value| value.bounding_box()),
        ..Default::default()
    };

    let mappers = db.store.list_mappers(&filter, None).await?;
    let mappers = match fence {
        Some(fence) => fence.filter(mappers, |mapper| mapper.current_location),
        None => mappers,
    };
    let live: Vec<LiveMapper> = mappers
        .into_iter()
        .filter_map(|mapper| {
            mapper.current_location.map(|location| LiveMapper {
                id: mapper.id,
                name: mapper.name,
                vehicle_type: mapper.vehicle_type,
                current_location: location,
            })
        })
        .collect();

    let (items, total) = slice_page(live, page);
    Ok(paged(items, total, page))
}

/// Location ping outside of a mapping session
#[put("/mappers/location", data = "<body>")]
async fn update_location(actor: Actor, body: Json<LocationUpdate>, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    if !can(&actor, Action::ShareLocation, Resource::None) {
        return Err(ApiError::Authorization("Only mappers share their location".into()));
    }
    let store = db.store.as_ref();
    let mapper = active_mapper(store, &actor).await?;
    if !body.location.is_valid() {
        return Err(ApiError::Validation("location is out of range".into()));
    }

    let is_live = body.is_live.unwrap_or(true);
    match store.set_mapper_live(&mapper.id, is_live, Some(body.location)).await? {
        Some(updated) => Ok(envelope(json!({
            "isLive": updated.is_live,
            "currentLocation": updated.current_location,
            "lastActive": updated.last_active,
        }))),
        None => Err(ApiError::NotFound("Mapper not found".into())),
    }
}

//
// Profile
//

#[get("/mappers/me")]
async fn get_profile(actor: Actor, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    Ok(envelope(active_mapper(db.store.as_ref(), &actor).await?))
}

#[put("/mappers/me", data = "<body>")]
async fn update_profile(actor: Actor, body: Json<ProfileUpdate>, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    let mapper = active_mapper(store, &actor).await?;
    let changes = body.into_inner().into_changes()?;

    match store.update_mapper_profile(&mapper.id, changes).await? {
        Some(updated) => {
            info!("Server>>Client:\tProfile of {} updated", updated.email);
            Ok(envelope(updated))
        },
        None => Err(ApiError::NotFound("Mapper not found".into())),
    }
}

//
// Ledger
//

fn ledger_of(mapper_id: &str) -> TransactionFilter {
    TransactionFilter { mapper_id: Some(mapper_id.to_string()), ..Default::default() }
}

///
///Earnings overview
///
///OUTPUT: `{daily, weekly, total}` where total carries the withdrawable balance
///
#[get("/mappers/earnings")]
async fn earnings(actor: Actor, db: &State<StoreState>) -> ApiResult<Json<Value>> {
    if !can(&actor, Action::ViewEarnings, Resource::None) {
        return Err(ApiError::forbidden());
    }
    let store = db.store.as_ref();
    let mapper = active_mapper(store, &actor).await?;
    let transactions = store.list_transactions(&ledger_of(&mapper.id), None).await?;
    Ok(envelope(ledger::summarize(&mapper, &transactions, Local::now())))
}

///
///Withdrawal request
///
///INPUT:  mapper, `{amount, bankDetails}`
///OUTPUT: 201 with the PENDING withdrawal; the bank details are saved on the profile
///
#[post("/mappers/withdraw", data = "<body>")]
async fn withdraw(actor: Actor, body: Json<WithdrawalRequest>, db: &State<StoreState>) -> ApiResult<Created> {
    if !can(&actor, Action::RequestWithdrawal, Resource::None) {
        return Err(ApiError::forbidden());
    }
    let store = db.store.as_ref();
    let mapper = active_mapper(store, &actor).await?;
    let transactions = store.list_transactions(&ledger_of(&mapper.id), None).await?;
    let available = ledger::balance(&mapper, &transactions).balance;

    let transaction = ledger::withdrawal(new_id(), &mapper, &body, available, Utc::now())?;
    store.request_withdrawal(transaction.clone()).await?;

    info!(
        "Server>>Client:\tWithdrawal {} of {:.2} requested by {}",
        transaction.reference.as_deref().unwrap_or("-"), body.amount, mapper.email
    );
    Ok(created(transaction))
}

#[derive(FromForm, Debug)]
pub struct TransactionQuery<'r> {
    #[field(name = "type")]
    pub kind: Option<&'r str>,
    pub limit: Option<&'r str>,
    pub offset: Option<&'r str>,
}

#[get("/mappers/transactions?<query..>")]
async fn transactions(
    query: TransactionQuery<'_>,
    actor: Actor,
    db: &State<StoreState>,
    config: &State<Config>,
) -> ApiResult<Json<Value>> {
    let store = db.store.as_ref();
    let mapper = active_mapper(store, &actor).await?;
    let page = page(&config.config, query.limit, query.offset)?;
    let filter = TransactionFilter {
        kind: parse_enum("type", query.kind)?,
        ..ledger_of(&mapper.id)
    };
    let total = store.count_transactions(&filter).await?;
    let items = store.list_transactions(&filter, Some(page)).await?;
    Ok(paged(items, total, page))
}

pub fn mapper_routes() -> Vec<Route> {
    routes![
        me,
        delete_account,
        live_mappers,
        update_location,
        get_profile,
        update_profile,
        earnings,
        withdraw,
        transactions,
    ]
}
