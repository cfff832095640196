//!
//! Documentation of the odm module.
//! Used to connect to the SafetyMapper database.
//!

use super::*;
use models::*;
use odm_utils::*;
use store::*;
use config::config::ConfyConfig;
use std::time::Duration;

use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};

// The async ODM for the MongoDB database connection and queries

use futures::stream::TryStreamExt;
use mongodb::options::{
    ClientOptions, FindOneAndUpdateOptions, FindOptions, IndexOptions, ListDatabasesOptions,
    ReturnDocument,
};
use log::{debug, error, info, warn};

const USERS: &str = "users";
const MAPPERS: &str = "mappers";
const EVENTS: &str = "events";
const SESSIONS: &str = "sessions";
const TRANSACTIONS: &str = "transactions";

///
/// Initiate DB connection
///
///
/// # Arguments
///
/// * `config` - A config object containing 'database' and 'database_uri'
///
///
/// # Log
///
/// * `info` - "Database Connected!", indicating success
/// * `error` - "Could not connect to MongoDB {error}", indicating error
///
pub async fn init(config: &ConfyConfig) -> mongodb::error::Result<MongoStore> {
    let (client, db) = connect(config).await?;
    let store = MongoStore { client, db };
    store.ensure_indexes().await?;
    Ok(store)
}

/// basic connection, isn't available out of the "odm.rs" module
async fn connect(config: &ConfyConfig) -> mongodb::error::Result<(Client, Database)> {
    let mut client_options = ClientOptions::parse(&config.database_uri).await?;
    client_options.connect_timeout = Some(Duration::from_secs(config.timeout));
    client_options.heartbeat_freq = Some(Duration::from_secs(config.timeout));
    client_options.server_selection_timeout = Some(Duration::from_secs(config.timeout));
    client_options.app_name = Some("safetymapper".to_string());
    let client = Client::with_options(client_options)?;

    match client.list_database_names(Document::new(), ListDatabasesOptions::builder().build()).await {
        Ok(_) => {
            info!("Database Connected!");
        },
        Err(value) => {
            error!("Could not connect to MongoDB {}", value);
            return Err(value);
        },
    }

    let database = client.database(&config.database);

    Ok((client, database))
}

/// `Store` backed by MongoDB
pub struct MongoStore {
    client: Client,
    db: Database,
}

fn after_update() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

fn newest_first(sort_field: &str, page: Option<Page>) -> FindOptions {
    let mut sort = Document::new();
    sort.insert(sort_field, -1);
    let mut options = FindOptions::builder()
        .sort(sort)
        .build();
    if let Some(page) = page {
        options.skip = Some(page.offset);
        options.limit = Some(page.limit as i64);
    }
    options
}

impl MongoStore {
    fn users(&self) -> Collection<UserDocument> {
        self.db.collection::<UserDocument>(USERS)
    }

    fn mappers(&self) -> Collection<MapperDocument> {
        self.db.collection::<MapperDocument>(MAPPERS)
    }

    fn events(&self) -> Collection<EventDocument> {
        self.db.collection::<EventDocument>(EVENTS)
    }

    fn sessions(&self) -> Collection<SessionDocument> {
        self.db.collection::<SessionDocument>(SESSIONS)
    }

    fn transactions(&self) -> Collection<TransactionDocument> {
        self.db.collection::<TransactionDocument>(TRANSACTIONS)
    }

    /// Creates the unique and lookup indexes the service relies on
    async fn ensure_indexes(&self) -> mongodb::error::Result<()> {
        let unique = IndexOptions::builder().unique(true).build();
        self.users()
            .create_index(IndexModel::builder().keys(doc! { "email": 1 }).options(unique.clone()).build(), None)
            .await?;
        self.mappers()
            .create_index(IndexModel::builder().keys(doc! { "email": 1 }).options(unique).build(), None)
            .await?;

        // At most one ACTIVE session per mapper
        let one_active = IndexOptions::builder()
            .unique(true)
            .partial_filter_expression(doc! { "status": SessionStatus::Active.as_str() })
            .name("one_active_session_per_mapper".to_string())
            .build();
        self.sessions()
            .create_index(IndexModel::builder().keys(doc! { "mapperId": 1 }).options(one_active).build(), None)
            .await?;

        let unique_reference = IndexOptions::builder()
            .unique(true)
            .partial_filter_expression(doc! { "reference": { "$exists": true } })
            .build();
        self.transactions()
            .create_index(IndexModel::builder().keys(doc! { "reference": 1 }).options(unique_reference).build(), None)
            .await?;
        self.transactions()
            .create_index(IndexModel::builder().keys(doc! { "mapperId": 1, "createdAt": -1 }).build(), None)
            .await?;
        self.events()
            .create_index(IndexModel::builder().keys(doc! { "createdAt": -1 }).build(), None)
            .await?;

        debug!("Indexes ensured");
        Ok(())
    }

    /// Runs `work` inside a multi-document transaction, commits on success
    async fn in_transaction<T, F>(&self, work: F) -> StoreResult<T>
    where
        F: for<'s> FnOnce(&'s Self, &'s mut ClientSession) -> futures::future::BoxFuture<'s, StoreResult<T>> + Send,
        T: Send,
    {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        match work(self, &mut session).await {
            Ok(value) => {
                session.commit_transaction().await?;
                Ok(value)
            },
            Err(value) => {
                if let Err(abort) = session.abort_transaction().await {
                    warn!("Could not abort transaction {}", abort);
                }
                Err(value)
            },
        }
    }

    /// Records a credit with the given client session
    async fn credit_with(&self, credit: Credit, session: &mut ClientSession) -> StoreResult<()> {
        if let Some(transaction) = credit.transaction {
            match self.transactions()
                .insert_one_with_session(transaction_to_doc(transaction), None, session)
                .await
            {
                Ok(_) => {},
                Err(value) if is_duplicate_key(&value) => {
                    return Err(StoreError::conflict("Transaction reference already exists"));
                },
                Err(value) => return Err(value.into()),
            }
        }

        let updated = self.mappers()
            .update_one_with_session(
                doc! { "_id": credit.mapper_id.as_str() },
                doc! { "$inc": totals_inc_doc(&credit.delta) },
                None,
                session,
            )
            .await?;
        if updated.matched_count == 0 {
            return Err(StoreError::NotFound(format!("mapper {}", credit.mapper_id)));
        }
        Ok(())
    }

    async fn sum_amounts(&self, filter: Document) -> StoreResult<f64> {
        let pipeline = vec![
            doc! { "$match": filter },
            doc! { "$group": { "_id": Bson::Null, "sum": { "$sum": "$amount" } } },
        ];
        let mut cursor = self.db
            .collection::<Document>(TRANSACTIONS)
            .aggregate(pipeline, None)
            .await?;
        let sum = match cursor.try_next().await? {
            Some(value) => value.get_f64("sum").unwrap_or(0.0),
            None => 0.0,
        };
        Ok(sum)
    }

    async fn sum_field(&self, collection: &str, field: &str) -> StoreResult<f64> {
        let pipeline = vec![
            doc! { "$group": { "_id": Bson::Null, "sum": { "$sum": format!("${}", field) } } },
        ];
        let mut cursor = self.db
            .collection::<Document>(collection)
            .aggregate(pipeline, None)
            .await?;
        let sum = match cursor.try_next().await? {
            Some(value) => value.get_f64("sum").unwrap_or(0.0),
            None => 0.0,
        };
        Ok(sum)
    }
}

#[rocket::async_trait]
impl Store for MongoStore {
    //
    // USER ACTIONS
    //

    async fn insert_user(&self, user: User) -> StoreResult<()> {
        match self.users().insert_one(user_to_doc(user), None).await {
            Ok(_) => Ok(()),
            Err(value) if is_duplicate_key(&value) => Err(StoreError::conflict("Email already registered")),
            Err(value) => Err(value.into()),
        }
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        let user = self.users().find_one(doc! { "_id": id }, None).await?;
        Ok(user.map(doc_to_user))
    }

    async fn deactivate_user(&self, id: &str) -> StoreResult<bool> {
        let result = self.users()
            .update_one(doc! { "_id": id }, doc! { "$set": { "isActive": false } }, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    //
    // MAPPER ACTIONS
    //

    async fn insert_mapper(&self, mapper: Mapper) -> StoreResult<()> {
        match self.mappers().insert_one(mapper_to_doc(mapper), None).await {
            Ok(_) => Ok(()),
            Err(value) if is_duplicate_key(&value) => Err(StoreError::conflict("Email already registered")),
            Err(value) => Err(value.into()),
        }
    }

    async fn get_mapper(&self, id: &str) -> StoreResult<Option<Mapper>> {
        let mapper = self.mappers().find_one(doc! { "_id": id }, None).await?;
        Ok(mapper.map(doc_to_mapper))
    }

    async fn list_mappers(&self, filter: &MapperFilter, page: Option<Page>) -> StoreResult<Vec<Mapper>> {
        let mut cursor = self.mappers()
            .find(mapper_filter_doc(filter), newest_first("createdAt", page))
            .await?;

        let mut mappers = vec![];
        while let Some(result) = cursor.try_next().await? {
            mappers.push(doc_to_mapper(result));
        }
        Ok(mappers)
    }

    async fn count_mappers(&self, filter: &MapperFilter) -> StoreResult<u64> {
        Ok(self.mappers().count_documents(mapper_filter_doc(filter), None).await?)
    }

    async fn update_mapper_profile(&self, id: &str, changes: ProfileChanges) -> StoreResult<Option<Mapper>> {
        let set = profile_set_doc(&changes);
        if set.is_empty() {
            return self.get_mapper(id).await;
        }
        let mapper = self.mappers()
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set }, after_update())
            .await?;
        Ok(mapper.map(doc_to_mapper))
    }

    async fn set_mapper_status(&self, id: &str, status: MapperStatus) -> StoreResult<Option<Mapper>> {
        let mapper = self.mappers()
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": { "status": status.as_str() } },
                after_update(),
            )
            .await?;
        Ok(mapper.map(doc_to_mapper))
    }

    async fn set_mapper_live(&self, id: &str, is_live: bool, location: Option<GeoPoint>) -> StoreResult<Option<Mapper>> {
        let mut set = doc! {
            "isLive": is_live,
            "lastActive": bson::DateTime::now(),
        };
        if let Some(location) = location {
            set.insert("currentLocation", point_bson(&location));
        }
        let mapper = self.mappers()
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set }, after_update())
            .await?;
        Ok(mapper.map(doc_to_mapper))
    }

    async fn deactivate_mapper(&self, id: &str) -> StoreResult<bool> {
        let result = self.mappers()
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "isActive": false, "isLive": false } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    //
    // EVENT ACTIONS
    //

    async fn insert_event(&self, event: Event) -> StoreResult<()> {
        self.events().insert_one(event_to_doc(event), None).await?;
        Ok(())
    }

    async fn get_event(&self, id: &str) -> StoreResult<Option<Event>> {
        let event = self.events().find_one(doc! { "_id": id }, None).await?;
        Ok(event.map(doc_to_event))
    }

    async fn list_events(&self, filter: &EventFilter, page: Option<Page>) -> StoreResult<Vec<Event>> {
        let mut cursor = self.events()
            .find(event_filter_doc(filter), newest_first("createdAt", page))
            .await?;

        let mut events = vec![];
        while let Some(result) = cursor.try_next().await? {
            events.push(doc_to_event(result));
        }
        Ok(events)
    }

    async fn count_events(&self, filter: &EventFilter) -> StoreResult<u64> {
        Ok(self.events().count_documents(event_filter_doc(filter), None).await?)
    }

    async fn record_event_view(&self, id: &str) -> StoreResult<Option<Event>> {
        let event = self.events()
            .find_one_and_update(doc! { "_id": id }, doc! { "$inc": { "viewCount": 1_i64 } }, after_update())
            .await?;
        Ok(event.map(doc_to_event))
    }

    async fn append_event_update(&self, id: &str, update: EventUpdate) -> StoreResult<Option<Event>> {
        let status = update.status.as_str();
        let update = bson::to_bson(&event_update_to_doc(update))?;
        let event = self.events()
            .find_one_and_update(
                doc! { "_id": id, "status": { "$ne": EventStatus::Closed.as_str() } },
                doc! {
                    "$push": { "updates": update },
                    "$set": { "status": status, "updatedAt": bson::DateTime::now() },
                },
                after_update(),
            )
            .await?;
        match event {
            Some(value) => Ok(Some(doc_to_event(value))),
            None => match self.events().count_documents(doc! { "_id": id }, None).await? {
                0 => Ok(None),
                _ => Err(StoreError::conflict("Event is CLOSED")),
            },
        }
    }

    async fn set_event_status(&self, id: &str, status: EventStatus) -> StoreResult<Option<Event>> {
        let event = self.events()
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": { "status": status.as_str(), "updatedAt": bson::DateTime::now() } },
                after_update(),
            )
            .await?;
        Ok(event.map(doc_to_event))
    }

    async fn delete_event(&self, id: &str) -> StoreResult<Option<Event>> {
        let event = self.events().find_one_and_delete(doc! { "_id": id }, None).await?;
        Ok(event.map(doc_to_event))
    }

    //
    // SESSION ACTIONS
    //

    async fn start_session(&self, session: MappingSession) -> StoreResult<()> {
        let mapper_id = session.mapper_id.clone();
        let location = session.start_location;
        let document = session_to_doc(session);

        let owner = mapper_id.clone();
        let started = self.in_transaction(|store, client_session| Box::pin(async move {
            match store.sessions().insert_one_with_session(document, None, client_session).await {
                Ok(_) => {},
                Err(value) if is_duplicate_key(&value) => {
                    return Err(StoreError::conflict("An active session already exists"));
                },
                Err(value) => return Err(value.into()),
            }
            store.mappers()
                .update_one_with_session(
                    doc! { "_id": owner.as_str() },
                    doc! { "$set": {
                        "isLive": true,
                        "currentLocation": point_bson(&location),
                        "lastActive": bson::DateTime::now(),
                    } },
                    None,
                    client_session,
                )
                .await?;
            Ok(())
        })).await;

        match started {
            Err(StoreError::Conflict { message, .. }) => {
                // Report which session is in the way
                let existing = self.active_session(&mapper_id).await?;
                Err(StoreError::Conflict { message, existing_id: existing.map(|value| value.id) })
            },
            other => other,
        }
    }

    async fn get_session(&self, id: &str) -> StoreResult<Option<MappingSession>> {
        let session = self.sessions().find_one(doc! { "_id": id }, None).await?;
        Ok(session.map(doc_to_session))
    }

    async fn active_session(&self, mapper_id: &str) -> StoreResult<Option<MappingSession>> {
        let session = self.sessions()
            .find_one(doc! { "mapperId": mapper_id, "status": SessionStatus::Active.as_str() }, None)
            .await?;
        Ok(session.map(doc_to_session))
    }

    async fn list_sessions(&self, mapper_id: &str, page: Page) -> StoreResult<Vec<MappingSession>> {
        let mut cursor = self.sessions()
            .find(doc! { "mapperId": mapper_id }, newest_first("startTime", Some(page)))
            .await?;

        let mut sessions = vec![];
        while let Some(result) = cursor.try_next().await? {
            sessions.push(doc_to_session(result));
        }
        Ok(sessions)
    }

    async fn count_sessions(&self, mapper_id: &str) -> StoreResult<u64> {
        Ok(self.sessions().count_documents(doc! { "mapperId": mapper_id }, None).await?)
    }

    async fn record_route_point(
        &self,
        id: &str,
        point: RoutePoint,
        added_distance: f64,
        grid_confidence: f64,
    ) -> StoreResult<Option<MappingSession>> {
        let location = point.point();
        let point = bson::to_bson(&route_point_to_doc(point))?;
        let session = self.sessions()
            .find_one_and_update(
                doc! { "_id": id, "status": SessionStatus::Active.as_str() },
                doc! {
                    "$push": { "route": point },
                    "$inc": { "distance": added_distance },
                    "$set": {
                        "currentLocation": point_bson(&location),
                        "gridConfidence": grid_confidence,
                    },
                },
                after_update(),
            )
            .await?;
        Ok(session.map(doc_to_session))
    }

    async fn finish_session(
        &self,
        id: &str,
        close: SessionClose,
        credit: Credit,
    ) -> StoreResult<MappingSession> {
        let id = id.to_string();
        self.in_transaction(|store, client_session| Box::pin(async move {
            let session = store.sessions()
                .find_one_and_update_with_session(
                    doc! { "_id": id.as_str(), "status": SessionStatus::Active.as_str() },
                    doc! { "$set": {
                        "status": close.status.as_str(),
                        "endTime": to_bson_date(&close.end_time),
                        "distance": close.distance,
                        "duration": close.duration,
                        "tokensEarned": close.tokens_earned,
                    } },
                    after_update(),
                    client_session,
                )
                .await?;
            let session = match session {
                Some(value) => value,
                None => return Err(StoreError::conflict("Session is not active")),
            };

            store.mappers()
                .update_one_with_session(
                    doc! { "_id": credit.mapper_id.as_str() },
                    doc! { "$set": { "isLive": false, "lastActive": bson::DateTime::now() } },
                    None,
                    client_session,
                )
                .await?;
            store.credit_with(credit, client_session).await?;

            Ok(doc_to_session(session))
        })).await
    }

    //
    // LEDGER ACTIONS
    //

    async fn apply_credit(&self, credit: Credit) -> StoreResult<()> {
        self.in_transaction(|store, client_session| Box::pin(async move {
            store.credit_with(credit, client_session).await
        })).await
    }

    async fn request_withdrawal(&self, withdrawal: Transaction) -> StoreResult<()> {
        self.in_transaction(|store, client_session| Box::pin(async move {
            let bank = match &withdrawal.bank_details {
                Some(value) => bson::to_bson(value)?,
                None => Bson::Null,
            };
            // writing the mapper first makes concurrent withdrawals of one mapper conflict
            let mapper = store.mappers()
                .find_one_and_update_with_session(
                    doc! { "_id": withdrawal.mapper_id.as_str() },
                    doc! { "$set": { "bankDetails": bank } },
                    after_update(),
                    client_session,
                )
                .await?;
            let mapper = match mapper {
                Some(value) => doc_to_mapper(value),
                None => return Err(StoreError::NotFound(format!("mapper {}", withdrawal.mapper_id))),
            };

            let pipeline = vec![
                doc! { "$match": {
                    "mapperId": withdrawal.mapper_id.as_str(),
                    "type": TransactionType::Withdrawal.as_str(),
                    "status": { "$in": [TransactionStatus::Pending.as_str(), TransactionStatus::Completed.as_str()] },
                } },
                doc! { "$group": { "_id": Bson::Null, "sum": { "$sum": { "$abs": "$amount" } } } },
            ];
            let mut cursor = store.db
                .collection::<Document>(TRANSACTIONS)
                .aggregate_with_session(pipeline, None, client_session)
                .await?;
            let withdrawn = match cursor.next(client_session).await.transpose()? {
                Some(value) => value.get_f64("sum").unwrap_or(0.0),
                None => 0.0,
            };

            let available = mapper.total_earnings - withdrawn;
            if withdrawal.amount.abs() > available {
                return Err(StoreError::Rejected(format!("Insufficient balance: {:.2} available", available.max(0.0))));
            }

            match store.transactions()
                .insert_one_with_session(transaction_to_doc(withdrawal), None, client_session)
                .await
            {
                Ok(_) => Ok(()),
                Err(value) if is_duplicate_key(&value) => Err(StoreError::conflict("Transaction reference already exists")),
                Err(value) => Err(value.into()),
            }
        })).await
    }

    async fn get_transaction(&self, id: &str) -> StoreResult<Option<Transaction>> {
        let transaction = self.transactions().find_one(doc! { "_id": id }, None).await?;
        Ok(transaction.map(doc_to_transaction))
    }

    async fn list_transactions(&self, filter: &TransactionFilter, page: Option<Page>) -> StoreResult<Vec<Transaction>> {
        let mut cursor = self.transactions()
            .find(transaction_filter_doc(filter), newest_first("createdAt", page))
            .await?;

        let mut transactions = vec![];
        while let Some(result) = cursor.try_next().await? {
            transactions.push(doc_to_transaction(result));
        }
        Ok(transactions)
    }

    async fn count_transactions(&self, filter: &TransactionFilter) -> StoreResult<u64> {
        Ok(self.transactions().count_documents(transaction_filter_doc(filter), None).await?)
    }

    async fn settle_transaction(&self, id: &str, status: TransactionStatus) -> StoreResult<Option<Transaction>> {
        let settled = self.transactions()
            .find_one_and_update(
                doc! { "_id": id, "status": TransactionStatus::Pending.as_str() },
                doc! { "$set": { "status": status.as_str() } },
                after_update(),
            )
            .await?;
        if let Some(value) = settled {
            return Ok(Some(doc_to_transaction(value)));
        }

        match self.get_transaction(id).await? {
            None => Ok(None),
            Some(_) => Err(StoreError::conflict("Transaction is already settled")),
        }
    }

    async fn dashboard_stats(&self) -> StoreResult<DashboardStats> {
        let mappers = self.mappers();
        let events = self.events();

        let pending_withdrawals = self.sum_amounts(doc! {
            "type": TransactionType::Withdrawal.as_str(),
            "status": TransactionStatus::Pending.as_str(),
        }).await?;

        Ok(DashboardStats {
            total_mappers:      mappers.count_documents(doc! {}, None).await?,
            live_mappers:       mappers.count_documents(doc! { "isLive": true }, None).await?,
            active_mappers:     mappers.count_documents(doc! { "status": MapperStatus::Active.as_str() }, None).await?,
            suspended_mappers:  mappers.count_documents(doc! { "status": MapperStatus::Suspended.as_str() }, None).await?,
            pending_mappers:    mappers.count_documents(doc! { "status": MapperStatus::Pending.as_str() }, None).await?,
            total_events:       events.count_documents(doc! {}, None).await?,
            active_events:      events.count_documents(doc! { "status": EventStatus::Active.as_str() }, None).await?,
            cleared_events:     events.count_documents(doc! { "status": EventStatus::Cleared.as_str() }, None).await?,
            closed_events:      events.count_documents(doc! { "status": EventStatus::Closed.as_str() }, None).await?,
            completed_sessions: self.sessions()
                .count_documents(doc! { "status": SessionStatus::Completed.as_str() }, None)
                .await?,
            total_earnings:     self.sum_field(MAPPERS, "totalEarnings").await?,
            pending_withdrawals: pending_withdrawals.abs(),
        })
    }
}
