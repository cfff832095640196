//!
//! Documentation of the Store module.
//! The repository seam between the handlers and the database.
//!
//! Every multi-document write the service relies on (token awards, session
//! start and finish, withdrawals) is a single `Store` call so the backend can make it
//! atomic.
//!

use super::models::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule was violated; carries the id of the existing record when known
    #[error("conflict: {message}")]
    Conflict { message: String, existing_id: Option<String> },

    #[error("record not found: {0}")]
    NotFound(String),

    /// The write breaks a business rule checked against stored state
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("database error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(message: impl Into<String>) -> Self {
        StoreError::Conflict { message: message.into(), existing_id: None }
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Offset pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

/// Coarse lat/lon rectangle used to narrow candidates before an exact radius check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub category: Option<EventCategory>,
    pub severity: Option<Severity>,
    pub status: Option<EventStatus>,
    pub created_since: Option<Timestamp>,
    pub within: Option<BoundingBox>,
}

#[derive(Debug, Clone, Default)]
pub struct MapperFilter {
    pub status: Option<MapperStatus>,
    pub live_only: bool,
    pub active_only: bool,
    pub within: Option<BoundingBox>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub mapper_id: Option<String>,
    pub kind: Option<TransactionType>,
    pub created_since: Option<Timestamp>,
}

/// Increments applied to a mapper's cumulative totals
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TotalsDelta {
    pub earnings: f64,
    pub distance: f64,
    pub duration: f64,
    pub events: u64,
}

/// A ledger entry together with the totals it moves, written as one unit
#[derive(Debug, Clone)]
pub struct Credit {
    pub mapper_id: String,
    pub delta: TotalsDelta,
    pub transaction: Option<Transaction>,
}

/// Terminal values written onto a session
#[derive(Debug, Clone)]
pub struct SessionClose {
    pub status: SessionStatus,
    pub end_time: Timestamp,
    pub distance: f64,
    pub duration: f64,
    pub tokens_earned: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub vehicle_type: Option<VehicleType>,
}

/// Aggregates for the admin dashboard
#[derive(Debug, Clone, Default, PartialEq, rocket::serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_mappers: u64,
    pub live_mappers: u64,
    pub active_mappers: u64,
    pub suspended_mappers: u64,
    pub pending_mappers: u64,
    pub total_events: u64,
    pub active_events: u64,
    pub cleared_events: u64,
    pub closed_events: u64,
    pub completed_sessions: u64,
    pub total_earnings: f64,
    pub pending_withdrawals: f64,
}

#[rocket::async_trait]
pub trait Store: Send + Sync {
    //
    // USER ACTIONS
    //
    async fn insert_user(&self, user: User) -> StoreResult<()>;
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>>;
    async fn deactivate_user(&self, id: &str) -> StoreResult<bool>;

    //
    // MAPPER ACTIONS
    //
    async fn insert_mapper(&self, mapper: Mapper) -> StoreResult<()>;
    async fn get_mapper(&self, id: &str) -> StoreResult<Option<Mapper>>;
    /// Newest first; `page == None` returns every match
    async fn list_mappers(&self, filter: &MapperFilter, page: Option<Page>) -> StoreResult<Vec<Mapper>>;
    async fn count_mappers(&self, filter: &MapperFilter) -> StoreResult<u64>;
    async fn update_mapper_profile(&self, id: &str, changes: ProfileChanges) -> StoreResult<Option<Mapper>>;
    async fn set_mapper_status(&self, id: &str, status: MapperStatus) -> StoreResult<Option<Mapper>>;
    /// Sets `isLive` and, when given, `currentLocation`; always touches `lastActive`
    async fn set_mapper_live(&self, id: &str, is_live: bool, location: Option<GeoPoint>) -> StoreResult<Option<Mapper>>;
    /// Soft delete, mappers are never removed
    async fn deactivate_mapper(&self, id: &str) -> StoreResult<bool>;

    //
    // EVENT ACTIONS
    //
    async fn insert_event(&self, event: Event) -> StoreResult<()>;
    async fn get_event(&self, id: &str) -> StoreResult<Option<Event>>;
    /// Newest first; `page == None` returns every match
    async fn list_events(&self, filter: &EventFilter, page: Option<Page>) -> StoreResult<Vec<Event>>;
    async fn count_events(&self, filter: &EventFilter) -> StoreResult<u64>;
    /// Atomic increment, returns the event after the increment
    async fn record_event_view(&self, id: &str) -> StoreResult<Option<Event>>;
    /// Appends to the update log and mirrors the status in one write.
    /// `Conflict` if the event is CLOSED.
    async fn append_event_update(&self, id: &str, update: EventUpdate) -> StoreResult<Option<Event>>;
    async fn set_event_status(&self, id: &str, status: EventStatus) -> StoreResult<Option<Event>>;
    /// Returns the removed event so its media can be cleaned up
    async fn delete_event(&self, id: &str) -> StoreResult<Option<Event>>;

    //
    // SESSION ACTIONS
    //
    /// Inserts the session and marks the mapper live. Fails with `Conflict`
    /// (carrying the existing id) if the mapper already has an ACTIVE session.
    async fn start_session(&self, session: MappingSession) -> StoreResult<()>;
    async fn get_session(&self, id: &str) -> StoreResult<Option<MappingSession>>;
    async fn active_session(&self, mapper_id: &str) -> StoreResult<Option<MappingSession>>;
    async fn list_sessions(&self, mapper_id: &str, page: Page) -> StoreResult<Vec<MappingSession>>;
    async fn count_sessions(&self, mapper_id: &str) -> StoreResult<u64>;
    /// Appends a route point to an ACTIVE session, adding `added_distance` km.
    /// Returns `None` if the session is missing or no longer ACTIVE.
    async fn record_route_point(
        &self,
        id: &str,
        point: RoutePoint,
        added_distance: f64,
        grid_confidence: f64,
    ) -> StoreResult<Option<MappingSession>>;
    /// Moves an ACTIVE session to a terminal status, clears the mapper's live
    /// flag and applies the credit, all or nothing. `Conflict` if the session
    /// is not ACTIVE any more.
    async fn finish_session(
        &self,
        id: &str,
        close: SessionClose,
        credit: Credit,
    ) -> StoreResult<MappingSession>;

    //
    // LEDGER ACTIONS
    //
    /// Records the transaction (if any) and applies the totals delta, all or nothing
    async fn apply_credit(&self, credit: Credit) -> StoreResult<()>;
    /// Checks the PENDING withdrawal against the balance left after earlier
    /// PENDING and COMPLETED withdrawals, then records it and saves its bank
    /// details on the mapper, all or nothing. `Rejected` if the balance is short.
    async fn request_withdrawal(&self, withdrawal: Transaction) -> StoreResult<()>;
    async fn get_transaction(&self, id: &str) -> StoreResult<Option<Transaction>>;
    /// Newest first; `page == None` returns every match
    async fn list_transactions(&self, filter: &TransactionFilter, page: Option<Page>) -> StoreResult<Vec<Transaction>>;
    async fn count_transactions(&self, filter: &TransactionFilter) -> StoreResult<u64>;
    /// Compare-and-swap from PENDING; `Conflict` if the transaction was already settled
    async fn settle_transaction(&self, id: &str, status: TransactionStatus) -> StoreResult<Option<Transaction>>;

    async fn dashboard_stats(&self) -> StoreResult<DashboardStats>;
}
