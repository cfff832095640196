//!
//! In-process `Store` used by the test suite.
//! A single mutex guards all collections, so every call is atomic.
//!

use super::models::*;
use super::store::*;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Collections {
    users: HashMap<String, User>,
    mappers: HashMap<String, Mapper>,
    events: HashMap<String, Event>,
    sessions: HashMap<String, MappingSession>,
    transactions: HashMap<String, Transaction>,
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Collections>> {
        self.data.lock().map_err(|_| StoreError::Backend("memory store poisoned".into()))
    }
}

fn paginate<T>(items: Vec<T>, page: Option<Page>) -> Vec<T> {
    match page {
        None => items,
        Some(page) => items
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect(),
    }
}

fn event_matches(filter: &EventFilter, event: &Event) -> bool {
    filter.category.map_or(true, |value| event.category == value)
        && filter.severity.map_or(true, |value| event.severity == value)
        && filter.status.map_or(true, |value| event.status == value)
        && filter.created_since.map_or(true, |value| event.created_at >= value)
        && filter.within.map_or(true, |value| value.contains(&event.location))
}

fn mapper_matches(filter: &MapperFilter, mapper: &Mapper) -> bool {
    filter.status.map_or(true, |value| mapper.status == value)
        && (!filter.live_only || mapper.is_live)
        && (!filter.active_only || mapper.is_active)
        && filter.within.map_or(true, |value| {
            mapper.current_location.map_or(false, |location| value.contains(&location))
        })
}

fn transaction_matches(filter: &TransactionFilter, transaction: &Transaction) -> bool {
    filter.mapper_id.as_ref().map_or(true, |value| &transaction.mapper_id == value)
        && filter.kind.map_or(true, |value| transaction.kind == value)
        && filter.created_since.map_or(true, |value| transaction.created_at >= value)
}

fn credit(data: &mut Collections, credit: Credit) -> StoreResult<()> {
    if let Some(reference) = credit.transaction.as_ref().and_then(|value| value.reference.as_ref()) {
        if data.transactions.values().any(|value| value.reference.as_ref() == Some(reference)) {
            return Err(StoreError::conflict("Transaction reference already exists"));
        }
    }
    let mapper = match data.mappers.get_mut(&credit.mapper_id) {
        Some(value) => value,
        None => return Err(StoreError::NotFound(format!("mapper {}", credit.mapper_id))),
    };
    mapper.total_earnings += credit.delta.earnings;
    mapper.total_distance += credit.delta.distance;
    mapper.total_duration += credit.delta.duration;
    mapper.events_reported += credit.delta.events;

    if let Some(transaction) = credit.transaction {
        data.transactions.insert(transaction.id.clone(), transaction);
    }
    Ok(())
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: User) -> StoreResult<()> {
        let mut data = self.lock()?;
        if data.users.values().any(|value| value.email == user.email) {
            return Err(StoreError::conflict("Email already registered"));
        }
        data.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    async fn deactivate_user(&self, id: &str) -> StoreResult<bool> {
        let mut data = self.lock()?;
        match data.users.get_mut(id) {
            Some(user) => {
                user.is_active = false;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn insert_mapper(&self, mapper: Mapper) -> StoreResult<()> {
        let mut data = self.lock()?;
        if data.mappers.values().any(|value| value.email == mapper.email) {
            return Err(StoreError::conflict("Email already registered"));
        }
        data.mappers.insert(mapper.id.clone(), mapper);
        Ok(())
    }

    async fn get_mapper(&self, id: &str) -> StoreResult<Option<Mapper>> {
        Ok(self.lock()?.mappers.get(id).cloned())
    }

    async fn list_mappers(&self, filter: &MapperFilter, page: Option<Page>) -> StoreResult<Vec<Mapper>> {
        let data = self.lock()?;
        let mut mappers: Vec<Mapper> = data.mappers
            .values()
            .filter(|mapper| mapper_matches(filter, mapper))
            .cloned()
            .collect();
        mappers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(mappers, page))
    }

    async fn count_mappers(&self, filter: &MapperFilter) -> StoreResult<u64> {
        let data = self.lock()?;
        Ok(data.mappers.values().filter(|mapper| mapper_matches(filter, mapper)).count() as u64)
    }

    async fn update_mapper_profile(&self, id: &str, changes: ProfileChanges) -> StoreResult<Option<Mapper>> {
        let mut data = self.lock()?;
        Ok(data.mappers.get_mut(id).map(|mapper| {
            if let Some(name) = changes.name {
                mapper.name = name;
            }
            if let Some(phone) = changes.phone {
                mapper.phone = Some(phone);
            }
            if let Some(vehicle_type) = changes.vehicle_type {
                mapper.vehicle_type = vehicle_type;
            }
            mapper.clone()
        }))
    }

    async fn set_mapper_status(&self, id: &str, status: MapperStatus) -> StoreResult<Option<Mapper>> {
        let mut data = self.lock()?;
        Ok(data.mappers.get_mut(id).map(|mapper| {
            mapper.status = status;
            mapper.clone()
        }))
    }

    async fn set_mapper_live(&self, id: &str, is_live: bool, location: Option<GeoPoint>) -> StoreResult<Option<Mapper>> {
        let mut data = self.lock()?;
        Ok(data.mappers.get_mut(id).map(|mapper| {
            mapper.is_live = is_live;
            if location.is_some() {
                mapper.current_location = location;
            }
            mapper.last_active = Some(chrono::Utc::now());
            mapper.clone()
        }))
    }

    async fn deactivate_mapper(&self, id: &str) -> StoreResult<bool> {
        let mut data = self.lock()?;
        match data.mappers.get_mut(id) {
            Some(mapper) => {
                mapper.is_active = false;
                mapper.is_live = false;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn insert_event(&self, event: Event) -> StoreResult<()> {
        self.lock()?.events.insert(event.id.clone(), event);
        Ok(())
    }

    async fn get_event(&self, id: &str) -> StoreResult<Option<Event>> {
        Ok(self.lock()?.events.get(id).cloned())
    }

    async fn list_events(&self, filter: &EventFilter, page: Option<Page>) -> StoreResult<Vec<Event>> {
        let data = self.lock()?;
        let mut events: Vec<Event> = data.events
            .values()
            .filter(|event| event_matches(filter, event))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(events, page))
    }

    async fn count_events(&self, filter: &EventFilter) -> StoreResult<u64> {
        let data = self.lock()?;
        Ok(data.events.values().filter(|event| event_matches(filter, event)).count() as u64)
    }

    async fn record_event_view(&self, id: &str) -> StoreResult<Option<Event>> {
        let mut data = self.lock()?;
        Ok(data.events.get_mut(id).map(|event| {
            event.view_count += 1;
            event.clone()
        }))
    }

    async fn append_event_update(&self, id: &str, update: EventUpdate) -> StoreResult<Option<Event>> {
        let mut data = self.lock()?;
        let event = match data.events.get_mut(id) {
            Some(value) => value,
            None => return Ok(None),
        };
        if event.status == EventStatus::Closed {
            return Err(StoreError::conflict("Event is CLOSED"));
        }
        event.status = update.status;
        event.updated_at = update.timestamp;
        event.updates.push(update);
        Ok(Some(event.clone()))
    }

    async fn set_event_status(&self, id: &str, status: EventStatus) -> StoreResult<Option<Event>> {
        let mut data = self.lock()?;
        Ok(data.events.get_mut(id).map(|event| {
            event.status = status;
            event.updated_at = chrono::Utc::now();
            event.clone()
        }))
    }

    async fn delete_event(&self, id: &str) -> StoreResult<Option<Event>> {
        Ok(self.lock()?.events.remove(id))
    }

    async fn start_session(&self, session: MappingSession) -> StoreResult<()> {
        let mut data = self.lock()?;
        let existing = data.sessions
            .values()
            .find(|value| value.mapper_id == session.mapper_id && value.status == SessionStatus::Active)
            .map(|value| value.id.clone());
        if let Some(existing_id) = existing {
            return Err(StoreError::Conflict {
                message: "An active session already exists".into(),
                existing_id: Some(existing_id),
            });
        }
        if let Some(mapper) = data.mappers.get_mut(&session.mapper_id) {
            mapper.is_live = true;
            mapper.current_location = Some(session.start_location);
            mapper.last_active = Some(session.start_time);
        }
        data.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StoreResult<Option<MappingSession>> {
        Ok(self.lock()?.sessions.get(id).cloned())
    }

    async fn active_session(&self, mapper_id: &str) -> StoreResult<Option<MappingSession>> {
        let data = self.lock()?;
        Ok(data.sessions
            .values()
            .find(|value| value.mapper_id == mapper_id && value.status == SessionStatus::Active)
            .cloned())
    }

    async fn list_sessions(&self, mapper_id: &str, page: Page) -> StoreResult<Vec<MappingSession>> {
        let data = self.lock()?;
        let mut sessions: Vec<MappingSession> = data.sessions
            .values()
            .filter(|value| value.mapper_id == mapper_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(paginate(sessions, Some(page)))
    }

    async fn count_sessions(&self, mapper_id: &str) -> StoreResult<u64> {
        let data = self.lock()?;
        Ok(data.sessions.values().filter(|value| value.mapper_id == mapper_id).count() as u64)
    }

    async fn record_route_point(
        &self,
        id: &str,
        point: RoutePoint,
        added_distance: f64,
        grid_confidence: f64,
    ) -> StoreResult<Option<MappingSession>> {
        let mut data = self.lock()?;
        let session = match data.sessions.get_mut(id) {
            Some(value) if value.status == SessionStatus::Active => value,
            _ => return Ok(None),
        };
        session.current_location = point.point();
        session.distance += added_distance;
        session.grid_confidence = grid_confidence;
        session.route.push(point);
        Ok(Some(session.clone()))
    }

    async fn finish_session(
        &self,
        id: &str,
        close: SessionClose,
        credit_to_apply: Credit,
    ) -> StoreResult<MappingSession> {
        let mut data = self.lock()?;
        match data.sessions.get(id) {
            Some(value) if value.status == SessionStatus::Active => {},
            _ => return Err(StoreError::conflict("Session is not active")),
        }
        if let Some(mapper) = data.mappers.get_mut(&credit_to_apply.mapper_id) {
            mapper.is_live = false;
            mapper.last_active = Some(close.end_time);
        }
        credit(&mut data, credit_to_apply)?;

        let session = match data.sessions.get_mut(id) {
            Some(value) => value,
            None => return Err(StoreError::NotFound(format!("session {}", id))),
        };
        session.status = close.status;
        session.end_time = Some(close.end_time);
        session.distance = close.distance;
        session.duration = close.duration;
        session.tokens_earned = close.tokens_earned;
        Ok(session.clone())
    }

    async fn apply_credit(&self, to_apply: Credit) -> StoreResult<()> {
        let mut data = self.lock()?;
        credit(&mut data, to_apply)
    }

    async fn request_withdrawal(&self, withdrawal: Transaction) -> StoreResult<()> {
        let mut data = self.lock()?;
        if let Some(reference) = &withdrawal.reference {
            if data.transactions.values().any(|value| value.reference.as_ref() == Some(reference)) {
                return Err(StoreError::conflict("Transaction reference already exists"));
            }
        }
        let withdrawn: f64 = data.transactions
            .values()
            .filter(|value| {
                value.mapper_id == withdrawal.mapper_id
                    && value.kind == TransactionType::Withdrawal
                    && matches!(value.status, TransactionStatus::Pending | TransactionStatus::Completed)
            })
            .map(|value| value.amount.abs())
            .sum();

        let mapper = match data.mappers.get_mut(&withdrawal.mapper_id) {
            Some(value) => value,
            None => return Err(StoreError::NotFound(format!("mapper {}", withdrawal.mapper_id))),
        };
        let available = mapper.total_earnings - withdrawn;
        if withdrawal.amount.abs() > available {
            return Err(StoreError::Rejected(format!("Insufficient balance: {:.2} available", available.max(0.0))));
        }
        mapper.bank_details = withdrawal.bank_details.clone();
        data.transactions.insert(withdrawal.id.clone(), withdrawal);
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> StoreResult<Option<Transaction>> {
        Ok(self.lock()?.transactions.get(id).cloned())
    }

    async fn list_transactions(&self, filter: &TransactionFilter, page: Option<Page>) -> StoreResult<Vec<Transaction>> {
        let data = self.lock()?;
        let mut transactions: Vec<Transaction> = data.transactions
            .values()
            .filter(|value| transaction_matches(filter, value))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(transactions, page))
    }

    async fn count_transactions(&self, filter: &TransactionFilter) -> StoreResult<u64> {
        let data = self.lock()?;
        Ok(data.transactions.values().filter(|value| transaction_matches(filter, value)).count() as u64)
    }

    async fn settle_transaction(&self, id: &str, status: TransactionStatus) -> StoreResult<Option<Transaction>> {
        let mut data = self.lock()?;
        match data.transactions.get_mut(id) {
            None => Ok(None),
            Some(value) if value.status != TransactionStatus::Pending => {
                Err(StoreError::conflict("Transaction is already settled"))
            },
            Some(value) => {
                value.status = status;
                Ok(Some(value.clone()))
            },
        }
    }

    async fn dashboard_stats(&self) -> StoreResult<DashboardStats> {
        let data = self.lock()?;
        let mappers = || data.mappers.values();
        let events = || data.events.values();
        Ok(DashboardStats {
            total_mappers: mappers().count() as u64,
            live_mappers: mappers().filter(|value| value.is_live).count() as u64,
            active_mappers: mappers().filter(|value| value.status == MapperStatus::Active).count() as u64,
            suspended_mappers: mappers().filter(|value| value.status == MapperStatus::Suspended).count() as u64,
            pending_mappers: mappers().filter(|value| value.status == MapperStatus::Pending).count() as u64,
            total_events: events().count() as u64,
            active_events: events().filter(|value| value.status == EventStatus::Active).count() as u64,
            cleared_events: events().filter(|value| value.status == EventStatus::Cleared).count() as u64,
            closed_events: events().filter(|value| value.status == EventStatus::Closed).count() as u64,
            completed_sessions: data.sessions
                .values()
                .filter(|value| value.status == SessionStatus::Completed)
                .count() as u64,
            total_earnings: mappers().map(|value| value.total_earnings).sum(),
            pending_withdrawals: data.transactions
                .values()
                .filter(|value| value.kind == TransactionType::Withdrawal && value.status == TransactionStatus::Pending)
                .map(|value| value.amount.abs())
                .sum(),
        })
    }
}
