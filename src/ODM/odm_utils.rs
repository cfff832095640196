//!
//! Documentation of the Database Utilities module.
//! Contains the conversions and query builders used by the MongoDB ODM.
//!

use super::*;
use models::*;
use store::*;
use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};

/// Fresh hex id for a new record
pub fn new_id() -> String {
    ObjectId::new().to_hex()
}

pub fn to_bson_date(value: &Timestamp) -> DateTime {
    DateTime::from_chrono(*value)
}

/// True for MongoDB's E11000 duplicate key error
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => false,
    }
}

/// Converts a UserDocument to User
pub fn doc_to_user(document: UserDocument) -> User {
    User {
        id:         document.id,
        email:      document.email,
        name:       document.name,
        role:       document.role,
        is_active:  document.is_active,
        created_at: document.created_at.to_chrono(),
    }
}

/// Converts a User to its UserDocument
pub fn user_to_doc(user: User) -> UserDocument {
    UserDocument {
        id:         user.id,
        email:      user.email,
        name:       user.name,
        role:       user.role,
        is_active:  user.is_active,
        created_at: to_bson_date(&user.created_at),
    }
}

/// Converts a MapperDocument to Mapper
pub fn doc_to_mapper(document: MapperDocument) -> Mapper {
    Mapper {
        id:               document.id,
        email:            document.email,
        name:             document.name,
        phone:            document.phone,
        vehicle_type:     document.vehicle_type,
        status:           document.status,
        is_live:          document.is_live,
        current_location: document.current_location,
        total_earnings:   document.total_earnings,
        total_distance:   document.total_distance,
        total_duration:   document.total_duration,
        events_reported:  document.events_reported.max(0) as u64,
        bank_details:     document.bank_details,
        is_active:        document.is_active,
        last_active:      document.last_active.map(|date| date.to_chrono()),
        created_at:       document.created_at.to_chrono(),
    }
}

/// Converts a Mapper to its MapperDocument
pub fn mapper_to_doc(mapper: Mapper) -> MapperDocument {
    MapperDocument {
        id:               mapper.id,
        email:            mapper.email,
        name:             mapper.name,
        phone:            mapper.phone,
        vehicle_type:     mapper.vehicle_type,
        status:           mapper.status,
        is_live:          mapper.is_live,
        current_location: mapper.current_location,
        total_earnings:   mapper.total_earnings,
        total_distance:   mapper.total_distance,
        total_duration:   mapper.total_duration,
        events_reported:  mapper.events_reported as i64,
        bank_details:     mapper.bank_details,
        is_active:        mapper.is_active,
        last_active:      mapper.last_active.as_ref().map(to_bson_date),
        created_at:       to_bson_date(&mapper.created_at),
    }
}

pub fn doc_to_event_update(document: EventUpdateDocument) -> EventUpdate {
    EventUpdate {
        updater_id:   document.updater_id,
        updater_name: document.updater_name,
        updater_role: document.updater_role,
        status:       document.status,
        comment:      document.comment,
        media:        document.media,
        timestamp:    document.timestamp.to_chrono(),
    }
}

pub fn event_update_to_doc(update: EventUpdate) -> EventUpdateDocument {
    EventUpdateDocument {
        updater_id:   update.updater_id,
        updater_name: update.updater_name,
        updater_role: update.updater_role,
        status:       update.status,
        comment:      update.comment,
        media:        update.media,
        timestamp:    to_bson_date(&update.timestamp),
    }
}

/// Converts an EventDocument to Event
pub fn doc_to_event(document: EventDocument) -> Event {
    Event {
        id:              document.id,
        category:        document.category,
        custom_category: document.custom_category,
        title:           document.title,
        description:     document.description,
        location:        document.location,
        address:         document.address,
        severity:        document.severity,
        status:          document.status,
        media:           document.media,
        reporter_id:     document.reporter_id,
        reporter_name:   document.reporter_name,
        reporter_role:   document.reporter_role,
        verified:        document.verified,
        view_count:      document.view_count.max(0) as u64,
        updates:         document.updates.into_iter().map(doc_to_event_update).collect(),
        created_at:      document.created_at.to_chrono(),
        updated_at:      document.updated_at.to_chrono(),
    }
}

/// Converts an Event to its EventDocument
pub fn event_to_doc(event: Event) -> EventDocument {
    EventDocument {
        id:              event.id,
        category:        event.category,
        custom_category: event.custom_category,
        title:           event.title,
        description:     event.description,
        location:        event.location,
        address:         event.address,
        severity:        event.severity,
        status:          event.status,
        media:           event.media,
        reporter_id:     event.reporter_id,
        reporter_name:   event.reporter_name,
        reporter_role:   event.reporter_role,
        verified:        event.verified,
        view_count:      event.view_count as i64,
        updates:         event.updates.into_iter().map(event_update_to_doc).collect(),
        created_at:      to_bson_date(&event.created_at),
        updated_at:      to_bson_date(&event.updated_at),
    }
}

pub fn doc_to_route_point(document: RoutePointDocument) -> RoutePoint {
    RoutePoint {
        lat:       document.lat,
        lon:       document.lon,
        timestamp: document.timestamp.to_chrono(),
        speed:     document.speed,
    }
}

pub fn route_point_to_doc(point: RoutePoint) -> RoutePointDocument {
    RoutePointDocument {
        lat:       point.lat,
        lon:       point.lon,
        timestamp: to_bson_date(&point.timestamp),
        speed:     point.speed,
    }
}

/// Converts a SessionDocument to MappingSession
pub fn doc_to_session(document: SessionDocument) -> MappingSession {
    MappingSession {
        id:               document.id,
        mapper_id:        document.mapper_id,
        start_time:       document.start_time.to_chrono(),
        end_time:         document.end_time.map(|date| date.to_chrono()),
        status:           document.status,
        start_location:   document.start_location,
        current_location: document.current_location,
        route:            document.route.into_iter().map(doc_to_route_point).collect(),
        distance:         document.distance,
        duration:         document.duration,
        tokens_earned:    document.tokens_earned,
        media:            document.media,
        grid_confidence:  document.grid_confidence,
    }
}

/// Converts a MappingSession to its SessionDocument
pub fn session_to_doc(session: MappingSession) -> SessionDocument {
    SessionDocument {
        id:               session.id,
        mapper_id:        session.mapper_id,
        start_time:       to_bson_date(&session.start_time),
        end_time:         session.end_time.as_ref().map(to_bson_date),
        status:           session.status,
        start_location:   session.start_location,
        current_location: session.current_location,
        route:            session.route.into_iter().map(route_point_to_doc).collect(),
        distance:         session.distance,
        duration:         session.duration,
        tokens_earned:    session.tokens_earned,
        media:            session.media,
        grid_confidence:  session.grid_confidence,
    }
}

/// Converts a TransactionDocument to Transaction
pub fn doc_to_transaction(document: TransactionDocument) -> Transaction {
    Transaction {
        id:           document.id,
        mapper_id:    document.mapper_id,
        session_id:   document.session_id,
        event_id:     document.event_id,
        amount:       document.amount,
        kind:         document.kind,
        status:       document.status,
        description:  document.description,
        bank_details: document.bank_details,
        reference:    document.reference,
        created_at:   document.created_at.to_chrono(),
    }
}

/// Converts a Transaction to its TransactionDocument
pub fn transaction_to_doc(transaction: Transaction) -> TransactionDocument {
    TransactionDocument {
        id:           transaction.id,
        mapper_id:    transaction.mapper_id,
        session_id:   transaction.session_id,
        event_id:     transaction.event_id,
        amount:       transaction.amount,
        kind:         transaction.kind,
        status:       transaction.status,
        description:  transaction.description,
        bank_details: transaction.bank_details,
        reference:    transaction.reference,
        created_at:   to_bson_date(&transaction.created_at),
    }
}

/// Gets the query document of a lat/lon rectangle on `field`
fn bbox_query(query: &mut Document, field: &str, within: &BoundingBox) {
    query.insert(format!("{}.lat", field), doc! { "$gte": within.min_lat, "$lte": within.max_lat });
    query.insert(format!("{}.lon", field), doc! { "$gte": within.min_lon, "$lte": within.max_lon });
}

/// Gets the query document of an EventFilter
pub fn event_filter_doc(filter: &EventFilter) -> Document {
    let mut query = Document::new();
    if let Some(category) = filter.category {
        query.insert("category", category.as_str());
    }
    if let Some(severity) = filter.severity {
        query.insert("severity", severity.as_str());
    }
    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    if let Some(since) = &filter.created_since {
        query.insert("createdAt", doc! { "$gte": to_bson_date(since) });
    }
    if let Some(within) = &filter.within {
        bbox_query(&mut query, "location", within);
    }
    query
}

/// Gets the query document of a MapperFilter
pub fn mapper_filter_doc(filter: &MapperFilter) -> Document {
    let mut query = Document::new();
    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    if filter.live_only {
        query.insert("isLive", true);
    }
    if filter.active_only {
        query.insert("isActive", true);
    }
    if let Some(within) = &filter.within {
        bbox_query(&mut query, "currentLocation", within);
    }
    query
}

/// Gets the query document of a TransactionFilter
pub fn transaction_filter_doc(filter: &TransactionFilter) -> Document {
    let mut query = Document::new();
    if let Some(mapper_id) = &filter.mapper_id {
        query.insert("mapperId", mapper_id.clone());
    }
    if let Some(kind) = filter.kind {
        query.insert("type", kind.as_str());
    }
    if let Some(since) = &filter.created_since {
        query.insert("createdAt", doc! { "$gte": to_bson_date(since) });
    }
    query
}

/// Gets the `$inc` document of a totals delta
pub fn totals_inc_doc(delta: &TotalsDelta) -> Document {
    doc! {
        "totalEarnings":  delta.earnings,
        "totalDistance":  delta.distance,
        "totalDuration":  delta.duration,
        "eventsReported": delta.events as i64,
    }
}

/// Gets the `$set` document of a profile change
pub fn profile_set_doc(changes: &ProfileChanges) -> Document {
    let mut set = Document::new();
    if let Some(name) = &changes.name {
        set.insert("name", name.clone());
    }
    if let Some(phone) = &changes.phone {
        set.insert("phone", phone.clone());
    }
    if let Some(vehicle_type) = changes.vehicle_type {
        set.insert("vehicleType", vehicle_type.as_str());
    }
    set
}

/// Location as stored inside documents
pub fn point_bson(point: &GeoPoint) -> Bson {
    Bson::Document(doc! { "lat": point.lat, "lon": point.lon })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn event_filter_builds_bbox_and_enums() {
        let filter = EventFilter {
            status: Some(EventStatus::Active),
            category: Some(EventCategory::PoliceCheckpoint),
            within: Some(BoundingBox { min_lat: 1.0, max_lat: 2.0, min_lon: 3.0, max_lon: 4.0 }),
            ..Default::default()
        };
        let query = event_filter_doc(&filter);
        assert_eq!(query.get_str("status").unwrap(), "ACTIVE");
        assert_eq!(query.get_str("category").unwrap(), "POLICE_CHECKPOINT");
        let lat = query.get_document("location.lat").unwrap();
        assert_eq!(lat.get_f64("$gte").unwrap(), 1.0);
        assert_eq!(lat.get_f64("$lte").unwrap(), 2.0);
        assert!(query.get("severity").is_none());
    }

    #[test]
    fn session_document_keeps_route_order() {
        let start = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let route = (0..3)
            .map(|i| RoutePoint {
                lat: 6.5 + i as f64 * 0.01,
                lon: 3.3,
                timestamp: start + chrono::Duration::seconds(i * 10),
                speed: Some(30.0),
            })
            .collect::<Vec<_>>();
        let session = MappingSession {
            id: new_id(),
            mapper_id: "m1".into(),
            start_time: start,
            end_time: None,
            status: SessionStatus::Active,
            start_location: GeoPoint::new(6.5, 3.3),
            current_location: GeoPoint::new(6.52, 3.3),
            route: route.clone(),
            distance: 0.0,
            duration: 0.0,
            tokens_earned: 0.0,
            media: vec![],
            grid_confidence: 0.0,
        };
        let back = doc_to_session(session_to_doc(session));
        assert_eq!(back.route, route);
        assert_eq!(back.start_time, start);
    }

    #[test]
    fn transaction_document_uses_mongo_id_and_type_keys() {
        let transaction = Transaction {
            id: "abc".into(),
            mapper_id: "m1".into(),
            session_id: None,
            event_id: None,
            amount: -10.0,
            kind: TransactionType::Withdrawal,
            status: TransactionStatus::Pending,
            description: "Withdrawal".into(),
            bank_details: None,
            reference: None,
            created_at: chrono::Utc::now(),
        };
        let document = bson::to_document(&transaction_to_doc(transaction)).unwrap();
        assert_eq!(document.get_str("_id").unwrap(), "abc");
        assert_eq!(document.get_str("type").unwrap(), "WITHDRAWAL");
        assert_eq!(document.get_str("mapperId").unwrap(), "m1");
        assert!(document.get("reference").is_none());
    }
}
