//!
//! Who may do what.
//!
//! Every role and ownership rule of the API is decided by [`can`], the
//! handlers only ask.
//!

use crate::ODM::models::{Event, MappingSession, Role};

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Mapper { id: String, email: String },
    User { id: String, email: String },
    Admin { id: String, email: String },
}

impl Actor {
    pub fn id(&self) -> &str {
        match self {
            Actor::Mapper { id, .. } | Actor::User { id, .. } | Actor::Admin { id, .. } => id,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Actor::Mapper { email, .. } | Actor::User { email, .. } | Actor::Admin { email, .. } => email,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Actor::Mapper { .. } => Role::Mapper,
            Actor::User { .. } => Role::User,
            Actor::Admin { .. } => Role::Admin,
        }
    }

    pub fn from_role(role: Role, id: String, email: String) -> Self {
        match role {
            Role::Mapper => Actor::Mapper { id, email },
            Role::User => Actor::User { id, email },
            Role::Admin => Actor::Admin { id, email },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReportEvent,
    UpdateEventStatus,
    OverrideEventStatus,
    DeleteEvent,
    StartSession,
    ManageSession,
    ShareLocation,
    ViewEarnings,
    RequestWithdrawal,
    ModerateMappers,
    SettleTransactions,
    ViewDashboard,
}

/// What an action is performed on
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    None,
    Event(&'a Event),
    Session(&'a MappingSession),
}

pub fn can(actor: &Actor, action: Action, resource: Resource<'_>) -> bool {
    use Action::*;

    match (actor, action, resource) {
        (_, ReportEvent, _) => true,

        (Actor::Mapper { .. }, UpdateEventStatus, _) => true,

        (Actor::Admin { .. }, DeleteEvent, _) => true,
        (_, DeleteEvent, Resource::Event(event)) => event.reporter_id == actor.id(),

        (Actor::Mapper { id, .. }, ManageSession, Resource::Session(session)) => &session.mapper_id == id,

        (Actor::Mapper { .. }, StartSession | ShareLocation | ViewEarnings | RequestWithdrawal, _) => true,

        (Actor::Admin { .. }, OverrideEventStatus | ModerateMappers | SettleTransactions | ViewDashboard, _) => true,

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ODM::models::*;
    use chrono::Utc;

    fn mapper(id: &str) -> Actor {
        Actor::Mapper { id: id.into(), email: format!("{}@example.com", id) }
    }

    fn user(id: &str) -> Actor {
        Actor::User { id: id.into(), email: format!("{}@example.com", id) }
    }

    fn admin() -> Actor {
        Actor::Admin { id: "root".into(), email: "root@example.com".into() }
    }

    fn event_by(reporter: &str) -> Event {
        let now = Utc::now();
        Event {
            id: "e1".into(),
            category: EventCategory::Flood,
            custom_category: None,
            title: "Flooded junction".into(),
            description: String::new(),
            location: GeoPoint::new(6.5, 3.3),
            address: None,
            severity: Severity::High,
            status: EventStatus::Active,
            media: vec![],
            reporter_id: reporter.into(),
            reporter_name: reporter.into(),
            reporter_role: Role::User,
            verified: false,
            view_count: 0,
            updates: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn only_mappers_update_event_status() {
        let event = event_by("u1");
        assert!(can(&mapper("m1"), Action::UpdateEventStatus, Resource::Event(&event)));
        assert!(!can(&user("u1"), Action::UpdateEventStatus, Resource::Event(&event)));
        assert!(!can(&admin(), Action::UpdateEventStatus, Resource::Event(&event)));
        assert!(can(&admin(), Action::OverrideEventStatus, Resource::Event(&event)));
        assert!(!can(&mapper("m1"), Action::OverrideEventStatus, Resource::Event(&event)));
    }

    #[test]
    fn delete_requires_reporter_or_admin() {
        let event = event_by("u1");
        assert!(can(&user("u1"), Action::DeleteEvent, Resource::Event(&event)));
        assert!(can(&admin(), Action::DeleteEvent, Resource::Event(&event)));
        assert!(!can(&user("u2"), Action::DeleteEvent, Resource::Event(&event)));
        assert!(!can(&mapper("m1"), Action::DeleteEvent, Resource::Event(&event)));
        assert!(!can(&user("u1"), Action::DeleteEvent, Resource::None));
    }

    #[test]
    fn sessions_belong_to_their_mapper() {
        let now = Utc::now();
        let session = MappingSession {
            id: "s1".into(),
            mapper_id: "m1".into(),
            start_time: now,
            end_time: None,
            status: SessionStatus::Active,
            start_location: GeoPoint::new(0.0, 0.0),
            current_location: GeoPoint::new(0.0, 0.0),
            route: vec![],
            distance: 0.0,
            duration: 0.0,
            tokens_earned: 0.0,
            media: vec![],
            grid_confidence: 0.0,
        };
        assert!(can(&mapper("m1"), Action::ManageSession, Resource::Session(&session)));
        assert!(!can(&mapper("m2"), Action::ManageSession, Resource::Session(&session)));
        assert!(!can(&admin(), Action::ManageSession, Resource::Session(&session)));
        assert!(can(&mapper("m2"), Action::StartSession, Resource::None));
        assert!(!can(&user("u1"), Action::StartSession, Resource::None));
    }

    #[test]
    fn moderation_is_admin_only() {
        for action in [Action::ModerateMappers, Action::SettleTransactions, Action::ViewDashboard] {
            assert!(can(&admin(), action, Resource::None));
            assert!(!can(&mapper("m1"), action, Resource::None));
            assert!(!can(&user("u1"), action, Resource::None));
        }
        assert!(can(&user("u1"), Action::ReportEvent, Resource::None));
    }
}
