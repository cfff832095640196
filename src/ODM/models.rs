//!
//! Documentation of the Models module.
//! Contains all the models needed for a SafetyMapper connection.
//!
//! Plain models (`Event`, `Mapper`, ...) are what the handlers and the JSON
//! API work with. The `*Document` twins are the shape stored in MongoDB,
//! see `odm_utils` for the conversions.
//!

use rocket::serde::{Serialize, Deserialize};
use bson::DateTime;
use chrono::Utc;
use std::fmt;
use std::str::FromStr;

pub type Timestamp = chrono::DateTime<Utc>;

/// A WGS84 position
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        GeoPoint { lat, lon }
    }

    /// Finite and inside the WGS84 ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Implements `Display`/`FromStr` over the serde wire names of a plain enum.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $wire, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_uppercase().as_str() {
                    $( $wire => Ok($name::$variant), )+
                    other => Err(format!("Invalid {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

//
// Accounts
//

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Mapper,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Mapper => "mapper",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Tricycle,
    Bicycle,
    Bus,
    Truck,
    Other,
}

wire_enum!(VehicleType {
    Car => "CAR",
    Motorcycle => "MOTORCYCLE",
    Tricycle => "TRICYCLE",
    Bicycle => "BICYCLE",
    Bus => "BUS",
    Truck => "TRUCK",
    Other => "OTHER",
});

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapperStatus {
    Active,
    Inactive,
    Suspended,
    Pending,
}

wire_enum!(MapperStatus {
    Active => "ACTIVE",
    Inactive => "INACTIVE",
    Suspended => "SUSPENDED",
    Pending => "PENDING",
});

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
}

/// A regular (non-mapper) account, admins included
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: Timestamp,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Mapper {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub vehicle_type: VehicleType,
    pub status: MapperStatus,
    pub is_live: bool,
    pub current_location: Option<GeoPoint>,
    pub total_earnings: f64,
    /// km
    pub total_distance: f64,
    /// minutes
    pub total_duration: f64,
    pub events_reported: u64,
    pub bank_details: Option<BankDetails>,
    pub is_active: bool,
    pub last_active: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// What other clients may see of a live mapper
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LiveMapper {
    pub id: String,
    pub name: String,
    pub vehicle_type: VehicleType,
    pub current_location: GeoPoint,
}

//
// Events
//

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Accident,
    Flood,
    PoliceCheckpoint,
    RoadBlock,
    Construction,
    Pothole,
    TrafficJam,
    Fire,
    Protest,
    Robbery,
    Other,
}

wire_enum!(EventCategory {
    Accident => "ACCIDENT",
    Flood => "FLOOD",
    PoliceCheckpoint => "POLICE_CHECKPOINT",
    RoadBlock => "ROAD_BLOCK",
    Construction => "CONSTRUCTION",
    Pothole => "POTHOLE",
    TrafficJam => "TRAFFIC_JAM",
    Fire => "FIRE",
    Protest => "PROTEST",
    Robbery => "ROBBERY",
    Other => "OTHER",
});

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

wire_enum!(Severity {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Active,
    Cleared,
    Updated,
    Closed,
}

wire_enum!(EventStatus {
    Active => "ACTIVE",
    Cleared => "CLEARED",
    Updated => "UPDATED",
    Closed => "CLOSED",
});

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaSource {
    Captured,
    #[default]
    Uploaded,
}

wire_enum!(MediaSource {
    Captured => "CAPTURED",
    Uploaded => "UPLOADED",
});

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub url: String,
    /// File name under the upload root
    pub key: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub source_type: MediaSource,
}

/// One entry of an event's update log, never modified once written
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EventUpdate {
    pub updater_id: String,
    pub updater_name: String,
    pub updater_role: Role,
    pub status: EventStatus,
    pub comment: String,
    pub media: Vec<Media>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub category: EventCategory,
    pub custom_category: Option<String>,
    pub title: String,
    pub description: String,
    pub location: GeoPoint,
    pub address: Option<String>,
    pub severity: Severity,
    pub status: EventStatus,
    pub media: Vec<Media>,
    pub reporter_id: String,
    pub reporter_name: String,
    pub reporter_role: Role,
    pub verified: bool,
    pub view_count: u64,
    pub updates: Vec<EventUpdate>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

//
// Sessions
//

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    /// Reserved, nothing sets it
    Paused,
    Completed,
    Cancelled,
}

wire_enum!(SessionStatus {
    Active => "ACTIVE",
    Paused => "PAUSED",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePoint {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: Timestamp,
    /// km/h as reported by the device
    pub speed: Option<f64>,
}

impl RoutePoint {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MappingSession {
    pub id: String,
    pub mapper_id: String,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub status: SessionStatus,
    pub start_location: GeoPoint,
    pub current_location: GeoPoint,
    pub route: Vec<RoutePoint>,
    /// km
    pub distance: f64,
    /// minutes
    pub duration: f64,
    pub tokens_earned: f64,
    pub media: Vec<Media>,
    pub grid_confidence: f64,
}

//
// Ledger
//

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Mapping,
    Bonus,
    Referral,
    Withdrawal,
    EventReport,
}

wire_enum!(TransactionType {
    Mapping => "MAPPING",
    Bonus => "BONUS",
    Referral => "REFERRAL",
    Withdrawal => "WITHDRAWAL",
    EventReport => "EVENT_REPORT",
});

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

wire_enum!(TransactionStatus {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub mapper_id: String,
    pub session_id: Option<String>,
    pub event_id: Option<String>,
    /// Positive for earnings, negative for withdrawals
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub description: String,
    pub bank_details: Option<BankDetails>,
    pub reference: Option<String>,
    pub created_at: Timestamp,
}

/*
Models for the MongoDB operations
*/

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    /// The ID of the model.
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MapperDocument {
    /// The ID of the model.
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub vehicle_type: VehicleType,
    pub status: MapperStatus,
    pub is_live: bool,
    pub current_location: Option<GeoPoint>,
    pub total_earnings: f64,
    pub total_distance: f64,
    pub total_duration: f64,
    pub events_reported: i64,
    pub bank_details: Option<BankDetails>,
    pub is_active: bool,
    pub last_active: Option<DateTime>,
    pub created_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EventUpdateDocument {
    pub updater_id: String,
    pub updater_name: String,
    pub updater_role: Role,
    pub status: EventStatus,
    pub comment: String,
    pub media: Vec<Media>,
    pub timestamp: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EventDocument {
    /// The ID of the model.
    #[serde(rename = "_id")]
    pub id: String,
    pub category: EventCategory,
    pub custom_category: Option<String>,
    pub title: String,
    pub description: String,
    pub location: GeoPoint,
    pub address: Option<String>,
    pub severity: Severity,
    pub status: EventStatus,
    pub media: Vec<Media>,
    pub reporter_id: String,
    pub reporter_name: String,
    pub reporter_role: Role,
    pub verified: bool,
    pub view_count: i64,
    pub updates: Vec<EventUpdateDocument>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoutePointDocument {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime,
    pub speed: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    /// The ID of the model.
    #[serde(rename = "_id")]
    pub id: String,
    pub mapper_id: String,
    pub start_time: DateTime,
    pub end_time: Option<DateTime>,
    pub status: SessionStatus,
    pub start_location: GeoPoint,
    pub current_location: GeoPoint,
    pub route: Vec<RoutePointDocument>,
    pub distance: f64,
    pub duration: f64,
    pub tokens_earned: f64,
    pub media: Vec<Media>,
    pub grid_confidence: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDocument {
    /// The ID of the model.
    #[serde(rename = "_id")]
    pub id: String,
    pub mapper_id: String,
    pub session_id: Option<String>,
    pub event_id: Option<String>,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub description: String,
    pub bank_details: Option<BankDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub created_at: DateTime,
}
