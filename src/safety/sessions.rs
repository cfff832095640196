//!
//! Mapping sessions: one continuous drive, from start to completion.
//!
//! The route is append-only and in temporal order; distance is summed leg by
//! leg with the haversine formula. On completion the server's own numbers win:
//! client-reported distance, duration and tokens can only lower them.
//!

use super::geo;
use super::Invalid;
use crate::ODM::models::*;
use crate::ODM::store::{Credit, SessionClose, TotalsDelta};
use chrono::Duration;
use log::warn;

/// Location ping as sent by the device
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPing {
    pub location: GeoPoint,
    pub speed: Option<f64>,
    pub timestamp: Option<Timestamp>,
}

/// What the client claims when it ends a drive
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionClaim {
    pub distance: Option<f64>,
    pub duration: Option<f64>,
    pub tokens_earned: Option<f64>,
    pub end_time: Option<Timestamp>,
}

pub fn new_session(id: String, mapper_id: &str, start: GeoPoint, now: Timestamp) -> Result<MappingSession, Invalid> {
    if !start.is_valid() {
        return Err(Invalid("startLocation is out of range".into()));
    }
    Ok(MappingSession {
        id,
        mapper_id: mapper_id.to_string(),
        start_time: now,
        end_time: None,
        status: SessionStatus::Active,
        start_location: start,
        current_location: start,
        route: vec![RoutePoint { lat: start.lat, lon: start.lon, timestamp: now, speed: Some(0.0) }],
        distance: 0.0,
        duration: 0.0,
        tokens_earned: 0.0,
        media: vec![],
        grid_confidence: 0.0,
    })
}

/// Route point for a ping plus the km it adds to the session.
/// Timestamps from the device are kept unless they lie in the future.
pub fn route_step(session: &MappingSession, ping: &LocationPing, now: Timestamp) -> Result<(RoutePoint, f64), Invalid> {
    if !ping.location.is_valid() {
        return Err(Invalid("location is out of range".into()));
    }
    if let Some(speed) = ping.speed {
        if !speed.is_finite() || speed < 0.0 {
            return Err(Invalid("speed must be a non-negative number".into()));
        }
    }

    let timestamp = match ping.timestamp {
        Some(value) if value <= now => value,
        _ => now,
    };
    let point = RoutePoint {
        lat: ping.location.lat,
        lon: ping.location.lon,
        timestamp,
        speed: ping.speed,
    };

    let added = match session.route.last() {
        Some(previous) => geo::distance_between(&previous.point(), &ping.location),
        None => geo::distance_between(&session.start_location, &ping.location),
    };
    Ok((point, added))
}

/// Route density metric shown to mappers: points per 100 m, capped at 100
pub fn grid_confidence(points: usize, distance_km: f64) -> f64 {
    if points == 0 {
        return 0.0;
    }
    let per_hundred_metres = points as f64 / (distance_km * 10.0).max(1.0);
    (per_hundred_metres * 100.0).min(100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Lower of the claimed and the computed value; claims that are not finite or negative are ignored
fn clamp_claim(name: &str, session_id: &str, claimed: Option<f64>, computed: f64) -> f64 {
    match claimed {
        Some(value) if value.is_finite() && value >= 0.0 => {
            if value > computed + 1e-9 {
                warn!(
                    "Session {} claimed {} {} but the route supports {}, clamping",
                    session_id, name, value, computed
                );
                computed
            } else {
                value
            }
        },
        Some(value) => {
            warn!("Session {} sent unusable {} {}, ignoring", session_id, name, value);
            computed
        },
        None => computed,
    }
}

/// Terminal values of a completed session and the credit it earns
pub fn complete(
    session: &MappingSession,
    claim: &CompletionClaim,
    tokens_per_km: f64,
    transaction_id: String,
    now: Timestamp,
) -> (SessionClose, Credit) {
    let end_time = match claim.end_time {
        Some(value) if value >= session.start_time && value <= now => value,
        _ => now,
    };

    let route_km = geo::route_distance(&session.route);
    let minutes = (end_time - session.start_time).num_milliseconds().max(0) as f64 / 60_000.0;

    let distance = round2(clamp_claim("distance", &session.id, claim.distance, route_km));
    let duration = round2(clamp_claim("duration", &session.id, claim.duration, minutes));
    let tokens = round2(clamp_claim("tokensEarned", &session.id, claim.tokens_earned, distance * tokens_per_km));

    let transaction = if tokens > 0.0 {
        Some(Transaction {
            id: transaction_id,
            mapper_id: session.mapper_id.clone(),
            session_id: Some(session.id.clone()),
            event_id: None,
            amount: tokens,
            kind: TransactionType::Mapping,
            status: TransactionStatus::Completed,
            description: format!("Mapping session: {:.2} km in {:.0} min", distance, duration),
            bank_details: None,
            reference: None,
            created_at: now,
        })
    } else {
        None
    };

    let close = SessionClose {
        status: SessionStatus::Completed,
        end_time,
        distance,
        duration,
        tokens_earned: tokens,
    };
    let credit = Credit {
        mapper_id: session.mapper_id.clone(),
        delta: TotalsDelta { earnings: tokens, distance, duration, events: 0 },
        transaction,
    };
    (close, credit)
}

/// Terminal values of a cancelled session; nothing is credited
pub fn cancel(session: &MappingSession, now: Timestamp) -> (SessionClose, Credit) {
    let minutes = (now - session.start_time).num_milliseconds().max(0) as f64 / 60_000.0;
    let close = SessionClose {
        status: SessionStatus::Cancelled,
        end_time: now,
        distance: round2(geo::route_distance(&session.route)),
        duration: round2(minutes),
        tokens_earned: 0.0,
    };
    let credit = Credit {
        mapper_id: session.mapper_id.clone(),
        delta: TotalsDelta::default(),
        transaction: None,
    };
    (close, credit)
}

/// Elapsed minutes of a running session
pub fn elapsed_minutes(session: &MappingSession, now: Timestamp) -> f64 {
    let elapsed = now - session.start_time;
    if elapsed < Duration::zero() {
        return 0.0;
    }
    elapsed.num_seconds() as f64 / 60.0
}
