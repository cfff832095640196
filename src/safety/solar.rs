//!
//! Sun position and time-of-day classification.
//!
//! Uses the NOAA solar calculator approximation, good to well under a degree
//! for dates within a few centuries of J2000.
//!

use crate::ODM::models::{GeoPoint, Timestamp};
use chrono::{Duration, NaiveTime, Timelike};
use serde::Serialize;

/// Elevation above which it is full daylight, and below minus which it is night
pub const TWILIGHT_DEGREES: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeOfDay {
    Dawn,
    Day,
    Dusk,
    Night,
}

impl TimeOfDay {
    /// Twilight before solar noon is dawn, after it dusk
    pub fn classify(elevation: f64, before_noon: bool) -> Self {
        match elevation {
            e if e > TWILIGHT_DEGREES => Self::Day,
            e if e < -TWILIGHT_DEGREES => Self::Night,
            _ if before_noon => Self::Dawn,
            _ => Self::Dusk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolarPosition {
    pub at: Timestamp,
    pub location: GeoPoint,
    /// Degrees above the horizon, uncorrected for refraction
    pub elevation: f64,
    /// Degrees clockwise from north
    pub azimuth: f64,
    pub solar_noon: Timestamp,
    pub time_of_day: TimeOfDay,
}

fn sin_deg(value: f64) -> f64 {
    value.to_radians().sin()
}

fn cos_deg(value: f64) -> f64 {
    value.to_radians().cos()
}

pub fn position(location: GeoPoint, at: Timestamp) -> SolarPosition {
    let julian_day = at.timestamp_millis() as f64 / 86_400_000.0 + 2_440_587.5;
    let t = (julian_day - 2_451_545.0) / 36_525.0;

    let mean_longitude = (280.46646 + t * (36_000.76983 + t * 0.0003032)).rem_euclid(360.0);
    let mean_anomaly = 357.52911 + t * (35_999.05029 - 0.0001537 * t);
    let eccentricity = 0.016708634 - t * (0.000042037 + 0.0000001267 * t);

    let center = sin_deg(mean_anomaly) * (1.914602 - t * (0.004817 + 0.000014 * t))
        + sin_deg(2.0 * mean_anomaly) * (0.019993 - 0.000101 * t)
        + sin_deg(3.0 * mean_anomaly) * 0.000289;
    let omega = 125.04 - 1934.136 * t;
    let apparent_longitude = mean_longitude + center - 0.00569 - 0.00478 * sin_deg(omega);

    let mean_obliquity = 23.0 + (26.0 + (21.448 - t * (46.815 + t * (0.00059 - t * 0.001813))) / 60.0) / 60.0;
    let obliquity = mean_obliquity + 0.00256 * cos_deg(omega);
    let declination = (sin_deg(obliquity) * sin_deg(apparent_longitude)).asin().to_degrees();

    let y = (obliquity / 2.0).to_radians().tan().powi(2);
    // minutes
    let equation_of_time = 4.0
        * (y * sin_deg(2.0 * mean_longitude) - 2.0 * eccentricity * sin_deg(mean_anomaly)
            + 4.0 * eccentricity * y * sin_deg(mean_anomaly) * cos_deg(2.0 * mean_longitude)
            - 0.5 * y * y * sin_deg(4.0 * mean_longitude)
            - 1.25 * eccentricity * eccentricity * sin_deg(2.0 * mean_anomaly))
            .to_degrees();

    let minutes_utc = at.num_seconds_from_midnight() as f64 / 60.0;
    let true_solar_time = (minutes_utc + equation_of_time + 4.0 * location.lon).rem_euclid(1440.0);
    let hour_angle = true_solar_time / 4.0 - 180.0;

    let cos_zenith = sin_deg(location.lat) * sin_deg(declination)
        + cos_deg(location.lat) * cos_deg(declination) * cos_deg(hour_angle);
    let zenith = cos_zenith.clamp(-1.0, 1.0).acos().to_degrees();
    let elevation = 90.0 - zenith;

    let azimuth_denominator = cos_deg(location.lat) * sin_deg(zenith);
    let azimuth = if azimuth_denominator.abs() < 1e-12 {
        // sun at the zenith or observer at a pole
        if declination > location.lat { 0.0 } else { 180.0 }
    } else {
        let cos_azimuth = ((sin_deg(location.lat) * cos_deg(zenith)) - sin_deg(declination)) / azimuth_denominator;
        let angle = cos_azimuth.clamp(-1.0, 1.0).acos().to_degrees();
        if hour_angle > 0.0 {
            (angle + 180.0).rem_euclid(360.0)
        } else {
            (540.0 - angle).rem_euclid(360.0)
        }
    };

    let noon_minutes = 720.0 - 4.0 * location.lon - equation_of_time;
    let midnight = at.date_naive().and_time(NaiveTime::MIN).and_utc();
    let solar_noon = midnight + Duration::milliseconds((noon_minutes * 60_000.0).round() as i64);

    SolarPosition {
        at,
        location,
        elevation,
        azimuth,
        solar_noon,
        time_of_day: TimeOfDay::classify(elevation, hour_angle < 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const LAGOS: GeoPoint = GeoPoint { lat: 6.5244, lon: 3.3792 };

    #[test]
    fn classify_uses_twilight_band() {
        assert_eq!(TimeOfDay::classify(30.0, true), TimeOfDay::Day);
        assert_eq!(TimeOfDay::classify(-20.0, false), TimeOfDay::Night);
        assert_eq!(TimeOfDay::classify(0.0, true), TimeOfDay::Dawn);
        assert_eq!(TimeOfDay::classify(0.0, false), TimeOfDay::Dusk);
        assert_eq!(TimeOfDay::classify(6.0, false), TimeOfDay::Dusk);
    }

    #[test]
    fn equinox_noon_on_equator_is_overhead() {
        let at = Utc.with_ymd_and_hms(2024, 3, 20, 12, 7, 0).unwrap();
        let sun = position(GeoPoint::new(0.0, 0.0), at);
        assert!(sun.elevation > 85.0, "elevation {}", sun.elevation);
        assert_eq!(sun.time_of_day, TimeOfDay::Day);
    }

    #[test]
    fn lagos_day_cycle() {
        let midnight = position(LAGOS, Utc.with_ymd_and_hms(2024, 6, 21, 0, 0, 0).unwrap());
        assert_eq!(midnight.time_of_day, TimeOfDay::Night);

        let sunrise = position(LAGOS, Utc.with_ymd_and_hms(2024, 6, 21, 5, 35, 0).unwrap());
        assert_eq!(sunrise.time_of_day, TimeOfDay::Dawn, "elevation {}", sunrise.elevation);
        assert!(sunrise.azimuth > 45.0 && sunrise.azimuth < 135.0);

        let sunset = position(LAGOS, Utc.with_ymd_and_hms(2024, 6, 21, 18, 15, 0).unwrap());
        assert_eq!(sunset.time_of_day, TimeOfDay::Dusk, "elevation {}", sunset.elevation);
        assert!(sunset.azimuth > 225.0 && sunset.azimuth < 315.0);
    }

    #[test]
    fn solar_noon_is_near_local_noon() {
        let sun = position(LAGOS, Utc.with_ymd_and_hms(2024, 6, 21, 9, 0, 0).unwrap());
        // 3.38 degrees east puts solar noon around 11:45 UTC
        let expected = Utc.with_ymd_and_hms(2024, 6, 21, 11, 45, 0).unwrap();
        assert!((sun.solar_noon - expected).num_minutes().abs() <= 10);
    }
}
