use super::*;
use ODM::models::{GeoPoint, Timestamp};
use safety::solar;

use chrono::{DateTime, Utc};
use rocket::serde::json::Value;

fn parse_instant(raw: Option<&str>) -> ApiResult<Timestamp> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(Utc::now()),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|instant| instant.with_timezone(&Utc))
            .map_err(|_| ApiError::Validation("at must be an RFC 3339 timestamp".into())),
    }
}

///
///Sun position and time of day at a point
///
///INPUT:  lat, lon, optional `at` (RFC 3339, defaults to now)
///OUTPUT: elevation, azimuth, solar noon and DAWN/DAY/DUSK/NIGHT
///
#[get("/solar?<lat>&<lon>&<at>")]
async fn solar_position(lat: Option<&str>, lon: Option<&str>, at: Option<&str>) -> ApiResult<Json<Value>> {
    let location = match (parse_f64("lat", lat)?, parse_f64("lon", lon)?) {
        (Some(lat), Some(lon)) => GeoPoint::new(lat, lon),
        _ => return Err(ApiError::Validation("lat and lon are required".into())),
    };
    if !location.is_valid() {
        return Err(ApiError::Validation("lat/lon out of range".into()));
    }
    let instant = parse_instant(at)?;
    Ok(envelope(solar::position(location, instant)))
}

pub fn solar_routes() -> Vec<Route> {
    routes![solar_position]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn instants() {
        assert!(parse_instant(Some("2024-03-20T12:00:00Z")).is_ok());
        assert!(parse_instant(Some("2024-03-20T14:00:00+02:00")).is_ok());
        assert!(parse_instant(Some("yesterday")).is_err());
        assert!(parse_instant(None).is_ok());
    }
}
