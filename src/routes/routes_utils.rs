use super::*;
use log::{error, info};
use config::config::ConfyConfig;
use ODM::models::*;
use ODM::store::{Page, Store, StoreError};
use safety::access::Actor;
use safety::geo::Geofence;
use safety::Invalid;

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, Method};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::{self, status, Responder, Response};
use rocket::serde::json::{json, Value};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_RADIUS_KM: f64 = 10.0;

//
// Managed state
//

// Utils struct for rocket::manage
pub struct StoreState {
    pub store: Box<dyn Store>,
}

pub struct Config {
    pub config: ConfyConfig,
}

//
// Errors
//

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    /// `session_id` points at the session that blocked the request
    #[error("{message}")]
    Conflict { message: String, session_id: Option<String> },

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Requested range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    /// The detail is only shown outside production
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Validation(_) => Status::BadRequest,
            ApiError::Authentication(_) => Status::Unauthorized,
            ApiError::Authorization(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Conflict { .. } => Status::Conflict,
            ApiError::PayloadTooLarge(_) => Status::PayloadTooLarge,
            ApiError::RangeNotSatisfiable { .. } => Status::RangeNotSatisfiable,
            ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn forbidden() -> Self {
        ApiError::Authorization("You are not allowed to perform this action".into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict { message: message.into(), session_id: None }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { message, existing_id } => ApiError::Conflict { message, session_id: existing_id },
            StoreError::NotFound(value) => ApiError::NotFound(format!("Not found: {}", value)),
            StoreError::Rejected(value) => ApiError::Validation(value),
            StoreError::Backend(value) => ApiError::Internal(value),
        }
    }
}

impl From<Invalid> for ApiError {
    fn from(err: Invalid) -> Self {
        ApiError::Validation(err.0)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(format!("file system: {}", err))
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let production = request
            .rocket()
            .state::<Config>()
            .map_or(true, |value| value.config.is_production());
        let status = self.status();

        let mut body = json!({ "success": false, "error": self.to_string() });
        match &self {
            ApiError::Conflict { session_id: Some(id), .. } => {
                body["sessionId"] = json!(id);
            },
            ApiError::Internal(detail) => {
                error!("Server>>Client:\t{} {} failed: {}", request.method(), request.uri(), detail);
                if !production {
                    body["detail"] = json!(detail);
                }
            },
            _ => {},
        }

        let mut response = Response::build_from(Json(body).respond_to(request)?);
        response.status(status);
        if let ApiError::RangeNotSatisfiable { size } = &self {
            response.raw_header("Content-Range", format!("bytes */{}", size));
        }
        response.ok()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
pub type Created = status::Custom<Json<Value>>;

//
// Envelope
//

pub fn envelope<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub fn created<T: Serialize>(data: T) -> Created {
    status::Custom(Status::Created, envelope(data))
}

pub fn message(text: &str) -> Json<Value> {
    Json(json!({ "success": true, "message": text }))
}

pub fn paged<T: Serialize>(items: Vec<T>, total: u64, page: Page) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": items,
        "pagination": {
            "total": total,
            "limit": page.limit,
            "offset": page.offset,
            "hasMore": page.offset.saturating_add(page.limit) < total,
        },
    }))
}

/// Paginates an already filtered list, returns the page and the filtered total
pub fn slice_page<T>(items: Vec<T>, page: Page) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect();
    (items, total)
}

//
// Authentication
//

/// Bearer token payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct Claims {
    /// Account id
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    let validation = Validation::new(Algorithm::HS256);
    match decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
        Ok(data) => Ok(data.claims),
        Err(err) => {
            let reason = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                ErrorKind::InvalidSignature => "Invalid token signature",
                ErrorKind::InvalidToken => "Invalid token",
                _ => "Token validation failed",
            };
            Err(reason.to_string())
        },
    }
}

/// Why the last guard rejected the request, read back by the 401 catcher
struct AuthFailure(String);

fn reject(request: &Request<'_>, reason: &str) -> Outcome<Actor, ApiError> {
    let reason = request.local_cache(|| AuthFailure(reason.to_string())).0.clone();
    Outcome::Error((Status::Unauthorized, ApiError::Authentication(reason)))
}

// Checking that a caller is authenticated
#[rocket::async_trait]
impl<'r> FromRequest<'r> for Actor {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Actor, ApiError> {
        let secret = match request.rocket().state::<Config>() {
            Some(value) => value.config.jwt_secret.clone(),
            None => return Outcome::Error((Status::InternalServerError, ApiError::Internal("config is not managed".into()))),
        };

        let token = match request.headers().get_one("Authorization") {
            Some(value) => match value.strip_prefix("Bearer ") {
                Some(token) if !token.trim().is_empty() => token.trim().to_string(),
                _ => return reject(request, "Authorization header must be a Bearer token"),
            },
            None => return reject(request, "Authentication required"),
        };

        match verify_token(&token, &secret) {
            Ok(claims) => {
                let route = match request.route() {
                    None => "Unknown Route".to_string(),
                    Some(value) => format!("{}", value.uri),
                };
                info!("Client>>Server:\t{} is trying to access route: {} as {}", &claims.email, route, claims.role.as_str());
                Outcome::Success(Actor::from_role(claims.role, claims.sub, claims.email))
            },
            Err(reason) => reject(request, &reason),
        }
    }
}

/// The caller's mapper record, rejecting other roles and deactivated accounts
pub async fn active_mapper(store: &dyn Store, actor: &Actor) -> ApiResult<Mapper> {
    if !matches!(actor, Actor::Mapper { .. }) {
        return Err(ApiError::Authorization("Only mappers can do this".into()));
    }
    match store.get_mapper(actor.id()).await? {
        Some(mapper) if mapper.is_active => Ok(mapper),
        Some(_) => Err(ApiError::Authentication("Account is deactivated".into())),
        None => Err(ApiError::NotFound("Mapper not found".into())),
    }
}

//
// Query parsing, malformed numbers are a 400
//

pub fn parse_f64(name: &str, raw: Option<&str>) -> ApiResult<Option<f64>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => match value.parse::<f64>() {
            Ok(number) if number.is_finite() => Ok(Some(number)),
            _ => Err(ApiError::Validation(format!("{} must be a number", name))),
        },
    }
}

pub fn parse_u64(name: &str, raw: Option<&str>) -> ApiResult<Option<u64>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ApiError::Validation(format!("{} must be a non-negative integer", name))),
    }
}

pub fn parse_enum<T>(name: &str, raw: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr<Err = String>,
{
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ApiError::Validation(format!("{} has an unknown value {}", name, value))),
    }
}

/// Largest offset the database accepts as a skip count
pub const MAX_OFFSET: u64 = i64::MAX as u64;

/// `limit` defaults to the configured page size and is capped at the maximum
pub fn page(config: &ConfyConfig, limit: Option<&str>, offset: Option<&str>) -> ApiResult<Page> {
    let limit = parse_u64("limit", limit)?.unwrap_or(config.default_page_size);
    if limit == 0 {
        return Err(ApiError::Validation("limit must be at least 1".into()));
    }
    let offset = parse_u64("offset", offset)?.unwrap_or(0);
    if offset > MAX_OFFSET {
        return Err(ApiError::Validation(format!("offset must be at most {}", MAX_OFFSET)));
    }
    Ok(Page {
        limit: limit.min(config.max_page_size),
        offset,
    })
}

/// Circle of a radius query; both coordinates or neither
pub fn geofence(lat: Option<&str>, lon: Option<&str>, radius: Option<&str>) -> ApiResult<Option<Geofence>> {
    let lat = parse_f64("lat", lat)?;
    let lon = parse_f64("lon", lon)?;
    let radius = parse_f64("radius", radius)?;

    let center = match (lat, lon) {
        (Some(lat), Some(lon)) => GeoPoint::new(lat, lon),
        (None, None) => {
            if radius.is_some() {
                return Err(ApiError::Validation("radius needs lat and lon".into()));
            }
            return Ok(None);
        },
        _ => return Err(ApiError::Validation("lat and lon must be given together".into())),
    };
    if !center.is_valid() {
        return Err(ApiError::Validation("lat/lon out of range".into()));
    }

    let radius = radius.unwrap_or(DEFAULT_RADIUS_KM);
    if radius <= 0.0 {
        return Err(ApiError::Validation("radius must be greater than 0".into()));
    }
    Ok(Some(Geofence::new(center, radius)))
}

//
// CORS
//

pub struct Cors {
    pub origin: String,
}

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", self.origin.clone()));
        response.set_header(Header::new("Access-Control-Allow-Methods", "GET, POST, PUT, PATCH, DELETE, OPTIONS"));
        response.set_header(Header::new("Access-Control-Allow-Headers", "Authorization, Content-Type, Range"));
        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
        response.set_header(Header::new("Access-Control-Expose-Headers", "Content-Range, Accept-Ranges, Content-Length"));
        if request.method() == Method::Options {
            response.set_header(Header::new("Access-Control-Max-Age", "3600"));
        }
    }
}

//
// Catchers
//

fn failure(text: &str) -> Json<Value> {
    Json(json!({ "success": false, "error": text }))
}

#[catch(400)]
fn bad_request() -> Json<Value> {
    failure("Malformed request")
}

#[catch(401)]
fn unauthorized(request: &Request) -> Json<Value> {
    let reason = request.local_cache(|| AuthFailure("Authentication required".to_string()));
    failure(&reason.0)
}

#[catch(403)]
fn forbidden() -> Json<Value> {
    failure("Forbidden")
}

#[catch(404)]
fn not_found(request: &Request) -> Json<Value> {
    failure(&format!("Route {} not found", request.uri().path()))
}

#[catch(413)]
fn payload_too_large() -> Json<Value> {
    failure("Payload too large")
}

#[catch(422)]
fn unprocessable() -> Json<Value> {
    failure("Request body could not be parsed")
}

#[catch(500)]
fn internal_error() -> Json<Value> {
    failure("Internal server error")
}

pub fn catchers() -> Vec<rocket::Catcher> {
    catchers![bad_request, unauthorized, forbidden, not_found, payload_too_large, unprocessable, internal_error]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_caps_and_bounds() {
        let config = ConfyConfig::default();
        assert_eq!(page(&config, None, None).unwrap(), Page { limit: 20, offset: 0 });
        assert_eq!(page(&config, Some("500"), Some("40")).unwrap(), Page { limit: 100, offset: 40 });
        assert!(page(&config, Some("0"), None).is_err());

        let largest = MAX_OFFSET.to_string();
        assert_eq!(page(&config, None, Some(&largest)).unwrap().offset, MAX_OFFSET);
        assert!(page(&config, None, Some("9223372036854775808")).is_err());
        assert!(page(&config, None, Some("18446744073709551615")).is_err());
    }

    #[test]
    fn has_more_does_not_overflow() {
        let body = paged(Vec::<u64>::new(), 3, Page { limit: 100, offset: u64::MAX });
        assert_eq!(body.0["pagination"]["hasMore"], json!(false));

        let body = paged(vec![1u64], 3, Page { limit: 1, offset: 1 });
        assert_eq!(body.0["pagination"]["hasMore"], json!(true));
    }
}
