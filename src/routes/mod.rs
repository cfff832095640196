//!
//! Documentation of the routes module.
//! Every REST endpoint of SafetyMapper, mounted under `/api`.
//!

#![allow(unused_imports)]
pub mod admin_routes;
pub mod event_routes;
pub mod mapper_routes;
pub mod media_routes;
pub mod routes_utils;
pub mod session_routes;
pub mod solar_routes;

use super::ODM;
use super::config;
use super::safety;

use rocket::serde::{Serialize, Deserialize, json::Json};
use rocket::http::Status;
use rocket::Route;
use rocket::State;

pub use routes_utils::*;

use log::{debug, error, info, trace, warn};

/// CORS preflight for any path
#[options("/<_..>")]
fn preflight() -> Status {
    Status::NoContent
}

pub fn routes() -> Vec<Route> {
    let mut routes = routes![preflight];
    routes.append(&mut event_routes::event_routes());
    routes.append(&mut session_routes::session_routes());
    routes.append(&mut mapper_routes::mapper_routes());
    routes.append(&mut admin_routes::admin_routes());
    routes.append(&mut media_routes::media_routes());
    routes.append(&mut solar_routes::solar_routes());
    routes
}
