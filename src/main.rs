//!
//! #  SafetyMapper
//!
//! A road-safety gig platform: mappers drive with a dashcam, report road
//! events and get paid in tokens for the distance they map.
//!
//! The REST API, mounted under `/api`, covers:
//!
//! * Road event reports with photo/video evidence and community updates
//! * Mapping sessions with server-side distance and token accounting
//! * Live mapper positions around a point
//! * Earnings, withdrawals and the transaction ledger
//! * Admin moderation and dashboard stats
//! * Range-aware media streaming
//!

#![allow(non_snake_case)]
#[macro_use] extern crate rocket;
extern crate rocket_multipart_form_data;

mod routes;
mod ODM;
mod config;
mod safety;

use config::config::ConfyConfig;
use routes::{Config, Cors, StoreState};
use safety::media::MediaStore;
use ODM::odm::MongoStore;
use ODM::store::Store;

use anyhow::Context;

use log::{error, warn};
use rocket::{Build, Rocket};


/// Mounts every route and manages the shared state
pub fn build_rocket(config: ConfyConfig, store: Box<dyn Store>, media: MediaStore) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("port", config.port))
        .merge(("address", config.address.clone()));
    let origin = config.frontend_origin.clone();

    rocket::custom(figment)
        .mount("/api", routes::routes())
        .register("/", routes::catchers())
        .attach(Cors { origin })
        .manage(StoreState { store })
        .manage(media)
        .manage(Config { config })
}

/// Config, logger, database and upload root, in that order
async fn bootstrap() -> anyhow::Result<(ConfyConfig, MongoStore, MediaStore)> {
    let config = config::config::init().await.context("CONFIG failed to launch")?;
    if let Err(e) = config::config::setup_logger(&config).await {
        println!("LOGGER failed to launch {}", e);
    }

    let store = ODM::odm::init(&config).await.context("Database could not be reached")?;
    let media = MediaStore::new(&config.upload_dir);
    media
        .prepare()
        .await
        .with_context(|| format!("Upload directory {} could not be prepared", config.upload_dir))?;
    Ok((config, store, media))
}

/// The main functions, runs w/ cargo run
#[rocket::main]
async fn main() -> Result<(), ()> {
    let (config, store, media) = match bootstrap().await {
        Err(e) => {
            println!("{:#}", e);
            error!("{:#}", e);
            return Err(());
        },
        Ok(value) => value,
    };
    warn!("SAFETYMAPPER IS LAUNCHING");

    let lift = build_rocket(config, Box::new(store), media).launch().await;

    warn!("SAFETYMAPPER OVER");
    match lift {
        Ok(_) => Ok(()),
        Err(value) => {
            error!("Rocket could not run, error {}", value);
            Err(())
        },
    }
}
