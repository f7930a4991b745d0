//! REST backend for a small blog: articles with upvotes and comments, identity via Firebase
//! ID tokens, and the built single-page frontend served for every other path.

use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::{Build, Rocket};

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod model;
pub mod store;

use config::BlogConfig;

/// Assembles the server from `figment`.
///
/// No [`auth::Verifier`] is managed here: attach [`auth::firebase::fairing`] or manage one
/// directly, otherwise requests carrying a token fail with 500.
pub fn build(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(database::Db::fairing())
        .attach(database::stage())
        .attach(client::stage())
        .attach(AdHoc::config::<BlogConfig>())
        .mount("/api/", api::routes())
        .mount("/", client::routes())
        .register("/", error::catchers())
}
