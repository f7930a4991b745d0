use std::path::PathBuf;

use rocket::fairing::AdHoc;
use rocket::fs::{FileServer, NamedFile, Options};
use rocket::{get, routes, Route, State};
use tracing::{error, info};

use crate::config::BlogConfig;

pub fn routes() -> Vec<Route> {
    routes![app_shell]
}

/// Mounts the files of the configured frontend directory. Paths that aren't files fall
/// through to [`app_shell`].
pub fn stage() -> AdHoc {
    AdHoc::try_on_ignite("Frontend", |rocket| async move {
        let config: BlogConfig = match rocket.figment().extract() {
            Ok(config) => config,
            Err(err) => {
                error!("invalid configuration: {err}");
                return Err(rocket);
            }
        };

        info!("serving frontend from {}", config.static_dir.display());
        Ok(rocket.mount("/", assets(config.static_dir)))
    })
}

fn assets(static_dir: PathBuf) -> FileServer {
    FileServer::new(static_dir, Options::Index | Options::Missing).rank(10)
}

/// Any other non-API path gets the single-page app, which does its own routing.
#[get("/<path..>", rank = 20)]
async fn app_shell(path: PathBuf, config: &State<BlogConfig>) -> Option<NamedFile> {
    if path.starts_with("api") {
        return None;
    }
    NamedFile::open(config.static_dir.join("index.html")).await.ok()
}
