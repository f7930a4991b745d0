use std::path::PathBuf;

use rocket::figment::providers::Env;
use rocket::figment::Figment;
use serde::Deserialize;

/// Application settings, read from the same figment as Rocket's own configuration
/// (`Rocket.toml`, `ROCKET_*` environment variables).
#[derive(Debug, Clone, Deserialize)]
pub struct BlogConfig {
    /// Directory holding the built frontend; its `index.html` is the app shell.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Firebase service-account file.
    #[serde(default = "default_credentials")]
    pub credentials: PathBuf,
    /// JSON array of articles inserted at startup when missing.
    #[serde(default)]
    pub seed: Option<PathBuf>,
}

pub fn default_static_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_credentials() -> PathBuf {
    PathBuf::from("credentials.json")
}

/// Rocket's default figment, with a plain `PORT` variable taking precedence so hosting
/// platforms can choose the listen port.
pub fn figment() -> Figment {
    rocket::Config::figment().merge(Env::raw().only(&["port"]).global())
}
