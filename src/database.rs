use rocket::fairing::AdHoc;
use rocket::{Build, Rocket};
use rocket_sync_db_pools::{database, rusqlite};
use tracing::{error, info};

use crate::config::BlogConfig;
use crate::store::{self, StoreError};

/// Pooled connection to the article store, configured under `databases.articles`.
#[database("articles")]
pub struct Db(rusqlite::Connection);

/// Creates the schema and loads the seed file, if any, before the server starts listening.
pub fn stage() -> AdHoc {
    AdHoc::try_on_ignite("Article store", prepare)
}

async fn prepare(rocket: Rocket<Build>) -> Result<Rocket<Build>, Rocket<Build>> {
    let config: BlogConfig = match rocket.figment().extract() {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            return Err(rocket);
        }
    };
    let Some(db) = Db::get_one(&rocket).await else {
        error!("article database is not available");
        return Err(rocket);
    };

    let prepared = db
        .run(move |conn| -> Result<usize, StoreError> {
            store::migrate(conn)?;
            match &config.seed {
                Some(path) => store::seed(conn, path),
                None => Ok(0),
            }
        })
        .await;

    match prepared {
        Ok(seeded) => {
            info!("article store ready, {seeded} articles seeded");
            Ok(rocket)
        }
        Err(err) => {
            error!("failed to prepare article store: {err}");
            Err(rocket)
        }
    }
}
