use rocket::launch;

use blog_server::{auth, config};

#[launch]
fn rocket() -> _ {
    dotenvy::dotenv().ok();

    blog_server::build(config::figment()).attach(auth::firebase::fairing())
}
