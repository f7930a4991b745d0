use rocket::serde::json::Json;
use rocket::{get, post, put, routes, Route};

use crate::auth::{Authenticated, Identity};
use crate::database::Db;
use crate::error::ApiError;
use crate::model::{ArticleView, Comment, NewComment};
use crate::store;

pub fn routes() -> Vec<Route> {
    routes![article, upvote, comment]
}

type ApiResult = Result<Json<ArticleView>, ApiError>;

#[get("/articles/<name>")]
async fn article(name: String, identity: &Identity, db: Db) -> ApiResult {
    let article = db
        .run(move |conn| store::find(conn, &name))
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(ArticleView::for_user(article, identity.uid())))
}

#[put("/articles/<name>/upvote")]
async fn upvote(name: String, user: Authenticated<'_>, db: Db) -> ApiResult {
    let uid = user.0.uid.clone();
    let article = db
        .run(move |conn| store::upvote(conn, &name, &uid))
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(ArticleView::for_user(article, Some(user.0.uid.as_str()))))
}

#[post("/articles/<name>/comments", data = "<comment>")]
async fn comment(
    name: String,
    user: Authenticated<'_>,
    db: Db,
    comment: Json<NewComment>,
) -> ApiResult {
    let comment = Comment {
        posted_by: user.0.display_name().to_owned(),
        text: comment.into_inner().text,
    };
    let article = db
        .run(move |conn| store::add_comment(conn, &name, comment))
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(ArticleView::for_user(article, Some(user.0.uid.as_str()))))
}
