use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{catch, catchers, Catcher, Request};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Article not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::NotFound => Status::NotFound,
            ApiError::Store(_) => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let message = match &self {
            ApiError::Store(err) => {
                error!("{} {}: {err}", request.method(), request.uri());
                "Internal server error".to_owned()
            }
            ApiError::NotFound => self.to_string(),
        };

        (status, Message::new(message)).respond_to(request)
    }
}

pub fn catchers() -> Vec<Catcher> {
    catchers![
        bad_request,
        unauthorized,
        not_found,
        unprocessable,
        internal_error,
        unavailable
    ]
}

#[catch(400)]
fn bad_request() -> Json<Message> {
    Message::new("Bad request")
}

#[catch(401)]
fn unauthorized() -> Json<Message> {
    Message::new("Authentication required")
}

#[catch(404)]
fn not_found() -> Json<Message> {
    Message::new("Not found")
}

#[catch(422)]
fn unprocessable() -> Json<Message> {
    Message::new("Malformed request body")
}

#[catch(500)]
fn internal_error() -> Json<Message> {
    Message::new("Internal server error")
}

#[catch(503)]
fn unavailable() -> Json<Message> {
    Message::new("Database unavailable")
}
