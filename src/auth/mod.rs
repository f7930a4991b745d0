//! Request identity.
//!
//! Every API request may carry an `authtoken` header. [`Identity`] verifies it (once per
//! request) and yields the signed-in [`User`], or nothing for anonymous requests. Routes that
//! mutate articles take an [`Authenticated`] guard instead, which turns an anonymous identity
//! into a 401.

pub mod firebase;

use rocket::http::Status;
use rocket::outcome::try_outcome;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::State;
use thiserror::Error;
use tracing::warn;

pub const AUTH_HEADER: &str = "authtoken";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub email: Option<String>,
}

impl User {
    /// Name shown next to the user's comments.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.uid)
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("invalid identity token: {0}")]
    InvalidToken(String),

    #[error("identity provider unavailable: {0}")]
    Provider(String),

    #[error("no identity verifier configured")]
    NoVerifier,

    #[error("authentication required")]
    Unauthenticated,
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::InvalidToken(_) | AuthError::Provider(_) => Status::BadRequest,
            AuthError::NoVerifier => Status::InternalServerError,
            AuthError::Unauthenticated => Status::Unauthorized,
        }
    }
}

/// Turns an identity token into a user.
#[rocket::async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<User, AuthError>;
}

/// Managed-state handle to the configured [`TokenVerifier`].
pub struct Verifier(Box<dyn TokenVerifier>);

impl Verifier {
    pub fn new(verifier: impl TokenVerifier + 'static) -> Self {
        Self(Box::new(verifier))
    }

    pub async fn verify(&self, token: &str) -> Result<User, AuthError> {
        self.0.verify(token).await
    }
}

/// The user behind a request, if any.
#[derive(Debug)]
pub struct Identity(Option<User>);

impl Identity {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }

    pub fn uid(&self) -> Option<&str> {
        self.user().map(|user| user.uid.as_str())
    }
}

async fn resolve(request: &Request<'_>) -> Result<Identity, AuthError> {
    // an empty header counts as no header
    let token = request
        .headers()
        .get_one(AUTH_HEADER)
        .filter(|token| !token.is_empty());
    let Some(token) = token else {
        return Ok(Identity(None));
    };

    let verifier = request
        .guard::<&State<Verifier>>()
        .await
        .succeeded()
        .ok_or(AuthError::NoVerifier)?;

    match verifier.verify(token).await {
        Ok(user) => Ok(Identity(Some(user))),
        Err(err) => {
            warn!("rejected {AUTH_HEADER} on {}: {err}", request.uri());
            Err(err)
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r Identity {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let identity = request
            .local_cache_async(async { resolve(request).await })
            .await;

        match identity {
            Ok(identity) => Outcome::Success(identity),
            Err(err) => Outcome::Error((err.status(), err.clone())),
        }
    }
}

/// A request made by a signed-in user.
#[derive(Debug)]
pub struct Authenticated<'r>(pub &'r User);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Authenticated<'r> {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let identity = try_outcome!(request.guard::<&Identity>().await);
        match identity.user() {
            Some(user) => Outcome::Success(Authenticated(user)),
            None => Outcome::Error((Status::Unauthorized, AuthError::Unauthenticated)),
        }
    }
}
