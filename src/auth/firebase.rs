//! Firebase ID-token verification.
//!
//! ID tokens are RS256 JWTs signed with one of Google's rotating `securetoken` keys. The key
//! set comes from a [`KeySource`], normally Google's JWK endpoint, and is cached for as long
//! as its `Cache-Control` header allows.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use rocket::fairing::AdHoc;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{AuthError, TokenVerifier, User, Verifier};
use crate::config::BlogConfig;

const JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(60 * 60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Key fetches, successful or not, are not retried more often than this.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// The parts of a Firebase service-account file needed to verify ID tokens.
#[derive(Debug, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read credentials {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("credentials {} are not a service-account file: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl ServiceAccount {
    pub fn from_file(path: &Path) -> Result<Self, CredentialsError> {
        let contents = fs::read_to_string(path).map_err(|source| CredentialsError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| CredentialsError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}

#[derive(Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

/// Verification keys by key id, and how long they may be cached.
pub struct SigningKeys {
    keys: HashMap<String, DecodingKey>,
    ttl: Duration,
}

impl SigningKeys {
    /// Parses a JWK set. Keys that aren't usable RSA keys are skipped.
    pub fn from_jwks_json(body: &str, ttl: Duration) -> Result<Self, AuthError> {
        let jwks: Jwks =
            serde_json::from_str(body).map_err(|err| AuthError::Provider(err.to_string()))?;

        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for jwk in jwks.keys {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(err) => warn!("skipping signing key `{}`: {err}", jwk.kid),
            }
        }

        Ok(Self { keys, ttl })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Where the token signing keys come from.
#[rocket::async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<SigningKeys, AuthError>;
}

/// Google's published `securetoken` keys.
pub struct GoogleKeys {
    client: reqwest::Client,
}

impl GoogleKeys {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[rocket::async_trait]
impl KeySource for GoogleKeys {
    async fn fetch(&self) -> Result<SigningKeys, AuthError> {
        let response = self
            .client
            .get(JWKS_URL)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| AuthError::Provider(err.to_string()))?;

        let ttl = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .and_then(max_age)
            .unwrap_or(DEFAULT_KEY_TTL);
        let body = response
            .text()
            .await
            .map_err(|err| AuthError::Provider(err.to_string()))?;

        SigningKeys::from_jwks_json(&body, ttl)
    }
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
    attempted_at: Option<Instant>,
    ttl: Duration,
}

impl KeyCache {
    fn is_fresh(&self, now: Instant) -> bool {
        self.fetched_at
            .is_some_and(|fetched_at| now.duration_since(fetched_at) < self.ttl)
    }

    fn may_refresh(&self, now: Instant) -> bool {
        self.attempted_at
            .map_or(true, |attempted_at| now.duration_since(attempted_at) >= MIN_REFRESH_INTERVAL)
    }

    fn lookup(&self, kid: &str, now: Instant) -> Option<&DecodingKey> {
        if self.is_fresh(now) {
            self.keys.get(kid)
        } else {
            None
        }
    }
}

pub struct FirebaseVerifier {
    project_id: String,
    validation: Validation,
    source: Box<dyn KeySource>,
    cache: RwLock<KeyCache>,
    // held for the duration of a fetch so readers never wait on the network
    refresh: Mutex<()>,
}

impl FirebaseVerifier {
    pub fn new(project_id: impl Into<String>, source: impl KeySource + 'static) -> Self {
        let project_id = project_id.into();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&project_id]);
        validation.set_issuer(&[format!("{ISSUER_PREFIX}{project_id}")]);

        Self {
            project_id,
            validation,
            source: Box::new(source),
            cache: RwLock::default(),
            refresh: Mutex::new(()),
        }
    }

    pub fn from_credentials(path: &Path) -> Result<Self, CredentialsError> {
        let account = ServiceAccount::from_file(path)?;
        Ok(Self::new(account.project_id, GoogleKeys::new()?))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.cache.read().await.lookup(kid, Instant::now()) {
            return Ok(key.clone());
        }

        let _refresh = self.refresh.lock().await;
        let now = Instant::now();
        let may_refresh = {
            let cache = self.cache.read().await;
            // another request may have refreshed while we waited
            if let Some(key) = cache.lookup(kid, now) {
                return Ok(key.clone());
            }
            cache.may_refresh(now)
        };

        if may_refresh {
            self.cache.write().await.attempted_at = Some(now);
            let fetched = self.source.fetch().await?;
            debug!(
                "fetched {} signing keys, valid for {:?}",
                fetched.len(),
                fetched.ttl
            );

            let mut cache = self.cache.write().await;
            cache.keys = fetched.keys;
            cache.ttl = fetched.ttl;
            cache.fetched_at = Some(Instant::now());
        }

        // a throttled refresh falls back to whatever keys are held, stale or not
        self.cache
            .read()
            .await
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken(format!("unknown signing key `{kid}`")))
    }
}

#[derive(Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
}

#[rocket::async_trait]
impl TokenVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<User, AuthError> {
        let header = decode_header(token).map_err(|err| AuthError::InvalidToken(err.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing key id".to_owned()))?;

        let key = self.key(&kid).await?;
        let claims = decode::<Claims>(token, &key, &self.validation)
            .map_err(|err| AuthError::InvalidToken(err.to_string()))?
            .claims;
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_owned()));
        }

        Ok(User {
            uid: claims.sub,
            email: claims.email,
        })
    }
}

/// Seconds from a `Cache-Control: max-age=N` directive.
fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .find_map(|directive| directive.trim().strip_prefix("max-age="))
        .and_then(|seconds| seconds.trim().parse().ok())
        .map(Duration::from_secs)
}

/// Loads the service-account file named by the `credentials` setting and manages a
/// [`FirebaseVerifier`] for it. Launch fails if the file can't be loaded.
pub fn fairing() -> AdHoc {
    AdHoc::try_on_ignite("Firebase identity verifier", |rocket| async move {
        let config: BlogConfig = match rocket.figment().extract() {
            Ok(config) => config,
            Err(err) => {
                error!("invalid configuration: {err}");
                return Err(rocket);
            }
        };

        match FirebaseVerifier::from_credentials(&config.credentials) {
            Ok(verifier) => {
                info!("verifying identity tokens for project `{}`", verifier.project_id());
                Ok(rocket.manage(Verifier::new(verifier)))
            }
            Err(err) => {
                error!("{err}");
                Err(rocket)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    use super::*;

    const PROJECT: &str = "my-react-blog";
    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/firebase_test_key.pem");
    const JWKS: &str = include_str!("../../tests/fixtures/firebase_test_jwks.json");
    const KID: &str = "test-key";

    /// Serves the fixture key set, or fails when `jwks` is `None`, counting fetches.
    struct FixtureKeys {
        jwks: Option<&'static str>,
        fetches: Arc<AtomicUsize>,
    }

    #[rocket::async_trait]
    impl KeySource for FixtureKeys {
        async fn fetch(&self) -> Result<SigningKeys, AuthError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.jwks {
                Some(body) => SigningKeys::from_jwks_json(body, DEFAULT_KEY_TTL),
                None => Err(AuthError::Provider("connection refused".to_owned())),
            }
        }
    }

    fn verifier(jwks: Option<&'static str>) -> (FirebaseVerifier, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = FixtureKeys {
            jwks,
            fetches: fetches.clone(),
        };
        (FirebaseVerifier::new(PROJECT, source), fetches)
    }

    #[derive(Serialize)]
    struct IdToken {
        sub: String,
        email: Option<String>,
        aud: String,
        iss: String,
        iat: u64,
        exp: u64,
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn id_token(sub: &str) -> IdToken {
        IdToken {
            sub: sub.to_owned(),
            email: Some(format!("{sub}-email")),
            aud: PROJECT.to_owned(),
            iss: format!("{ISSUER_PREFIX}{PROJECT}"),
            iat: now(),
            exp: now() + 3600,
        }
    }

    fn sign(claims: &IdToken, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_owned());
        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap();
        encode(&header, claims, &key).unwrap()
    }

    #[test]
    fn parses_max_age() {
        assert_eq!(
            max_age("public, max-age=21010, must-revalidate, no-transform"),
            Some(Duration::from_secs(21010))
        );
        assert_eq!(max_age("max-age=60"), Some(Duration::from_secs(60)));
        assert_eq!(max_age("no-cache"), None);
        assert_eq!(max_age("max-age=soon"), None);
    }

    #[test]
    fn parses_key_set() {
        let keys = SigningKeys::from_jwks_json(JWKS, DEFAULT_KEY_TTL).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.keys.contains_key(KID));

        assert!(SigningKeys::from_jwks_json("<html>", DEFAULT_KEY_TTL).is_err());
    }

    #[test]
    fn loads_project_from_service_account() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"type":"service_account","project_id":"my-react-blog","client_email":"x@y"}}"#
        )
        .unwrap();

        let verifier = FirebaseVerifier::from_credentials(file.path()).unwrap();
        assert_eq!(verifier.project_id(), "my-react-blog");
    }

    #[test]
    fn missing_credentials_are_an_error() {
        let err = ServiceAccount::from_file(Path::new("/nonexistent/credentials.json"));
        assert!(matches!(err, Err(CredentialsError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"client_email":"x@y"}}"#).unwrap();
        let err = ServiceAccount::from_file(file.path());
        assert!(matches!(err, Err(CredentialsError::Parse { .. })));
    }

    #[test]
    fn key_cache_expires_and_throttles() {
        let now = Instant::now();
        let empty = KeyCache::default();
        assert!(!empty.is_fresh(now));
        assert!(empty.may_refresh(now));

        let failed = KeyCache {
            attempted_at: Some(now),
            ..KeyCache::default()
        };
        assert!(!failed.is_fresh(now));
        assert!(!failed.may_refresh(now + Duration::from_secs(10)));
        assert!(failed.may_refresh(now + MIN_REFRESH_INTERVAL));

        let fetched = KeyCache {
            fetched_at: Some(now),
            attempted_at: Some(now),
            ttl: Duration::from_secs(300),
            ..KeyCache::default()
        };
        assert!(fetched.is_fresh(now + Duration::from_secs(299)));
        assert!(!fetched.is_fresh(now + Duration::from_secs(300)));
    }

    #[rocket::async_test]
    async fn accepts_signed_token_and_caches_keys() {
        let (verifier, fetches) = verifier(Some(JWKS));

        let user = verifier.verify(&sign(&id_token("u1"), KID)).await.unwrap();
        assert_eq!(
            user,
            User {
                uid: "u1".to_owned(),
                email: Some("u1-email".to_owned()),
            }
        );

        let user = verifier.verify(&sign(&id_token("u2"), KID)).await.unwrap();
        assert_eq!(user.uid, "u2");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[rocket::async_test]
    async fn rejects_tokens_failing_claim_checks() {
        let (verifier, _) = verifier(Some(JWKS));

        let mut wrong_audience = id_token("u1");
        wrong_audience.aud = "someone-elses-project".to_owned();
        let mut wrong_issuer = id_token("u1");
        wrong_issuer.iss = "https://accounts.example.com".to_owned();
        let mut expired = id_token("u1");
        expired.iat = now() - 7200;
        expired.exp = now() - 3600;
        let empty_subject = id_token("");

        for (case, claims) in [
            ("audience", wrong_audience),
            ("issuer", wrong_issuer),
            ("expired", expired),
            ("subject", empty_subject),
        ] {
            let err = verifier.verify(&sign(&claims, KID)).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidToken(_)), "{case}: {err}");
        }
    }

    #[rocket::async_test]
    async fn rejects_tampered_signature() {
        let (verifier, _) = verifier(Some(JWKS));
        let token = sign(&id_token("u1"), KID);

        let (unsigned, signature) = token.rsplit_once('.').unwrap();
        let mut signature = signature.to_owned();
        let flipped = if signature.as_bytes()[10] == b'A' { "B" } else { "A" };
        signature.replace_range(10..11, flipped);

        let err = verifier
            .verify(&format!("{unsigned}.{signature}"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[rocket::async_test]
    async fn unknown_key_refetches_at_most_once_per_interval() {
        let (verifier, fetches) = verifier(Some(JWKS));

        for _ in 0..3 {
            let err = verifier
                .verify(&sign(&id_token("u1"), "rotated-key"))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidToken(_)));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        verifier.verify(&sign(&id_token("u1"), KID)).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[rocket::async_test]
    async fn failed_fetch_is_not_retried_immediately() {
        let (verifier, fetches) = verifier(None);
        let token = sign(&id_token("u1"), KID);

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(_)));
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[rocket::async_test]
    async fn rejects_malformed_token() {
        let (verifier, fetches) = verifier(Some(JWKS));
        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[rocket::async_test]
    async fn rejects_symmetric_token() {
        #[derive(Serialize)]
        struct Forged {
            sub: &'static str,
            exp: u64,
        }

        let token = encode(
            &Header::default(),
            &Forged {
                sub: "u1",
                exp: now() + 3600,
            },
            &EncodingKey::from_secret(b"guessable"),
        )
        .unwrap();

        let (verifier, _) = verifier(Some(JWKS));
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }
}
