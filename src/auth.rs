//! Password hashing and cookie sessions.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::AppError;
use crate::store::SqliteStore;

pub const SESSION_COOKIE: &str = "session";
pub const SESSION_TTL_DAYS: i64 = 7;

const PBKDF2_ITERATIONS: u32 = 120_000;
const PBKDF2_ALGORITHM: &str = "sha256";
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Stored as `salt_hex$iterations$sha256$hash_hex`.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = derive(password, &salt, PBKDF2_ITERATIONS);
    format!(
        "{}${}${}${}",
        hex::encode(salt),
        PBKDF2_ITERATIONS,
        PBKDF2_ALGORITHM,
        hex::encode(key)
    )
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let fields: Vec<&str> = stored.split('$').collect();
    let [salt_hex, iterations, algorithm, hash_hex] = fields.as_slice() else {
        return false;
    };
    if *algorithm != PBKDF2_ALGORITHM {
        return false;
    }
    let (Ok(salt), Ok(iterations), Ok(expected)) =
        (hex::decode(salt_hex), iterations.parse::<u32>(), hex::decode(hash_hex))
    else {
        return false;
    };
    if expected.len() != KEY_LEN {
        return false;
    }
    let derived = derive(password, &salt, iterations);
    derived[..].ct_eq(&expected[..]).into()
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

pub fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn session_cookie(session_id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Username/password verification and cookie-to-user resolution.
#[derive(Clone)]
pub struct Auth {
    store: SqliteStore,
}

impl Auth {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    pub async fn verify(&self, username: &str, password: &str) -> Result<Option<i64>, AppError> {
        let Some((user_id, stored)) = self.store.find_credentials(username).await? else {
            return Ok(None);
        };
        let password = password.to_string();
        // pbkdf2 runs on the blocking pool
        let ok = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(ok.then_some(user_id))
    }

    /// Creates a session row and returns the jar carrying its cookie.
    pub async fn start_session(&self, jar: CookieJar, user_id: i64) -> Result<CookieJar, AppError> {
        let session_id = new_session_id();
        self.store
            .create_session(&session_id, user_id, chrono::Duration::days(SESSION_TTL_DAYS))
            .await?;
        Ok(jar.add(session_cookie(session_id)))
    }

    pub async fn end_session(&self, jar: CookieJar) -> Result<CookieJar, AppError> {
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            self.store.delete_session(cookie.value()).await?;
        }
        Ok(jar.remove(Cookie::build(SESSION_COOKIE).path("/")))
    }

    /// The logged-in user, if any. Lookup failures count as anonymous.
    pub async fn current_user(&self, jar: &CookieJar) -> Option<i64> {
        let session_id = jar.get(SESSION_COOKIE)?.value().to_string();
        match self.store.session_user(&session_id).await {
            Ok(user) => user,
            Err(e) => {
                warn!("session lookup failed: {}", e);
                None
            }
        }
    }

    pub async fn require_user(&self, jar: &CookieJar) -> Result<i64, AppError> {
        self.current_user(jar).await.ok_or_else(AppError::unauthenticated)
    }
}

pub async fn hash_password_blocking(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))
}
