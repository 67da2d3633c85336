//! Cookie sessions, one independent store per session type.
//!
//! Cooperating web origins share single sign-on by reading the same
//! session type while staying independently revocable: invalidating one
//! type never touches its siblings. The manager is an explicit struct
//! built once at startup and injected through `AppState`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::CookieConfig;
use crate::services::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// The logical application surfaces that carry their own cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionType {
    Normal,
    Admin,
    ApiConsole,
    Oauth,
}

impl SessionType {
    pub const ALL: [SessionType; 4] = [
        SessionType::Normal,
        SessionType::Admin,
        SessionType::ApiConsole,
        SessionType::Oauth,
    ];

    /// The cookie name this session type is stored under.
    pub fn cookie_name(&self) -> &'static str {
        match self {
            SessionType::Normal => "iyo_session",
            SessionType::Admin => "iyo_admin_session",
            SessionType::ApiConsole => "iyo_apiconsole_session",
            SessionType::Oauth => "iyo_oauth_session",
        }
    }

    fn key_label(&self) -> &'static str {
        match self {
            SessionType::Normal => "normal",
            SessionType::Admin => "admin",
            SessionType::ApiConsole => "apiconsole",
            SessionType::Oauth => "oauth",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionPayload {
    id: String,
    username: String,
    exp: i64,
}

struct SessionRecord {
    username: String,
    expires_at: DateTime<Utc>,
}

/// One cookie store: a signing key plus the registry of live sessions.
struct SessionStore {
    key: Vec<u8>,
    live: DashMap<String, SessionRecord>,
}

impl SessionStore {
    fn sign(&self, payload: &str) -> Result<String, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("session key: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }
}

pub struct SessionManager {
    stores: HashMap<SessionType, SessionStore>,
    lifetime: Duration,
}

impl SessionManager {
    /// Build one store per declared session type, with per-type keys
    /// derived from the configured cookie secret.
    pub fn new(config: &CookieConfig) -> Result<Self, ServiceError> {
        let mut stores = HashMap::new();
        for session_type in SessionType::ALL {
            let mut mac = HmacSha256::new_from_slice(config.secret.as_bytes())
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!("cookie secret: {}", e)))?;
            mac.update(session_type.key_label().as_bytes());
            stores.insert(
                session_type,
                SessionStore {
                    key: mac.finalize().into_bytes().to_vec(),
                    live: DashMap::new(),
                },
            );
        }
        Ok(Self {
            stores,
            lifetime: Duration::hours(config.session_lifetime_hours),
        })
    }

    fn store(&self, session_type: SessionType) -> &SessionStore {
        // All variants are populated in new().
        &self.stores[&session_type]
    }

    /// Establish a session for an authenticated principal; returns the
    /// cookie value.
    pub fn establish(
        &self,
        session_type: SessionType,
        username: &str,
    ) -> Result<String, ServiceError> {
        let store = self.store(session_type);
        let expires_at = Utc::now() + self.lifetime;
        let payload = SessionPayload {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            exp: expires_at.timestamp(),
        };

        store.live.insert(
            payload.id.clone(),
            SessionRecord {
                username: username.to_string(),
                expires_at,
            },
        );

        let body = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&payload)
                .map_err(|e| ServiceError::Internal(anyhow::Error::new(e)))?,
        );
        let sig = store.sign(&body)?;
        Ok(format!("{}.{}", body, sig))
    }

    /// Resolve the logged-in principal for a cookie value. Missing,
    /// malformed, expired, forged or revoked cookies all mean "no
    /// logged-in user", never an error.
    pub fn current_user(&self, session_type: SessionType, cookie: Option<&str>) -> Option<String> {
        let cookie = cookie?;
        let store = self.store(session_type);
        let (body, sig) = cookie.rsplit_once('.')?;

        let expected = store.sign(body).ok()?;
        if !bool::from(expected.as_bytes().ct_eq(sig.as_bytes())) {
            return None;
        }

        let payload: SessionPayload =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(body).ok()?).ok()?;
        if payload.exp <= Utc::now().timestamp() {
            store.live.remove(&payload.id);
            return None;
        }

        let record = store.live.get(&payload.id)?;
        if record.expires_at <= Utc::now() || record.username != payload.username {
            return None;
        }
        Some(record.username.clone())
    }

    /// Invalidate the session behind a cookie value. Only this session
    /// type is affected; siblings stay logged in unless cascaded
    /// explicitly by the caller.
    pub fn invalidate(&self, session_type: SessionType, cookie: Option<&str>) {
        let Some(cookie) = cookie else { return };
        let store = self.store(session_type);
        let Some((body, _)) = cookie.rsplit_once('.') else {
            return;
        };
        if let Ok(bytes) = URL_SAFE_NO_PAD.decode(body) {
            if let Ok(payload) = serde_json::from_slice::<SessionPayload>(&bytes) {
                store.live.remove(&payload.id);
            }
        }
    }
}
