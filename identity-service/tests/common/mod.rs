//! Shared scaffolding for the integration tests. The app runs against
//! the in-memory store and the mock SMS provider, so no infrastructure
//! is needed.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;

use identity_service::{
    build_router,
    config::{
        AttemptConfig, CookieConfig, Environment, GrantConfig, IdentityConfig, MongoConfig,
        RateLimitConfig, SecurityConfig,
    },
    services::{
        AttemptService, GrantService, IdentityService, IdentityStore, MemoryDenyList, MemoryStore,
        MockSmsService, OrgGraphValidator, OrganizationService, SessionManager,
    },
    AppState,
};
use service_core::middleware::rate_limit::create_ip_rate_limiter;

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub sms: Arc<MockSmsService>,
}

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        mongodb: MongoConfig {
            uri: "mongodb://unused".to_string(),
            database: "unused".to_string(),
        },
        cookie: CookieConfig {
            secret: "integration-test-cookie-secret".to_string(),
            session_lifetime_hours: 1,
        },
        grant: GrantConfig {
            signing_secret: "integration-test-grant-secret".to_string(),
            max_seconds_validity: 3600,
        },
        attempt: AttemptConfig {
            attempt_lifetime_seconds: 600,
            sms_code_lifetime_seconds: 300,
            max_code_retries: 3,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            register_attempts: 1000,
            register_window_seconds: 60,
            global_ip_limit: 10000,
            global_ip_window_seconds: 60,
        },
    }
}

pub fn spawn_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let sms = Arc::new(MockSmsService::new());

    let store_dyn: Arc<dyn IdentityStore> = store.clone();
    let attempts = Arc::new(AttemptService::new(&config.attempt));
    let sessions = Arc::new(SessionManager::new(&config.cookie).expect("session manager"));
    let graph = OrgGraphValidator::new(store_dyn.clone());
    let grants = GrantService::new(
        &config.grant,
        graph.clone(),
        Arc::new(MemoryDenyList::new()),
    );
    let identity = IdentityService::new(store_dyn.clone(), attempts.clone(), sms.clone());
    let organizations = OrganizationService::new(store_dyn.clone(), graph.clone());

    let state = AppState {
        config: config.clone(),
        store: store_dyn,
        attempts,
        sessions,
        grants,
        graph,
        identity,
        organizations,
        login_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        ),
        register_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.register_attempts,
            config.rate_limit.register_window_seconds,
        ),
        ip_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        ),
    };

    TestApp {
        router: build_router(state),
        store,
        sms,
    }
}

impl TestApp {
    pub async fn request(&self, req: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(req)
            .await
            .expect("request failed")
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request build"),
        )
        .await
    }

    pub async fn post_json_with_cookie(
        &self,
        uri: &str,
        cookie: &str,
        body: Value,
    ) -> Response<Body> {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, cookie)
                .body(Body::from(body.to_string()))
                .expect("request build"),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .expect("request build"),
        )
        .await
    }

    pub async fn get_with_cookie(&self, uri: &str, cookie: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .expect("request build"),
        )
        .await
    }

    pub async fn delete_with_cookie(&self, uri: &str, cookie: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .expect("request build"),
        )
        .await
    }

    /// Register a user and complete phone confirmation. Returns nothing;
    /// the user ends up active with a verified phone number.
    pub async fn register_active_user(&self, username: &str, password: &str) {
        let response = self
            .post_json(
                "/register",
                serde_json::json!({
                    "username": username,
                    "password": password,
                    "phonenumber": "+3212345678",
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json(response).await;
        let token = body["token"].as_str().expect("attempt token").to_string();

        let code = self.sms.last_code().expect("sms code sent");
        let response = self
            .post_json(
                "/registersmsconfirmation",
                serde_json::json!({ "token": token, "smscode": code }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    /// Log in with password only and return the session cookie value.
    /// The user must have no second factor configured beyond SMS; the
    /// SMS step is completed with the mock provider's recorded code.
    pub async fn login_session(&self, username: &str, password: &str) -> String {
        let response = self
            .post_json(
                "/login",
                serde_json::json!({ "username": username, "password": password }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let immediate = response.headers().contains_key(header::SET_COOKIE);
        let cookie = if immediate {
            Some(session_cookie(&response))
        } else {
            None
        };
        let body = read_json(response).await;
        if let Some(cookie) = cookie {
            return cookie;
        }

        let token = body["token"].as_str().expect("attempt token").to_string();
        let code = self.sms.last_code().expect("sms code sent");
        let response = self
            .post_json(
                "/loginsmsconfirmation",
                serde_json::json!({ "token": token, "smscode": code }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        session_cookie(&response)
    }
}

/// Extract the session cookie pair from a Set-Cookie header.
pub fn session_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("set-cookie header")
        .to_string()
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
