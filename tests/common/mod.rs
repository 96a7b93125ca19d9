//! Shared fixtures for integration tests.
//!
//! Every fixture owns a real SQLite file in a temp directory.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tempfile::TempDir;

use quickconsult::auth::{Identity, Provider, Role};
use quickconsult::config::AppConfig;
use quickconsult::http_server::AppState;
use quickconsult::store::{IdentityRepository, SqliteStore};

pub const ACCESS_SECRET: &str = "integration-access-secret";
pub const REFRESH_SECRET: &str = "integration-refresh-secret";
pub const BROKER_SECRET: &str = "integration-broker-secret";

/// Valid configuration pointing at a database inside `dir`
pub fn test_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.credentials.secret_key = ACCESS_SECRET.to_string();
    config.credentials.refresh_secret_key = REFRESH_SECRET.to_string();
    config.federation.broker_secret = BROKER_SECRET.to_string();
    config.database.path = dir.path().join("quickconsult.db");
    config.database.pool_size = 4;
    config.cookies.secure = false;
    config.server.cors_origins = vec![];
    config
}

pub struct Fixture {
    pub dir: TempDir,
    pub config: AppConfig,
    pub store: Arc<SqliteStore>,
    pub state: Arc<AppState>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        config.validate().unwrap();

        let store = Arc::new(
            SqliteStore::open(&config.database.path, config.database.pool_size).unwrap(),
        );
        let state = Arc::new(AppState::new(&config, store.clone()));
        Self {
            dir,
            config,
            store,
            state,
        }
    }

    /// Insert an active identity linked to its role's provider
    pub fn identity(&self, email: &str, role: Role) -> Identity {
        let identity = Identity::new(email.to_string(), None, role);
        let provider = match role {
            Role::Expert => Provider::Linkedin,
            _ => Provider::Google,
        };
        self.store
            .create_identity_with_link(&identity, provider, &format!("sub-{}", identity.id))
            .unwrap();
        identity
    }

    /// Access token for an identity
    pub fn access_token(&self, identity: &Identity) -> String {
        self.state
            .credentials
            .issue(identity.id, identity.role)
            .unwrap()
            .access_token
    }
}

/// Assertion as the OAuth broker would sign it
pub fn sign_assertion(provider: &str, sub: &str, email: &str, name: Option<&str>) -> String {
    let claims = json!({
        "provider": provider,
        "sub": sub,
        "email": email,
        "name": name,
        "iss": "quickconsult-oauth",
        "exp": (Utc::now() + Duration::minutes(5)).timestamp(),
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(BROKER_SECRET.as_bytes()),
    )
    .unwrap()
}
