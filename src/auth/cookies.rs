//! # Token Transport
//!
//! Access and refresh tokens travel as HTTP-only, `SameSite=Lax` cookies.
//! Cross-origin API callers may send the access token as a bearer header
//! instead. The cookie wins when both are present.

use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::credentials::{CredentialConfig, TokenPair};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Cookie attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieConfig {
    /// Cookie domain; empty means host-only
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Send only over HTTPS
    #[serde(default = "default_secure")]
    pub secure: bool,
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_secure() -> bool {
    true
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            secure: default_secure(),
        }
    }
}

/// Builds and reads the token cookies
#[derive(Debug, Clone)]
pub struct TokenCookies {
    config: CookieConfig,
    access_max_age: Duration,
    refresh_max_age: Duration,
}

impl TokenCookies {
    /// Cookie max-age follows each token's lifetime
    pub fn new(config: CookieConfig, credentials: &CredentialConfig) -> Self {
        Self {
            config,
            access_max_age: credentials.access_token_ttl,
            refresh_max_age: credentials.refresh_token_ttl,
        }
    }

    fn cookie(&self, name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
        let mut builder = Cookie::build((name, value))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.config.secure)
            .path("/")
            .max_age(cookie::time::Duration::seconds(max_age.num_seconds()));
        if !self.config.domain.is_empty() {
            builder = builder.domain(self.config.domain.clone());
        }
        builder.build()
    }

    /// Add both token cookies to the jar
    pub fn attach(&self, jar: CookieJar, pair: &TokenPair) -> CookieJar {
        jar.add(self.cookie(ACCESS_COOKIE, pair.access_token.clone(), self.access_max_age))
            .add(self.cookie(REFRESH_COOKIE, pair.refresh_token.clone(), self.refresh_max_age))
    }

    /// Expire both token cookies. Removal cookies are always sent, whether
    /// or not the request carried the tokens.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        let removal = |name: &'static str| {
            let mut cookie = self.cookie(name, String::new(), Duration::zero());
            cookie.make_removal();
            cookie
        };
        jar.add(removal(ACCESS_COOKIE)).add(removal(REFRESH_COOKIE))
    }
}

/// Access token from the `access_token` cookie, else `Authorization: Bearer`
pub fn access_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    jar.get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| bearer_token(headers))
}

pub fn refresh_token(jar: &CookieJar) -> Option<String> {
    jar.get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}
