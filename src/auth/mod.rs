//! # QuickConsult Auth Module
//!
//! Federated sign-in and the dual-token credential scheme.
//!
//! ## Architecture
//!
//! - **Federation**: external assertion → canonical [`Identity`]
//! - **Credentials**: stateless access/refresh token pair
//! - **Cookies**: token transport over HTTP
//!
//! Credential failures stop at the boundary. Session logic only ever
//! sees an authenticated identity id.

pub mod cookies;
pub mod credentials;
pub mod errors;
pub mod federation;
pub mod identity;

pub use cookies::{CookieConfig, TokenCookies};
pub use credentials::{Claims, CredentialAuthority, CredentialConfig, TokenKind, TokenPair};
pub use errors::{AuthError, AuthResult};
pub use federation::{FederationConfig, IdentityFederationGateway, SignedAssertionVerifier};
pub use identity::{Identity, IdentityAssertion, Provider, Role};
