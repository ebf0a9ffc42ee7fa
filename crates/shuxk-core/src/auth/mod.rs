//! Authentication module for managing the portal session.
//!
//! This module provides:
//! - `Credential`: validated student id and password
//! - `Session`: the current token, persisted to disk with the credential
//! - `Authenticator`: the SSO login and term-selection handshake
//! - `CredentialStore`: OS keychain password cache
//!
//! Tokens are treated as stale after 25 minutes, but only the portal can
//! really tell.

pub mod authenticator;
pub mod credentials;
pub mod session;

pub use authenticator::{AuthError, AuthSettings, Authenticator};
pub use credentials::{Credential, CredentialError, CredentialStore};
pub use session::{Session, SessionData, Token};
