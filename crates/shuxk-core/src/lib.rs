//! shuxk core - SSO session handling, registration window polling and course
//! selection for the SHU course selection portal.
//!
//! The pieces fit together in dependency order:
//!
//! - [`auth`]: credential, persisted [`auth::Session`] and the
//!   [`auth::Authenticator`] handshake that fills in its token
//! - [`api`]: the transport seam and the token-injecting [`api::PortalClient`]
//! - [`portal`]: [`portal::WindowPoller`] and [`portal::Submitter`]
//! - [`config`]: user configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod portal;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
