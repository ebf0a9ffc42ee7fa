//! HTTP plumbing for the course selection portal.
//!
//! This module provides the `Transport` seam (with the reqwest-backed
//! `HttpTransport`), the token-injecting `PortalClient`, and the positional
//! table extraction the portal's server-rendered pages need.

pub mod client;
pub mod error;
pub mod table;
pub mod transport;

pub use client::PortalClient;
pub use error::ApiError;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, Transport};
