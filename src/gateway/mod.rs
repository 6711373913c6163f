//! Socket gateway and admin HTTP API
//!
//! Credentials are verified before a socket is upgraded. Each upgraded
//! connection gets a writer task, a read loop and a driver for its tickers,
//! all scoped to one cancellation token.

pub mod auth;
pub mod routes;
pub mod server;
pub mod session_socket;
pub mod socket;
pub mod state;
pub mod ticket_socket;

pub use auth::{CredentialVerifier, JwtVerifier};
pub use routes::{router, ApiError};
pub use server::{GatewayConfig, GatewayServer};
pub use state::GatewayState;
