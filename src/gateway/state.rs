//! Shared state handed to every gateway handler

use super::auth::CredentialVerifier;
use crate::admin::SessionAdmin;
use crate::matchmaker::Matchmaker;
use std::sync::Arc;

#[derive(Clone)]
pub struct GatewayState {
    pub matchmaker: Arc<Matchmaker>,
    pub admin: SessionAdmin,
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Outbound frames buffered per connection
    pub outbound_buffer: usize,
}

impl GatewayState {
    pub fn new(
        matchmaker: Arc<Matchmaker>,
        verifier: Arc<dyn CredentialVerifier>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            admin: SessionAdmin::new(matchmaker.clone()),
            matchmaker,
            verifier,
            outbound_buffer,
        }
    }
}
