//! Credential verification for ticket and session sockets
//!
//! Both socket kinds send `Authorization: Epic-Signed <scheme> <a> <b>`.
//! Tickets split their token across the last two segments; sessions put
//! their id in the third segment and the whole token in the fourth.
//! Verification happens before the upgrade and never touches a registry.

use crate::config::AuthSettings;
use crate::error::{MatchmakingError, Result};
use crate::types::{ServerAttributes, SessionId, TicketAttributes};
use crate::utils::split_party_ids;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;

/// Marker of the signed authorization header
pub const AUTH_PREFIX: &str = "Epic-Signed";

/// Verifies socket credentials into queue or server attributes
pub trait CredentialVerifier: Send + Sync {
    /// Verify a ticket socket's authorization header
    fn verify_ticket(&self, header: &str) -> Result<TicketAttributes>;

    /// Verify a session socket's authorization header
    fn verify_session(&self, header: &str) -> Result<(SessionId, ServerAttributes)>;
}

/// `fillTeam` arrives either as a JSON boolean or as a string
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
enum FlexibleFlag {
    Bool(bool),
    Text(String),
}

impl Default for FlexibleFlag {
    fn default() -> Self {
        FlexibleFlag::Bool(false)
    }
}

impl FlexibleFlag {
    fn as_bool(&self) -> bool {
        match self {
            FlexibleFlag::Bool(value) => *value,
            FlexibleFlag::Text(text) => text.eq_ignore_ascii_case("true"),
        }
    }
}

/// Claim set of a ticket token
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TicketClaims {
    account_id: String,
    bucket_id: String,
    build_unique_id: String,
    exp: f64,
    iat: f64,
    jti: String,
    fill_team: FlexibleFlag,
    party_player_ids: String,
    playlist: String,
    region: String,
    version: String,
}

impl From<TicketClaims> for TicketAttributes {
    fn from(claims: TicketClaims) -> Self {
        let mut party_member_ids = split_party_ids(&claims.party_player_ids);
        if party_member_ids.is_empty() {
            party_member_ids.push(claims.account_id.clone());
        }

        TicketAttributes {
            account_id: claims.account_id,
            region: claims.region,
            playlist: claims.playlist,
            version: claims.version,
            build_id: claims.build_unique_id,
            bucket_id: claims.bucket_id,
            party_member_ids,
            fill_team: claims.fill_team.as_bool(),
            expires_at: claims.exp as i64,
            issued_at: claims.iat as i64,
            jti: claims.jti,
        }
    }
}

/// Claim set of a session token
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SessionClaims {
    bucket_id: String,
    build_unique_id: String,
    region: String,
    version: String,
    exp: f64,
    iat: f64,
    jti: String,
    session_id: Option<String>,
}

impl From<SessionClaims> for ServerAttributes {
    fn from(claims: SessionClaims) -> Self {
        ServerAttributes {
            bucket_id: claims.bucket_id,
            region: claims.region,
            version: claims.version,
            build_id: claims.build_unique_id,
            expires_at: claims.exp as i64,
            issued_at: claims.iat as i64,
            jti: claims.jti,
        }
    }
}

/// Split a signed header into its third and fourth segments
fn split_header<'a>(header: &'a str, scheme: &str) -> Result<(&'a str, &'a str)> {
    let parts: Vec<&str> = header.splitn(4, ' ').collect();
    if parts.len() != 4 || parts[0] != AUTH_PREFIX || parts[1] != scheme {
        return Err(auth_failure("malformed authorization header"));
    }
    if parts[2].is_empty() || parts[3].is_empty() {
        return Err(auth_failure("empty credential segment"));
    }
    Ok((parts[2], parts[3]))
}

/// Token carried by a ticket header: third segment, a dot, then the first
/// word of the fourth
pub fn ticket_token(header: &str, scheme: &str) -> Result<String> {
    let (head, tail) = split_header(header, scheme)?;
    let signature = tail.split(' ').next().unwrap_or_default();
    Ok(format!("{}.{}", head, signature))
}

/// Session id and token carried by a session header
pub fn session_credentials<'a>(header: &'a str, scheme: &str) -> Result<(&'a str, &'a str)> {
    split_header(header, scheme)
}

fn auth_failure(reason: impl Into<String>) -> anyhow::Error {
    MatchmakingError::AuthFailure {
        reason: reason.into(),
    }
    .into()
}

/// HS256 verifier over a shared secret
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    ticket_scheme: String,
    session_scheme: String,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("ticket_scheme", &self.ticket_scheme)
            .field("session_scheme", &self.session_scheme)
            .field("validate_exp", &self.validation.validate_exp)
            .finish()
    }
}

impl JwtVerifier {
    pub fn new(settings: &AuthSettings) -> Result<Self> {
        if settings.jwt_secret.is_empty() {
            return Err(MatchmakingError::ConfigurationError {
                message: "JWT secret is not configured".to_string(),
            }
            .into());
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = settings.validate_expiry;
        validation.required_spec_claims = if settings.validate_expiry {
            HashSet::from(["exp".to_string()])
        } else {
            HashSet::new()
        };

        Ok(Self {
            key: DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
            validation,
            ticket_scheme: settings.ticket_scheme.clone(),
            session_scheme: settings.session_scheme.clone(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        decode::<T>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => auth_failure("token has expired"),
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    auth_failure("invalid token signature")
                }
                _ => auth_failure(format!("token validation failed: {}", e)),
            })
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify_ticket(&self, header: &str) -> Result<TicketAttributes> {
        let token = ticket_token(header, &self.ticket_scheme)?;
        let claims: TicketClaims = self.decode(&token)?;
        if claims.account_id.is_empty() {
            return Err(auth_failure("token carries no account id"));
        }
        Ok(claims.into())
    }

    fn verify_session(&self, header: &str) -> Result<(SessionId, ServerAttributes)> {
        let (session_id, token) = session_credentials(header, &self.session_scheme)?;
        let claims: SessionClaims = self.decode(token)?;
        if let Some(claimed) = claims.session_id.as_deref() {
            if claimed != session_id {
                return Err(auth_failure("session id does not match token"));
            }
        }
        Ok((session_id.to_string(), claims.into()))
    }
}
