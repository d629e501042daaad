//! How requests forwarded to the backend are authenticated.
//!
//! Two deployment modes:
//!
//! - [`WebhookAuth`]: headers pass through untouched and the backend calls
//!   the gateway's `/auth` webhook to decide a role.
//! - [`SignedAssertion`]: the gateway mints a short-lived HS256 JWT with the
//!   shared secret and sends it as `Authorization: Bearer`, so the backend
//!   verifies locally instead of calling back.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderValue, header};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::{HeimdallError, Result};

/// Claims namespace the backend reads session variables from.
pub const CLAIMS_NAMESPACE: &str = "https://hasura.io/jwt/claims";

/// Registered claims plus the backend's session namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
    #[serde(rename = "https://hasura.io/jwt/claims")]
    pub session: SessionClaims,
}

/// Session variables granted to the forwarded request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "x-hasura-default-role")]
    pub default_role: String,
    #[serde(rename = "x-hasura-allowed-roles")]
    pub allowed_roles: Vec<String>,
}

/// Decorates outbound backend requests.
pub trait BackendAuth: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Adjust outbound headers before the request is sent.
    fn apply(&self, headers: &mut HeaderMap) -> Result<()>;
}

/// Forward as-is; the backend authorizes through the webhook.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookAuth;

impl BackendAuth for WebhookAuth {
    fn name(&self) -> &str {
        "webhook"
    }

    fn apply(&self, _headers: &mut HeaderMap) -> Result<()> {
        Ok(())
    }
}

/// Mint a fresh signed assertion for every forwarded request.
pub struct SignedAssertion {
    key: EncodingKey,
    role: String,
    lifetime: Duration,
    issuer: String,
}

impl std::fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("role", &self.role)
            .field("lifetime", &self.lifetime)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl SignedAssertion {
    /// Default assertion lifetime.
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(60);

    pub fn new(secret: impl Into<Vec<u8>>, role: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(HeimdallError::Configuration(
                "signed backend auth requires a non-empty signing secret".to_string(),
            ));
        }
        let role = role.into();
        if role.trim().is_empty() {
            return Err(HeimdallError::Configuration(
                "signed backend auth requires a non-empty role".to_string(),
            ));
        }
        Ok(Self {
            key: EncodingKey::from_secret(&secret),
            role,
            lifetime: Self::DEFAULT_LIFETIME,
            issuer: "heimdall".to_string(),
        })
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Claims for a token issued at `now` (seconds since the Unix epoch).
    pub fn claims_at(&self, now: u64) -> AssertionClaims {
        AssertionClaims {
            iss: self.issuer.clone(),
            iat: now,
            exp: now.saturating_add(self.lifetime.as_secs()),
            session: SessionClaims {
                default_role: self.role.clone(),
                allowed_roles: vec![self.role.clone()],
            },
        }
    }

    /// Mint a token issued at `now` (seconds since the Unix epoch).
    pub fn mint_at(&self, now: u64) -> Result<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &self.claims_at(now), &self.key)
            .map_err(|e| HeimdallError::Signing(format!("failed to sign assertion: {e}")))
    }

    /// Mint a token issued now.
    pub fn mint(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| HeimdallError::Signing(format!("system clock before epoch: {e}")))?
            .as_secs();
        self.mint_at(now)
    }
}

impl BackendAuth for SignedAssertion {
    fn name(&self) -> &str {
        "signed"
    }

    fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        let token = self.mint()?;
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| HeimdallError::Signing(format!("token is not a valid header: {e}")))?;
        headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};

    fn decode(token: &str, secret: &[u8]) -> jsonwebtoken::errors::Result<AssertionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_issuer(&["heimdall"]);
        jsonwebtoken::decode::<AssertionClaims>(
            token,
            &DecodingKey::from_secret(secret),
            &validation,
        )
        .map(|data| data.claims)
    }

    #[test]
    fn empty_secret_rejected() {
        assert!(matches!(
            SignedAssertion::new(Vec::<u8>::new(), "user"),
            Err(HeimdallError::Configuration(_))
        ));
    }

    #[test]
    fn empty_role_rejected() {
        assert!(matches!(
            SignedAssertion::new("s3cret", " "),
            Err(HeimdallError::Configuration(_))
        ));
    }

    #[test]
    fn token_verifies_with_shared_secret() {
        let signer = SignedAssertion::new("s3cret", "user").unwrap();
        let token = signer.mint_at(1_700_000_000).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::HS256);
        assert_eq!(decode(&token, b"s3cret").unwrap(), signer.claims_at(1_700_000_000));
        assert!(decode(&token, b"other").is_err());
    }

    #[test]
    fn claims_carry_role_and_expiry() {
        let signer = SignedAssertion::new("s3cret", "user")
            .unwrap()
            .lifetime(Duration::from_secs(30));
        let claims = decode(&signer.mint_at(1_000).unwrap(), b"s3cret").unwrap();

        assert_eq!(claims.iat, 1_000);
        assert_eq!(claims.exp, 1_030);
        assert_eq!(claims.iss, "heimdall");
        assert_eq!(claims.session.default_role, "user");
        assert_eq!(claims.session.allowed_roles, ["user"]);
    }

    #[test]
    fn session_claims_use_backend_namespace() {
        let signer = SignedAssertion::new("s3cret", "editor").unwrap();
        let json = serde_json::to_value(signer.claims_at(5)).unwrap();
        assert_eq!(json[CLAIMS_NAMESPACE]["x-hasura-default-role"], "editor");
        assert_eq!(
            json[CLAIMS_NAMESPACE]["x-hasura-allowed-roles"],
            serde_json::json!(["editor"])
        );
    }

    #[test]
    fn fresh_token_passes_expiry_check() {
        let token = SignedAssertion::new("s3cret", "user").unwrap().mint().unwrap();
        let validation = Validation::new(Algorithm::HS256);
        let data = jsonwebtoken::decode::<AssertionClaims>(
            &token,
            &DecodingKey::from_secret(b"s3cret"),
            &validation,
        );
        assert!(data.is_ok());
    }

    #[test]
    fn apply_sets_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client"));
        SignedAssertion::new("s3cret", "user")
            .unwrap()
            .apply(&mut headers)
            .unwrap();
        let value = headers[header::AUTHORIZATION].to_str().unwrap();
        assert!(value.starts_with("Bearer ey"));
        assert_ne!(value, "Bearer client");
    }

    #[test]
    fn webhook_mode_leaves_headers_alone() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client"));
        WebhookAuth.apply(&mut headers).unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer client");
    }
}
