//! Authorization webhook decisions.
//!
//! The backend calls `GET /auth` for each request it receives, passing the
//! original request headers as query parameters. The gateway checks that the
//! call comes from an allowed address and answers with a role.
//!
//! Failure policy is asymmetric: an address mismatch is a hard `403`, while
//! any internal error degrades to [`ANONYMOUS_ROLE`] so the backend's
//! authorization flow never breaks because of the gateway.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde::Serialize;
use tracing::{debug, warn};

use super::ip::AllowedSources;
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Role returned when the resolver fails.
pub const ANONYMOUS_ROLE: &str = "anonymous";

/// Role returned by the default resolver.
pub const DEFAULT_ROLE: &str = "user";

/// Proxy headers consulted for the caller address, in priority order.
const SOURCE_IP_HEADERS: &[&str] = &["cf-connecting-ip", "x-forwarded-for", "x-real-ip"];

/// Maps the original request's headers to a role.
pub trait RoleResolver: Send + Sync {
    /// `headers` keys are lower-cased.
    fn resolve(&self, headers: &BTreeMap<String, String>) -> Result<String>;
}

/// Resolves every request to one configured role.
#[derive(Debug, Clone)]
pub struct FixedRole(String);

impl FixedRole {
    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }
}

impl Default for FixedRole {
    fn default() -> Self {
        Self::new(DEFAULT_ROLE)
    }
}

impl RoleResolver for FixedRole {
    fn resolve(&self, _headers: &BTreeMap<String, String>) -> Result<String> {
        if self.0.is_empty() {
            return Err(HeimdallError::Configuration("empty role".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Body of a successful webhook answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDecision {
    #[serde(rename = "X-Hasura-Role")]
    pub role: String,
}

/// Outcome of a webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Granted(RoleDecision),
    /// Caller address not allowed.
    Blocked,
}

/// Applies the address filter and role resolver.
#[derive(Clone)]
pub struct Authorizer {
    sources: AllowedSources,
    resolver: Arc<dyn RoleResolver>,
}

impl Authorizer {
    pub fn new(sources: AllowedSources, resolver: Arc<dyn RoleResolver>) -> Self {
        Self { sources, resolver }
    }

    pub fn sources(&self) -> &AllowedSources {
        &self.sources
    }

    /// Decide a webhook call.
    ///
    /// `params` is the parsed query string, or an error if it couldn't be
    /// parsed; parse errors take the anonymous path, not the 403 path.
    pub fn authorize(
        &self,
        source_ip: Option<&str>,
        params: Result<HashMap<String, String>>,
    ) -> AuthOutcome {
        if !self.sources.is_allowed(source_ip) {
            warn!(source_ip = source_ip.unwrap_or("-"), "webhook caller rejected");
            metrics::counter!(telemetry::AUTH_DECISIONS_TOTAL, "decision" => "blocked")
                .increment(1);
            return AuthOutcome::Blocked;
        }

        let role = params
            .map(lowercase_keys)
            .and_then(|headers| self.resolver.resolve(&headers));
        let role = match role {
            Ok(role) => {
                debug!(source_ip = source_ip.unwrap_or("-"), %role, "webhook granted");
                metrics::counter!(telemetry::AUTH_DECISIONS_TOTAL, "decision" => "granted")
                    .increment(1);
                role
            }
            Err(e) => {
                warn!(error = %e, "role resolution failed, falling back to anonymous");
                metrics::counter!(telemetry::AUTH_DECISIONS_TOTAL, "decision" => "anonymous")
                    .increment(1);
                ANONYMOUS_ROLE.to_string()
            }
        };
        AuthOutcome::Granted(RoleDecision { role })
    }
}

fn lowercase_keys(params: HashMap<String, String>) -> BTreeMap<String, String> {
    params
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect()
}

/// Caller address: the first proxy header present wins, then the socket peer.
///
/// For `X-Forwarded-For` only the first (client-most) entry is used.
pub fn resolve_source_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    SOURCE_IP_HEADERS
        .iter()
        .find_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            let first = value.split(',').next()?.trim();
            (!first.is_empty()).then(|| first.to_string())
        })
        .or_else(|| peer.map(|ip| ip.to_string()))
}
