//! Authorization: the `/auth` webhook and outbound backend authentication.

pub mod backend;
pub mod ip;
pub mod webhook;

pub use backend::{BackendAuth, SignedAssertion, WebhookAuth};
pub use ip::{AllowedSources, NetworkRule};
pub use webhook::{
    ANONYMOUS_ROLE, AuthOutcome, Authorizer, DEFAULT_ROLE, FixedRole, RoleDecision, RoleResolver,
    resolve_source_ip,
};
