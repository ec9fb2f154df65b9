//! Bearer token authentication.
//!
//! Three independent schemes sit behind one orchestrator:
//!
//! - **admin**: HMAC tokens the service issues to itself
//! - **oidc**: tokens from an external OpenID Connect provider, verified
//!   against keys resolved once at startup (optionally through a proxy)
//! - **cluster**: anything else, checked by presenting it to the cluster's
//!   own authentication
//!
//! A token's unverified `iss` claim selects exactly one scheme. See
//! [`authenticator`] for the full flow.

pub mod admin;
pub mod authenticator;
pub mod claims;
pub mod cluster;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod oidc;
pub mod trust;

pub use admin::{AdminTokenSigner, AdminVerifier, HmacAdminVerifier};
pub use authenticator::{Authentication, Authenticator, AuthenticatorBuilder, bearer_token};
pub use cluster::{ClusterVerifier, SelfReviewClusterVerifier};
pub use discovery::{Discovery, KeySet, discover};
pub use error::AuthError;
pub use identity::{Identity, Scheme, ServiceAccountRef, ServiceAccounts};
pub use middleware::authenticate;
pub use oidc::{ClaimMappingResolver, JwksOidcVerifier, OidcVerifier, ServiceAccountResolver};
