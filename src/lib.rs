//! Permission resolution engine for the Runway talent marketplace.
//!
//! Request handlers call [`PermissionResolver::has_permission`] /
//! [`PermissionResolver::check_domain_permission`] with an identity context
//! and a `resource.action.scope` permission string; the engine aggregates
//! role grants (permission sets merged, inheritance expanded), applies
//! per-user overrides with deny-wins semantics, honors time-boxed emergency
//! access, caches resolved sets, and audits every decision.

pub mod audit;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod expand;
pub mod models;
pub mod pattern;
pub mod resolver;
pub mod snapshot;
pub mod store;

// Re-export the types callers touch on every check.
pub use config::EngineConfig;
pub use errors::{AccessError, AccessResult};
pub use models::{CheckContext, Decision, DecisionSource, DomainType};
pub use resolver::PermissionResolver;
