pub mod decision;
pub mod grants;
pub mod permission;
pub mod role;

pub use decision::{CheckContext, Decision, DecisionSource, DomainType, EffectivePermission, EffectivePermissions};
pub use grants::{EmergencyGrant, OverrideEffect, UserOverride};
pub use permission::{InheritanceEdge, Permission, PermissionSet};
pub use role::{Role, UserRole};
