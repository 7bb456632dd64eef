//! Security primitives for the Dynamis backend: role-based permission checks,
//! field-level encryption at rest, key management, audit logging,
//! request guards, and bearer-token verification.

pub mod audit;
pub mod encryption;
pub mod guard;
pub mod kms;
pub mod rbac;
pub mod token;

pub use audit::{AuditService, LogService, MemoryLogService, SecurityEvent, TracingLogService};
pub use encryption::{FieldEncryptor, SensitiveFieldMap};
pub use guard::{GdprGuard, RateLimitGuard, RouteGuard, SecurityGuard};
pub use kms::{KeyAdministration, KeyManagementProvider, LocalKeyProvider};
pub use rbac::{PermissionTable, Role};
pub use token::{TokenClaims, TokenVerifier};
