//! Framework-independent request guards: IP blocking, WAF-delegated check
//! logging, GDPR consent, and route permission enforcement.

use crate::audit::{AuditService, SecurityEvent};
use crate::rbac::PermissionTable;
use dynamis_core::config::{GdprConfig, GeoRestrictionConfig, WafConfig};
use dynamis_core::{DynamisError, DynamisResult};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Headers added to every response.
pub const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("X-XSS-Protection", "1; mode=block"),
    ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
    ("Content-Security-Policy", "default-src 'self'"),
];

pub const CONSENT_HEADER: &str = "x-data-processing-consent";

/// The parts of an incoming request the guards inspect.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub client_ip: IpAddr,
    headers: BTreeMap<String, String>,
}

impl RequestMeta {
    pub fn new(client_ip: IpAddr) -> Self {
        Self {
            client_ip,
            headers: BTreeMap::new(),
        }
    }

    /// Header names are stored lower-cased.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.get_header("user-agent")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    Blocked { reason: String },
}

/// Rejects blocked client IPs and records geo checks.
pub struct SecurityGuard {
    blocked_ips: HashSet<IpAddr>,
    geo: GeoRestrictionConfig,
    audit: Arc<AuditService>,
}

impl SecurityGuard {
    pub fn new(config: &WafConfig, audit: Arc<AuditService>) -> DynamisResult<Self> {
        let blocked_ips = config
            .blocked_ips
            .iter()
            .map(|ip| {
                ip.parse::<IpAddr>()
                    .map_err(|e| DynamisError::config(format!("invalid blocked IP `{ip}`: {e}")))
            })
            .collect::<DynamisResult<HashSet<_>>>()?;
        Ok(Self {
            blocked_ips,
            geo: config.geo_restrictions.clone(),
            audit,
        })
    }

    /// Geographic enforcement happens in the firewall; this only records the
    /// request with the country rules it is subject to.
    pub fn inspect(&self, request: &RequestMeta) -> DynamisResult<GuardDecision> {
        if self.blocked_ips.contains(&request.client_ip) {
            warn!(client_ip = %request.client_ip, "Blocked IP rejected");
            return Ok(GuardDecision::Blocked {
                reason: "IP address blocked".to_string(),
            });
        }

        if self.geo.enabled {
            self.audit.log_security_event(
                &SecurityEvent::new("geo_check", "request", "api")
                    .ip(request.client_ip.to_string())
                    .user_agent(request.user_agent().map(str::to_string))
                    .changes(json!({
                        "allowed_countries": self.geo.allowed_countries,
                        "blocked_countries": self.geo.blocked_countries,
                    })),
            )?;
        }
        Ok(GuardDecision::Allowed)
    }

    pub fn security_headers(&self) -> &'static [(&'static str, &'static str)] {
        &SECURITY_HEADERS
    }
}

/// Records rate-limit checks; the firewall applies the configured limit.
pub struct RateLimitGuard {
    limit: u32,
    window_secs: u64,
    audit: Arc<AuditService>,
}

impl RateLimitGuard {
    pub fn new(config: &WafConfig, audit: Arc<AuditService>) -> Self {
        Self {
            limit: config.rate_limit,
            window_secs: config.rate_limit_window_secs,
            audit,
        }
    }

    pub fn check(&self, request: &RequestMeta) -> DynamisResult<bool> {
        self.audit.log_security_event(
            &SecurityEvent::new("rate_limit_check", "request", "api")
                .ip(request.client_ip.to_string())
                .changes(json!({ "limit": self.limit, "window_secs": self.window_secs })),
        )?;
        Ok(true)
    }
}

/// Consent-header check and data-processing records.
pub struct GdprGuard {
    consent_required: bool,
    audit: Arc<AuditService>,
}

impl GdprGuard {
    pub fn new(config: &GdprConfig, audit: Arc<AuditService>) -> Self {
        Self {
            consent_required: config.consent_required,
            audit,
        }
    }

    /// `true` when consent is not required or the consent header is exactly `true`.
    pub fn check_consent(&self, request: &RequestMeta) -> bool {
        if !self.consent_required {
            return true;
        }
        request.get_header(CONSENT_HEADER) == Some("true")
    }

    pub fn log_data_processing(
        &self,
        user_id: &str,
        data_type: &str,
        purpose: &str,
    ) -> DynamisResult<()> {
        self.audit.log_gdpr_event(
            "data_processing",
            user_id,
            "process_data",
            data_type,
            json!({ "purpose": purpose }),
        )
    }
}

/// Result of a route access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied {
        required_permissions: Vec<String>,
        route: String,
    },
}

/// Route prefix → required permissions, evaluated against the permission table.
pub struct RouteGuard {
    table: Arc<PermissionTable>,
    routes: Vec<(String, Vec<String>)>,
}

impl RouteGuard {
    pub fn new(table: Arc<PermissionTable>) -> Self {
        Self {
            table,
            routes: Vec::new(),
        }
    }

    pub fn require<I, S>(mut self, prefix: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.push((
            prefix.to_string(),
            permissions.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Rules for the management API under `api_prefix`.
    pub fn with_default_routes(table: Arc<PermissionTable>, api_prefix: &str) -> Self {
        Self::new(table)
            .require(&format!("{api_prefix}/users"), ["manage_users"])
            .require(&format!("{api_prefix}/roles"), ["manage_roles"])
            .require(&format!("{api_prefix}/billing"), ["manage_billing"])
            .require(&format!("{api_prefix}/settings"), ["manage_settings"])
            .require(&format!("{api_prefix}/analytics"), ["view_analytics"])
            .require(&format!("{api_prefix}/audit-logs"), ["view_audit_logs"])
            .require(&format!("{api_prefix}/security/keys"), ["manage_encryption_keys"])
            .require(&format!("{api_prefix}/security"), ["manage_security"])
            .require(&format!("{api_prefix}/integrations"), ["manage_integrations"])
    }

    /// Longest matching prefix wins; unmatched routes are open.
    pub fn check_access(&self, route: &str, role: &str) -> DynamisResult<AccessDecision> {
        let rule = self
            .routes
            .iter()
            .filter(|(prefix, _)| route.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());

        let Some((_, required)) = rule else {
            return Ok(AccessDecision::Allowed);
        };

        if self.table.has_permission(role, required.as_slice())? {
            debug!(route, role, "Route access granted");
            Ok(AccessDecision::Allowed)
        } else {
            Ok(AccessDecision::Denied {
                required_permissions: required.clone(),
                route: route.to_string(),
            })
        }
    }
}

/// Whether a token's permission claims cover every required permission.
pub fn verify_claims<G: AsRef<str>, R: AsRef<str>>(granted: &[G], required: &[R]) -> bool {
    required
        .iter()
        .all(|r| granted.iter().any(|g| g.as_ref() == r.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryLogService;
    use dynamis_core::config::AuditConfig;

    fn audit(log: Arc<MemoryLogService>) -> Arc<AuditService> {
        Arc::new(AuditService::new(log, AuditConfig::default(), GdprConfig::default()))
    }

    fn request(ip: &str) -> RequestMeta {
        RequestMeta::new(ip.parse().unwrap()).header("User-Agent", "Mozilla/5.0")
    }

    #[test]
    fn test_blocked_ip_rejected_without_logging() {
        let log = Arc::new(MemoryLogService::new());
        let config = WafConfig {
            blocked_ips: vec!["198.51.100.4".into()],
            ..WafConfig::default()
        };
        let guard = SecurityGuard::new(&config, audit(log.clone())).unwrap();

        let decision = guard.inspect(&request("198.51.100.4")).unwrap();
        assert!(matches!(decision, GuardDecision::Blocked { .. }));
        assert_eq!(log.count_stream("security-"), 0);

        let decision = guard.inspect(&request("203.0.113.9")).unwrap();
        assert_eq!(decision, GuardDecision::Allowed);
        let events = log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.message["event_type"], "geo_check");
        assert_eq!(events[0].1.message["user_agent"], "Mozilla/5.0");
        assert_eq!(
            events[0].1.message["changes"]["allowed_countries"],
            json!(["US", "CA", "GB", "EU"])
        );
        assert_eq!(events[0].1.message["changes"]["blocked_countries"], json!([]));
        assert_eq!(guard.security_headers().len(), 5);
    }

    #[test]
    fn test_geo_logging_disabled() {
        let log = Arc::new(MemoryLogService::new());
        let mut config = WafConfig::default();
        config.geo_restrictions.enabled = false;
        let guard = SecurityGuard::new(&config, audit(log.clone())).unwrap();
        assert_eq!(guard.inspect(&request("203.0.113.9")).unwrap(), GuardDecision::Allowed);
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_invalid_blocked_ip_is_configuration_error() {
        let config = WafConfig {
            blocked_ips: vec!["not-an-ip".into()],
            ..WafConfig::default()
        };
        let err = SecurityGuard::new(&config, audit(Arc::new(MemoryLogService::new())))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rate_limit_check_logs_and_allows() {
        let log = Arc::new(MemoryLogService::new());
        let guard = RateLimitGuard::new(&WafConfig::default(), audit(log.clone()));
        assert!(guard.check(&request("192.0.2.1")).unwrap());
        let (_, event) = &log.events()[0];
        assert_eq!(event.message["event_type"], "rate_limit_check");
        assert_eq!(event.message["changes"]["limit"], 2000);
    }

    #[test]
    fn test_consent_header() {
        let log = Arc::new(MemoryLogService::new());
        let guard = GdprGuard::new(&GdprConfig::default(), audit(log.clone()));
        assert!(guard.check_consent(&request("192.0.2.1").header("X-Data-Processing-Consent", "true")));
        assert!(!guard.check_consent(&request("192.0.2.1").header("X-Data-Processing-Consent", "yes")));
        assert!(!guard.check_consent(&request("192.0.2.1")));

        let relaxed = GdprGuard::new(
            &GdprConfig {
                consent_required: false,
                ..GdprConfig::default()
            },
            audit(log.clone()),
        );
        assert!(relaxed.check_consent(&request("192.0.2.1")));

        guard.log_data_processing("u-1", "financial", "invoicing").unwrap();
        assert_eq!(log.count_stream("gdpr-"), 1);
    }

    #[test]
    fn test_route_guard() {
        let guard = RouteGuard::with_default_routes(Arc::new(PermissionTable::standard()), "/api/v1");

        assert_eq!(
            guard.check_access("/api/v1/billing/invoices", "owner").unwrap(),
            AccessDecision::Allowed
        );
        assert!(matches!(
            guard.check_access("/api/v1/billing", "admin").unwrap(),
            AccessDecision::Denied { .. }
        ));

        // Longest prefix: key management needs more than manage_security.
        assert!(matches!(
            guard.check_access("/api/v1/security/keys", "owner").unwrap(),
            AccessDecision::Allowed
        ));
        assert!(matches!(
            guard.check_access("/api/v1/security/keys", "admin").unwrap(),
            AccessDecision::Denied { .. }
        ));

        // Open route.
        assert_eq!(
            guard.check_access("/api/v1/health", "team_member").unwrap(),
            AccessDecision::Allowed
        );

        // Unknown role on a guarded route is a configuration error.
        assert!(guard
            .check_access("/api/v1/users", "guest")
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_verify_claims() {
        let granted = ["view_projects", "view_teams"];
        assert!(verify_claims(&granted, &["view_projects"]));
        assert!(!verify_claims(&granted, &["manage_projects"]));
        assert!(verify_claims::<_, &str>(&granted, &[]));
    }
}
