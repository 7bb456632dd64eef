//! Audit logging: security and GDPR events appended to an external log
//! service, user activity lookup, and data-subject export/deletion
//! orchestration.

use chrono::{DateTime, Duration, Utc};
use dynamis_core::config::{AuditConfig, GdprConfig};
use dynamis_core::{DynamisError, DynamisResult, ProviderError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// A structured event as handed to the log service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub message: Value,
}

/// Criteria for reading events back from the log service.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub stream_prefix: Option<String>,
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl LogFilter {
    fn matches(&self, stream: &str, event: &LogEvent) -> bool {
        if let Some(prefix) = &self.stream_prefix {
            if !stream.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if event.message.get("user_id").and_then(Value::as_str) != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Append-only external log service.
pub trait LogService: Send + Sync {
    fn append(&self, stream: &str, event: LogEvent) -> Result<(), ProviderError>;

    fn filter_events(&self, filter: &LogFilter) -> Result<Vec<LogEvent>, ProviderError> {
        Err(ProviderError::log(
            filter.stream_prefix.clone().unwrap_or_default(),
            "log service does not support queries",
        ))
    }
}

/// In-memory log service that keeps every event, for tests and local runs.
#[derive(Default)]
pub struct MemoryLogService {
    events: Mutex<Vec<(String, LogEvent)>>,
}

impl MemoryLogService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, LogEvent)> {
        self.events.lock().clone()
    }

    pub fn count_stream(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(stream, _)| stream.starts_with(prefix))
            .count()
    }
}

impl LogService for MemoryLogService {
    fn append(&self, stream: &str, event: LogEvent) -> Result<(), ProviderError> {
        self.events.lock().push((stream.to_string(), event));
        Ok(())
    }

    fn filter_events(&self, filter: &LogFilter) -> Result<Vec<LogEvent>, ProviderError> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|(stream, event)| filter.matches(stream, event))
            .map(|(_, event)| event.clone())
            .collect())
    }
}

/// Emits every event through `tracing` under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingLogService;

impl LogService for TracingLogService {
    fn append(&self, stream: &str, event: LogEvent) -> Result<(), ProviderError> {
        info!(
            target: "audit",
            stream = %stream,
            timestamp = %event.timestamp.to_rfc3339(),
            message = %event.message,
            "Audit event"
        );
        Ok(())
    }
}

/// A security-relevant action taken by or against the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: String,
    pub user_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub changes: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SecurityEvent {
    pub fn new(
        event_type: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            user_id: None,
            action: action.into(),
            resource: resource.into(),
            changes: None,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn changes(mut self, changes: Value) -> Self {
        self.changes = Some(changes);
        self
    }
}

/// Source of a data subject's stored records. Owned by the data layer; no
/// implementation ships in this workspace.
pub trait SubjectDataStore: Send + Sync {
    fn personal_info(&self, user_id: &str) -> DynamisResult<Value>;
    fn consent_records(&self, user_id: &str) -> DynamisResult<Vec<Value>>;
    fn processing_records(&self, user_id: &str) -> DynamisResult<Vec<Value>>;
    fn delete_personal_info(&self, user_id: &str) -> DynamisResult<()>;
    fn delete_consent_records(&self, user_id: &str) -> DynamisResult<()>;
}

/// Everything held about one data subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDataExport {
    pub user_id: String,
    pub personal_info: Value,
    pub activity_logs: Vec<Value>,
    pub consent_records: Vec<Value>,
    pub data_processing_records: Vec<Value>,
    pub exported_at: DateTime<Utc>,
}

fn daily_stream(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{prefix}-{}", now.format("%Y-%m-%d"))
}

/// Writes security and GDPR events to the log service.
pub struct AuditService {
    log: Arc<dyn LogService>,
    config: AuditConfig,
    gdpr: GdprConfig,
    store: Option<Arc<dyn SubjectDataStore>>,
}

impl AuditService {
    pub fn new(log: Arc<dyn LogService>, config: AuditConfig, gdpr: GdprConfig) -> Self {
        Self {
            log,
            config,
            gdpr,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SubjectDataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn log_group(&self) -> &str {
        &self.config.log_group_name
    }

    /// Append to `security-YYYY-MM-DD`.
    pub fn log_security_event(&self, event: &SecurityEvent) -> DynamisResult<()> {
        let now = Utc::now();
        let changes = event.changes.as_ref().filter(|_| self.config.include_changes);
        let ip_address = event.ip_address.as_ref().filter(|_| self.config.include_ip);
        let user_agent = event.user_agent.as_ref().filter(|_| self.config.include_user_agent);
        let message = json!({
            "timestamp": now.to_rfc3339(),
            "event_type": event.event_type,
            "user_id": event.user_id,
            "action": event.action,
            "resource": event.resource,
            "changes": changes,
            "ip_address": ip_address,
            "user_agent": user_agent,
        });
        self.log
            .append(&daily_stream("security", now), LogEvent { timestamp: now, message })?;
        Ok(())
    }

    /// Append to `gdpr-YYYY-MM-DD`.
    pub fn log_gdpr_event(
        &self,
        event_type: &str,
        user_id: &str,
        action: &str,
        data_type: &str,
        details: Value,
    ) -> DynamisResult<()> {
        let now = Utc::now();
        let message = json!({
            "timestamp": now.to_rfc3339(),
            "event_type": event_type,
            "user_id": user_id,
            "action": action,
            "data_type": data_type,
            "details": details,
            "gdpr_compliance": true,
        });
        self.log
            .append(&daily_stream("gdpr", now), LogEvent { timestamp: now, message })?;
        Ok(())
    }

    /// Events recorded for `user_id` between `from` and `to`, oldest first.
    pub fn user_activity(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DynamisResult<Vec<Value>> {
        let filter = LogFilter {
            stream_prefix: None,
            user_id: Some(user_id.to_string()),
            from: Some(from),
            to: Some(to),
        };
        let mut events = self.log.filter_events(&filter)?;
        events.sort_by_key(|e| e.timestamp);
        Ok(events.into_iter().map(|e| e.message).collect())
    }

    fn store(&self) -> DynamisResult<&Arc<dyn SubjectDataStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| DynamisError::config("no subject data store configured"))
    }

    /// Collect all data held for `user_id` and record the export.
    pub fn export_user_data(&self, user_id: &str) -> DynamisResult<UserDataExport> {
        let store = self.store()?;
        let now = Utc::now();
        let lookback = Duration::days(i64::from(self.gdpr.activity_lookback_days));

        let export = UserDataExport {
            user_id: user_id.to_string(),
            personal_info: store.personal_info(user_id)?,
            activity_logs: self.user_activity(user_id, now - lookback, now)?,
            consent_records: store.consent_records(user_id)?,
            data_processing_records: store.processing_records(user_id)?,
            exported_at: now,
        };

        self.log_gdpr_event(
            "data_export",
            user_id,
            "export_user_data",
            "all",
            json!({
                "export_format": self.gdpr.data_export_format,
                "retention_days": self.gdpr.data_retention_days,
            }),
        )?;
        info!(user_id = %user_id, "User data exported");
        Ok(export)
    }

    /// Erase personal data for `user_id` (right to be forgotten).
    pub fn delete_user_data(&self, user_id: &str) -> DynamisResult<()> {
        let store = self.store()?;
        store.delete_personal_info(user_id)?;

        let now = Utc::now();
        let marker = json!({
            "event_type": "data_deletion",
            "user_id": user_id,
            "data_type": "activity_logs",
            "timestamp": now.to_rfc3339(),
        });
        self.log.append(
            &daily_stream("deletion", now),
            LogEvent {
                timestamp: now,
                message: marker,
            },
        )?;

        store.delete_consent_records(user_id)?;

        self.log_gdpr_event(
            "data_deletion",
            user_id,
            "delete_user_data",
            "all",
            json!({ "reason": "GDPR right to be forgotten request" }),
        )?;
        info!(user_id = %user_id, "User data deleted");
        Ok(())
    }
}
