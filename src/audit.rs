//! Audit logging for plan changes and downgrade side effects.
//!
//! Every mutation the engine performs on a subject's behalf (deactivating
//! workspaces, committing a new plan) is reported here.

use std::fmt;

/// Audit event types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    /// Upgrade committed.
    PlanUpgraded {
        subject_id: String,
        from_plan: String,
        to_plan: String,
    },
    /// Downgrade execution started.
    DowngradeStarted {
        subject_id: String,
        from_plan: String,
        to_plan: String,
    },
    /// Live resources deactivated by a downgrade step.
    ResourcesDeactivated {
        subject_id: String,
        kind: String,
        ids: Vec<String>,
    },
    /// Team members over the new limit were left in place for lazy enforcement.
    MembersOverLimit {
        subject_id: String,
        active: u64,
        limit: u64,
    },
    /// A downgrade step failed; the plan was not committed.
    DowngradeStepFailed {
        subject_id: String,
        kind: String,
        error: String,
    },
    /// Downgrade committed after every step succeeded.
    PlanDowngraded {
        subject_id: String,
        from_plan: String,
        to_plan: String,
    },
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlanUpgraded { subject_id, from_plan, to_plan } => {
                write!(f, "Plan upgraded: subject={}, from={}, to={}", subject_id, from_plan, to_plan)
            }
            Self::DowngradeStarted { subject_id, from_plan, to_plan } => {
                write!(f, "Downgrade started: subject={}, from={}, to={}", subject_id, from_plan, to_plan)
            }
            Self::ResourcesDeactivated { subject_id, kind, ids } => {
                write!(f, "Resources deactivated: subject={}, kind={}, count={}, ids=[{}]", subject_id, kind, ids.len(), ids.join(","))
            }
            Self::MembersOverLimit { subject_id, active, limit } => {
                write!(f, "Members over limit: subject={}, active={}, limit={}", subject_id, active, limit)
            }
            Self::DowngradeStepFailed { subject_id, kind, error } => {
                write!(f, "Downgrade step failed: subject={}, kind={}, error={}", subject_id, kind, error)
            }
            Self::PlanDowngraded { subject_id, from_plan, to_plan } => {
                write!(f, "Plan downgraded: subject={}, from={}, to={}", subject_id, from_plan, to_plan)
            }
        }
    }
}

/// Trait for audit logging backends.
///
/// Implement this to send events to a database, an external service, or a file.
#[allow(async_fn_in_trait)]
pub trait AuditLogger: Send + Sync {
    /// Log an audit event.
    ///
    /// Implementations should swallow their own failures so auditing never
    /// interrupts a downgrade.
    async fn log(&self, event: AuditEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditLogger;

impl AuditLogger for NoOpAuditLogger {
    async fn log(&self, _event: AuditEvent) {}
}

/// Logs events through `tracing` at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: AuditEvent) {
        tracing::info!(
            target: "tiergate::audit",
            event_type = %event_kind(&event),
            "{}", event
        );
    }
}

/// Event kind for structured logging.
pub fn event_kind(event: &AuditEvent) -> &'static str {
    match event {
        AuditEvent::PlanUpgraded { .. } => "plan_upgraded",
        AuditEvent::DowngradeStarted { .. } => "downgrade_started",
        AuditEvent::ResourcesDeactivated { .. } => "resources_deactivated",
        AuditEvent::MembersOverLimit { .. } => "members_over_limit",
        AuditEvent::DowngradeStepFailed { .. } => "downgrade_step_failed",
        AuditEvent::PlanDowngraded { .. } => "plan_downgraded",
    }
}

/// Audit logger that keeps events in memory for assertions.
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditLogger {
    events: std::sync::Arc<tokio::sync::Mutex<Vec<AuditEvent>>>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl RecordingAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(event_kind).collect()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl AuditLogger for RecordingAuditLogger {
    async fn log(&self, event: AuditEvent) {
        self.events.lock().await.push(event);
    }
}
