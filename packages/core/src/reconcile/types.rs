//! Core domain types for count reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a surgical procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcedureState {
    Scheduled,
    InitialCount,
    InProgress,
    FinalCount,
    Finalized,
    Cancelled,
}

impl ProcedureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::InitialCount => "INITIAL_COUNT",
            Self::InProgress => "IN_PROGRESS",
            Self::FinalCount => "FINAL_COUNT",
            Self::Finalized => "FINALIZED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SCHEDULED" => Some(Self::Scheduled),
            "INITIAL_COUNT" => Some(Self::InitialCount),
            "IN_PROGRESS" => Some(Self::InProgress),
            "FINAL_COUNT" => Some(Self::FinalCount),
            "FINALIZED" => Some(Self::Finalized),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal procedures are excluded from sweeps.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled)
    }
}

/// A surgical operation instance requiring instrument accountability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub id: i64,
    pub name: String,
    pub state: ProcedureState,
    pub started_at: DateTime<Utc>,
}

/// Phase at which a count observation was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountPhase {
    Initial,
    Final,
}

impl CountPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Final => "FINAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "INITIAL" => Some(Self::Initial),
            "FINAL" => Some(Self::Final),
            _ => None,
        }
    }
}

/// A single recorded instrument tally. Immutable once created — a
/// correction is a new observation, and the most recent row per
/// (procedure, instrument, phase) is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountObservation {
    pub id: i64,
    pub procedure_id: i64,
    pub instrument_id: i64,
    pub phase: CountPhase,
    pub counted_qty: i64,
    pub expected_qty: i64,
    pub counter_id: i64,
    pub recorded_at: DateTime<Utc>,
}

/// A tracked surgical instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: i64,
    pub name: String,
    pub maintenance_due: DateTime<Utc>,
    pub stock_qty: i64,
}

/// Classification of a count mismatch for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    MissingInFinal,
    ExtraInFinal,
    QuantityMismatch,
}

/// A detected mismatch between paired INITIAL/FINAL observations.
/// Derived data — never persisted by the detector itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub instrument_id: i64,
    pub kind: DiscrepancyKind,
    pub expected_qty: i64,
    pub found_qty: i64,
}

/// Alert priority, ordered least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Numeric rank used for SQL ordering (higher = more urgent).
    pub fn rank(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

/// Alert classification. One variant per domain signal; each maps to a
/// fixed priority (see `default_priority`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    MissingInFinal,
    ExtraInFinal,
    QuantityMismatch,
    MaintenanceDue,
    MaintenanceOverdue,
    CountPending,
    LongProcedure,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingInFinal => "MISSING_IN_FINAL",
            Self::ExtraInFinal => "EXTRA_IN_FINAL",
            Self::QuantityMismatch => "QUANTITY_MISMATCH",
            Self::MaintenanceDue => "MAINTENANCE_DUE",
            Self::MaintenanceOverdue => "MAINTENANCE_OVERDUE",
            Self::CountPending => "COUNT_PENDING",
            Self::LongProcedure => "LONG_PROCEDURE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "MISSING_IN_FINAL" => Some(Self::MissingInFinal),
            "EXTRA_IN_FINAL" => Some(Self::ExtraInFinal),
            "QUANTITY_MISMATCH" => Some(Self::QuantityMismatch),
            "MAINTENANCE_DUE" => Some(Self::MaintenanceDue),
            "MAINTENANCE_OVERDUE" => Some(Self::MaintenanceOverdue),
            "COUNT_PENDING" => Some(Self::CountPending),
            "LONG_PROCEDURE" => Some(Self::LongProcedure),
            _ => None,
        }
    }

    /// Types that record a count discrepancy for a specific instrument.
    /// The stale-count sweep escalates procedures carrying these.
    pub fn is_discrepancy(&self) -> bool {
        matches!(
            self,
            Self::MissingInFinal | Self::ExtraInFinal | Self::QuantityMismatch
        )
    }

    /// The fixed priority table. Priorities never change after creation.
    pub fn default_priority(&self) -> AlertPriority {
        match self {
            Self::MissingInFinal | Self::ExtraInFinal => AlertPriority::Critical,
            Self::QuantityMismatch => AlertPriority::High,
            Self::MaintenanceDue => AlertPriority::Medium,
            Self::MaintenanceOverdue => AlertPriority::High,
            Self::CountPending => AlertPriority::Critical,
            Self::LongProcedure => AlertPriority::Medium,
        }
    }
}

impl From<DiscrepancyKind> for AlertType {
    fn from(kind: DiscrepancyKind) -> Self {
        match kind {
            DiscrepancyKind::MissingInFinal => Self::MissingInFinal,
            DiscrepancyKind::ExtraInFinal => Self::ExtraInFinal,
            DiscrepancyKind::QuantityMismatch => Self::QuantityMismatch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    Active,
    Resolved,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Resolved => "RESOLVED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(Self::Active),
            "RESOLVED" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// The entity an alert refers to. Together with the alert type this
/// forms the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    // Untagged deserialization tries variants in order, so the widest
    // shape has to come first.
    ProcedureInstrument { procedure_id: i64, instrument_id: i64 },
    Procedure { procedure_id: i64 },
    Instrument { instrument_id: i64 },
}

impl EntityRef {
    pub fn procedure(id: i64) -> Self {
        Self::Procedure { procedure_id: id }
    }

    pub fn instrument(id: i64) -> Self {
        Self::Instrument { instrument_id: id }
    }

    pub fn procedure_instrument(procedure_id: i64, instrument_id: i64) -> Self {
        Self::ProcedureInstrument {
            procedure_id,
            instrument_id,
        }
    }

    /// Canonical text key persisted alongside the alert. Never contains
    /// NULL-able parts, so the uniqueness index on (type, key) is total.
    pub fn key(&self) -> String {
        match self {
            Self::Procedure { procedure_id } => format!("procedure:{}", procedure_id),
            Self::Instrument { instrument_id } => format!("instrument:{}", instrument_id),
            Self::ProcedureInstrument {
                procedure_id,
                instrument_id,
            } => format!("procedure:{}/instrument:{}", procedure_id, instrument_id),
        }
    }

    pub fn procedure_id(&self) -> Option<i64> {
        match self {
            Self::Procedure { procedure_id }
            | Self::ProcedureInstrument { procedure_id, .. } => Some(*procedure_id),
            Self::Instrument { .. } => None,
        }
    }

    pub fn instrument_id(&self) -> Option<i64> {
        match self {
            Self::Instrument { instrument_id }
            | Self::ProcedureInstrument { instrument_id, .. } => Some(*instrument_id),
            Self::Procedure { .. } => None,
        }
    }

    /// Rebuild from the nullable id columns stored with an alert row.
    pub fn from_ids(procedure_id: Option<i64>, instrument_id: Option<i64>) -> Option<Self> {
        match (procedure_id, instrument_id) {
            (Some(p), Some(i)) => Some(Self::procedure_instrument(p, i)),
            (Some(p), None) => Some(Self::procedure(p)),
            (None, Some(i)) => Some(Self::instrument(i)),
            (None, None) => None,
        }
    }
}

/// A persisted alert record. The engine exclusively owns its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub alert_type: AlertType,
    pub entity: EntityRef,
    pub message: String,
    pub priority: AlertPriority,
    pub state: AlertState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<i64>,
    pub resolution_note: Option<String>,
}

/// Insert payload handed to the data-access port.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub entity: EntityRef,
    pub message: String,
    pub priority: AlertPriority,
}

/// Outcome of `AlertEngine::create` — either a fresh alert or the
/// already-active record carrying the same dedup key.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CreateAlertResult {
    Created { alert: Alert },
    Deduplicated { alert: Alert },
}

impl CreateAlertResult {
    pub fn alert(&self) -> &Alert {
        match self {
            Self::Created { alert } | Self::Deduplicated { alert } => alert,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

/// Filter for active-alert queries.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub alert_type: Option<AlertType>,
    pub min_priority: Option<AlertPriority>,
    pub procedure_id: Option<i64>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// ACTIVE alert counts grouped by priority, for the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl AlertSummary {
    pub fn total(&self) -> i64 {
        self.critical + self.high + self.medium + self.low
    }
}

/// Result of an on-demand verification run.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub procedure_id: i64,
    pub discrepancies: Vec<Discrepancy>,
    pub alerts_created: usize,
    pub alerts_deduplicated: usize,
}

/// Finalization readiness for a procedure: every instrument counted in
/// the INITIAL phase must have a FINAL observation, and no unresolved
/// CRITICAL alert may reference the procedure.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizationStatus {
    pub procedure_id: i64,
    pub ready: bool,
    pub instruments_missing_final: Vec<i64>,
    pub open_critical_alerts: i64,
}
