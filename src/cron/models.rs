use diesel_derive_enum::DbEnum;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::{Validate, ValidationError};

// ============================================================================
// Job definition
// ============================================================================

/// Administrative state of a cron job. Deletion removes the record instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::CronJobState")]
#[serde(rename_all = "UPPERCASE")]
pub enum CronJobState {
    Enabled,
    Disabled,
}

impl std::fmt::Display for CronJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CronJobState::Enabled => write!(f, "ENABLED"),
            CronJobState::Disabled => write!(f, "DISABLED"),
        }
    }
}

impl std::str::FromStr for CronJobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ENABLED" => Ok(CronJobState::Enabled),
            "DISABLED" => Ok(CronJobState::Disabled),
            _ => Err(format!("Invalid cron job state: {s}")),
        }
    }
}

/// Which flow a job starts, and with what arguments.
///
/// The payload is opaque to the manager and is handed to the execution
/// engine unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FlowSpec {
    #[validate(length(min = 1, max = 100, message = "Flow name must be between 1 and 100 characters"))]
    pub name: String,

    #[serde(default)]
    pub args: JsonValue,
}

impl FlowSpec {
    pub fn new(name: impl Into<String>, args: JsonValue) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub description: String,
    pub flow_spec: FlowSpec,
    pub periodicity: SignedDuration,
    /// Advisory maximum runtime handed to the execution engine.
    pub lifetime: Option<SignedDuration>,
    pub allow_overruns: bool,
    pub state: CronJobState,
    /// When the last run was started, not when it finished.
    pub last_run_time: Option<Timestamp>,
    pub current_run_id: Option<String>,
    pub created_at: Timestamp,
    /// Store-managed version token for conditional updates.
    pub version: i64,
}

impl CronJob {
    pub fn is_enabled(&self) -> bool {
        self.state == CronJobState::Enabled
    }
}

/// Arguments accepted when scheduling a new flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ScheduleFlowArgs {
    #[validate(nested)]
    pub flow_spec: FlowSpec,

    #[validate(custom(function = "validate_positive_duration"))]
    pub periodicity: SignedDuration,

    #[validate(custom(function = "validate_positive_duration"))]
    pub lifetime: Option<SignedDuration>,

    #[serde(default)]
    pub allow_overruns: bool,

    #[serde(default)]
    #[validate(length(max = 1024, message = "Description cannot exceed 1024 characters"))]
    pub description: String,
}

fn validate_positive_duration(duration: &SignedDuration) -> Result<(), ValidationError> {
    if duration.is_positive() {
        Ok(())
    } else {
        let mut error = ValidationError::new("positive_duration");
        error.message = Some("Duration must be positive".into());
        Err(error)
    }
}

/// A job as presented to administrators, with its health signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CronJobView {
    #[serde(flatten)]
    pub job: CronJob,
    pub is_failing: bool,
}

// ============================================================================
// Run history
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::CronRunStatus")]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    /// Started; completion not yet reported by the execution engine.
    Pending,
    Ok,
    Error,
}

impl RunStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, RunStatus::Pending)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "PENDING"),
            RunStatus::Ok => write!(f, "OK"),
            RunStatus::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJobRun {
    pub job_id: String,
    pub flow_id: String,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub status: RunStatus,
}

impl CronJobRun {
    pub fn pending(job_id: impl Into<String>, flow_id: impl Into<String>, started_at: Timestamp) -> Self {
        Self {
            job_id: job_id.into(),
            flow_id: flow_id.into(),
            started_at,
            finished_at: None,
            status: RunStatus::Pending,
        }
    }

    /// Whether the run may still be executing at `now`: it is PENDING and,
    /// when a lifetime bounds it, has not outlived it.
    pub fn may_be_running(&self, lifetime: Option<SignedDuration>, now: Timestamp) -> bool {
        if self.status.is_final() {
            return false;
        }
        match lifetime {
            None => true,
            Some(lifetime) => self
                .started_at
                .checked_add(lifetime)
                .map_or(true, |deadline| now < deadline),
        }
    }
}
