//! Collector for structured client log entries. Entries are re-emitted through
//! `tracing`; nothing is persisted.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Unrecognised levels are logged at info rather than rejecting the batch.
impl From<String> for LogLevel {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "trace" | "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "fatal" => LogLevel::Fatal,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
}

/// Request body: a single entry or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LogBatch {
    Many(Vec<LogEntry>),
    One(Box<LogEntry>),
}

impl LogBatch {
    pub fn into_entries(self) -> Vec<LogEntry> {
        match self {
            LogBatch::Many(entries) => entries,
            LogBatch::One(entry) => vec![*entry],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub success: bool,
    pub logs_processed: usize,
    pub correlation_ids: Vec<String>,
}

/// Fill in missing correlation and user ids, emit every entry, and summarise.
pub fn ingest(entries: Vec<LogEntry>, acting_user: Option<&str>) -> IngestSummary {
    let mut correlation_ids = Vec::with_capacity(entries.len());
    let logs_processed = entries.len();
    for mut entry in entries {
        let correlation_id = entry
            .correlation_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        if entry.user_id.is_none() {
            entry.user_id = acting_user.map(str::to_string);
        }
        emit(&entry);
        correlation_ids.push(correlation_id);
    }
    IngestSummary {
        success: true,
        logs_processed,
        correlation_ids,
    }
}

fn emit(entry: &LogEntry) {
    let correlation_id = entry.correlation_id.as_deref().unwrap_or_default();
    let user_id = entry.user_id.as_deref().unwrap_or_default();
    let organization_id = entry.organization_id.as_deref().unwrap_or_default();
    let timestamp = entry.timestamp.as_deref().unwrap_or_default();
    let metadata = entry.metadata.as_ref().map(Value::to_string).unwrap_or_default();
    let context = entry.context.as_ref().map(Value::to_string).unwrap_or_default();
    let err = entry.error.as_ref().map(Value::to_string).unwrap_or_default();
    let message = entry.message.as_str();
    let fatal = entry.level == LogLevel::Fatal;

    match entry.level {
        LogLevel::Debug => debug!(target: "client", correlation_id, user_id, organization_id, timestamp, %metadata, %context, "{}", message),
        LogLevel::Info => info!(target: "client", correlation_id, user_id, organization_id, timestamp, %metadata, %context, "{}", message),
        LogLevel::Warn => warn!(target: "client", correlation_id, user_id, organization_id, timestamp, %metadata, %context, "{}", message),
        LogLevel::Error | LogLevel::Fatal => error!(target: "client", correlation_id, user_id, organization_id, timestamp, %metadata, %context, error = %err, fatal, "{}", message),
    }
}
