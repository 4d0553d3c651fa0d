//! Core domain types for kbforge document-processing tasks.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KbForgeError, Result};

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for task identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new time-sortable task identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a document-processing task.
///
/// ```text
/// queued → parsing → analyzing → merging → completed
///             └──────────┴──────────┴────→ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Parsing,
    Analyzing,
    Merging,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Parsing => "parsing",
            Self::Analyzing => "analyzing",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `completed` and `failed` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position along the success path. `failed` has no rank.
    pub fn stage_rank(&self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Parsing => Some(1),
            Self::Analyzing => Some(2),
            Self::Merging => Some(3),
            Self::Completed => Some(4),
            Self::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` respects the state machine.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (next, self.stage_rank(), next.stage_rank()) {
            (Self::Failed, _, _) => matches!(self, Self::Parsing | Self::Analyzing | Self::Merging),
            (_, Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MergeMode / DocumentKind
// ---------------------------------------------------------------------------

/// How newly analyzed content is combined with the existing knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Replace the knowledge base entirely.
    New,
    /// Merge into the existing knowledge base.
    #[default]
    Append,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Append => "append",
        }
    }
}

impl std::fmt::Display for MergeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MergeMode {
    type Err = KbForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(Self::New),
            "append" => Ok(Self::Append),
            other => Err(KbForgeError::validation(format!(
                "invalid mode '{other}': expected 'new' or 'append'"
            ))),
        }
    }
}

/// Supported office document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Docx,
    Pptx,
}

impl DocumentKind {
    /// Resolve a kind from a bare extension (`"docx"`, `".PPTX"`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            _ => None,
        }
    }

    /// Resolve a kind from a file name or path.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Like [`DocumentKind::from_path`], failing with a config error.
    pub fn require(filename: &str) -> Result<Self> {
        Self::from_path(filename).ok_or_else(|| {
            let ext = Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{e}"))
                .unwrap_or_else(|| "(none)".to_string());
            KbForgeError::config(format!(
                "unsupported file format: {ext} (expected .docx or .pptx)"
            ))
        })
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Pptx => "pptx",
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRecord / TaskUpdate
// ---------------------------------------------------------------------------

/// One document-processing job, as stored in the task store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    /// Sanitized upload file name.
    pub filename: String,
    pub status: TaskStatus,
    /// Human-readable description of the current stage.
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    /// Character count of the saved artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    /// A fresh record in the `queued` state.
    pub fn queued(task_id: TaskId, filename: impl Into<String>) -> Self {
        Self {
            task_id,
            filename: filename.into(),
            status: TaskStatus::Queued,
            message: "Task queued".to_string(),
            created_at: Utc::now(),
            completed_at: None,
            output_file: None,
            content_size: None,
            error: None,
        }
    }

    /// Merge a partial update into this record.
    ///
    /// Returns `false` (and leaves the record untouched) when the update would
    /// move a terminal record to another status.
    pub fn apply(&mut self, update: TaskUpdate) -> bool {
        if let Some(next) = update.status {
            if self.status.is_terminal() && next != self.status {
                return false;
            }
            self.status = next;
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if update.completed_at.is_some() {
            self.completed_at = update.completed_at;
        }
        if update.output_file.is_some() {
            self.output_file = update.output_file;
        }
        if update.content_size.is_some() {
            self.content_size = update.content_size;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        true
    }
}

/// A partial-field update to a [`TaskRecord`]. `None` fields are left as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskUpdate {
    /// Status + message, the shape of every intermediate transition.
    pub fn stage(status: TaskStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Terminal success with the produced artifact.
    pub fn completed(output_file: PathBuf, content_size: usize) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            message: Some("Processing complete".to_string()),
            completed_at: Some(Utc::now()),
            output_file: Some(output_file),
            content_size: Some(content_size),
            error: None,
        }
    }

    /// Terminal failure carrying the error text.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        let error = error.to_string();
        Self {
            status: Some(TaskStatus::Failed),
            message: Some(format!("Error: {error}")),
            error: Some(error),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_roundtrip() {
        let id = TaskId::new();
        let s = id.to_string();
        let parsed: TaskId = s.parse().expect("parse TaskId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Analyzing).expect("serialize");
        assert_eq!(json, "\"analyzing\"");
        let parsed: TaskStatus = serde_json::from_str("\"failed\"").expect("deserialize");
        assert_eq!(parsed, TaskStatus::Failed);
    }

    #[test]
    fn status_transitions_follow_stage_order() {
        use TaskStatus::*;
        assert!(Queued.can_transition_to(Parsing));
        assert!(Parsing.can_transition_to(Analyzing));
        assert!(Analyzing.can_transition_to(Merging));
        assert!(Merging.can_transition_to(Completed));
        assert!(Parsing.can_transition_to(Failed));
        assert!(Merging.can_transition_to(Failed));

        assert!(!Queued.can_transition_to(Analyzing));
        assert!(!Queued.can_transition_to(Failed));
        assert!(!Merging.can_transition_to(Parsing));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Parsing));
    }

    #[test]
    fn merge_mode_parsing() {
        assert_eq!("new".parse::<MergeMode>().unwrap(), MergeMode::New);
        assert_eq!("append".parse::<MergeMode>().unwrap(), MergeMode::Append);
        let err = "replace".parse::<MergeMode>().unwrap_err();
        assert!(err.to_string().contains("invalid mode 'replace'"));
        assert_eq!(MergeMode::default(), MergeMode::Append);
    }

    #[test]
    fn document_kind_from_names() {
        assert_eq!(DocumentKind::from_path("report.docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_path("Deck.PPTX"), Some(DocumentKind::Pptx));
        assert_eq!(DocumentKind::from_extension(".docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_path("notes.pdf"), None);
        assert_eq!(DocumentKind::from_path("README"), None);

        let err = DocumentKind::require("notes.pdf").unwrap_err();
        assert!(matches!(err, KbForgeError::Config { .. }));
        assert!(err.to_string().contains(".pdf"));
    }

    #[test]
    fn apply_merges_partial_fields() {
        let mut record = TaskRecord::queued(TaskId::new(), "report.docx");
        assert!(record.apply(TaskUpdate::stage(TaskStatus::Parsing, "Parsing document...")));
        assert_eq!(record.status, TaskStatus::Parsing);
        assert_eq!(record.message, "Parsing document...");
        assert_eq!(record.filename, "report.docx");
        assert!(record.error.is_none());

        assert!(record.apply(TaskUpdate::failed("boom")));
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert_eq!(record.message, "Error: boom");
        assert!(record.output_file.is_none());
    }

    #[test]
    fn apply_refuses_to_leave_terminal_state() {
        let mut record = TaskRecord::queued(TaskId::new(), "deck.pptx");
        record.apply(TaskUpdate::completed(PathBuf::from("output/kb.md"), 42));
        let before = record.clone();

        assert!(!record.apply(TaskUpdate::stage(TaskStatus::Parsing, "again")));
        assert_eq!(record, before);

        // Same-status updates to a terminal record are still allowed.
        assert!(record.apply(TaskUpdate {
            message: Some("note".into()),
            ..TaskUpdate::default()
        }));
        assert_eq!(record.message, "note");
    }

    #[test]
    fn record_serialization_omits_unset_fields() {
        let record = TaskRecord::queued(TaskId::new(), "report.docx");
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains("\"status\":\"queued\""));
        assert!(!json.contains("output_file"));
        assert!(!json.contains("error"));

        let parsed: TaskRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, record);
    }
}
