use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    PendingApproval,
    Approved,
    ChangesRequested,
    Scheduled,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::PendingApproval => "pending_approval",
            PostStatus::Approved => "approved",
            PostStatus::ChangesRequested => "changes_requested",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "pending_approval" => Some(PostStatus::PendingApproval),
            "approved" => Some(PostStatus::Approved),
            "changes_requested" => Some(PostStatus::ChangesRequested),
            "scheduled" => Some(PostStatus::Scheduled),
            "published" => Some(PostStatus::Published),
            _ => None,
        }
    }
}

/// A content post awaiting (or past) client approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPost {
    pub id: Uuid,
    pub client_id: Uuid,
    pub status: PostStatus,
    #[serde(default)]
    pub approval_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub platforms: Vec<String>,
}

/// Hosted rows may carry `null` instead of an empty array.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ContentPost {
    /// True when the post sits in `pending_approval` and its deadline is at or before `now`.
    /// Posts without a deadline never qualify.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::PendingApproval
            && self.approval_deadline.is_some_and(|deadline| deadline <= now)
    }

    pub fn platform_list(&self) -> String {
        self.platforms.join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskItem {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

/// Selection used when auto-completing review tasks for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    pub client_id: Uuid,
    pub title: String,
    pub due_from: DateTime<Utc>,
    pub due_to: DateTime<Utc>,
}

impl TaskFilter {
    pub fn matches(&self, task: &TaskItem) -> bool {
        task.client_id == self.client_id
            && task.title == self.title
            && !task.completed
            && task
                .due_date
                .is_some_and(|due| due >= self.due_from && due <= self.due_to)
    }
}

/// Append-only activity log row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub client_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewActivity {
    pub client_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}
