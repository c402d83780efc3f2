use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Moderator,
    Administrator,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub forced_voting_weight: Option<i64>,
    pub biography: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Topic {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReportType {
    Bug,
    Feature,
    Hint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Relevant,
    Severe,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: i64,
    pub topic_id: i64,
    pub title: String,
    pub report_type: ReportType,
    pub severity: Severity,
    pub version: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub duplicate_of: Option<i64>,
    pub relevance: i64,
    pub relevance_override: Option<i64>,
}

impl Report {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Relevance used for ranking: the override if set, else the computed value.
    pub fn effective_relevance(&self) -> i64 {
        crate::tracker::relevance::effective_relevance(self.relevance, self.relevance_override)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub report_id: i64,
    pub content: String,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attachment {
    pub id: i64,
    pub post_id: i64,
    pub name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub user_id: i64,
    pub report_id: i64,
    pub upvote: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationKind {
    NewReport,
    NewPost,
    Answered,
    Moved,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub kind: NotificationKind,
    pub topic_id: i64,
    pub report_id: i64,
    pub post_id: Option<i64>,
    pub actor_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TokenKind {
    Register,
    ChangeEmail,
    ResetPassword,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Token {
    pub value: String,
    pub user_id: i64,
    pub kind: TokenKind,
    pub created_at: DateTime<Utc>,
    pub payload: Option<String>,
}

/// Site-wide settings editable by administrators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Configuration {
    pub guest_reading: bool,
    pub user_registration: bool,
    pub closed_report_posting: bool,
    /// Comma separated post-count thresholds, e.g. `0,10,50`.
    pub voting_weight_definition: String,
    /// Comma separated file extensions accepted for attachments.
    pub allowed_extensions: String,
    pub max_attachments_per_post: i64,
}

impl Configuration {
    pub fn accepts_extension(&self, file_name: &str) -> bool {
        let Some((_, extension)) = file_name.rsplit_once('.') else {
            return false;
        };
        self.allowed_extensions
            .split(',')
            .map(str::trim)
            .filter(|allowed| !allowed.is_empty())
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub name: String,
    pub footer: String,
    pub support_email: Option<String>,
}

/// Table state of a paginated view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub page_size: u32,
    pub current_page: u32,
    pub sorted_by: Option<String>,
    pub ascending: bool,
}

impl Selection {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            current_page: 0,
            sorted_by: None,
            ascending: true,
        }
    }

    pub fn sorted_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.sorted_by = Some(column.into());
        self.ascending = ascending;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub forced_voting_weight: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTopic {
    pub title: String,
    pub description: String,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub topic_id: i64,
    pub title: String,
    pub report_type: ReportType,
    pub severity: Severity,
    pub version: Option<String>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub report_id: i64,
    pub content: String,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttachment {
    pub post_id: i64,
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}
