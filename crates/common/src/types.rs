use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a delivery job.
///
/// `pending → processing → {completed | pending (retry) | dlq}`. `completed`
/// and `dlq` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Dlq,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Dlq => write!(f, "dlq"),
        }
    }
}

/// Device platform a push token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
            Platform::Web => write!(f, "web"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "web" => Ok(Platform::Web),
            other => Err(format!(
                "Invalid platform '{}'. Valid platforms: ios, android, web",
                other
            )),
        }
    }
}

/// A message intended for one user. Never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub is_read: bool,
    pub is_deleted: bool,
    pub linked_content: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub received_at: Option<DateTime<Utc>>,
    /// Set once at least one delivery job for this notification completed.
    pub sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// The `type` tag from metadata, falling back to `"system"`.
    pub fn kind(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or("system")
    }
}

/// A registered push destination. The token value is unique across users.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One delivery attempt record for a (notification, device token) pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryJob {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub device_token_id: Uuid,
    pub status: JobStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    /// Provider message id, only set on success.
    pub message_id: Option<String>,
    /// Backoff deadline: the job is not selected before this instant.
    pub eligible_at: Option<DateTime<Utc>>,
    /// Identifies the cycle currently holding the claim.
    pub claim_token: Option<Uuid>,
    /// After this instant a `processing` job may be reclaimed.
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryJob {
    /// A fresh job as written by the enqueuer: pending and immediately eligible.
    pub fn new_pending(notification_id: Uuid, device_token_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            device_token_id,
            status: JobStatus::Pending,
            retry_count: 0,
            error_message: None,
            message_id: None,
            eligible_at: None,
            claim_token: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a dispatch cycle running at `now` may select this job.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => self.eligible_at.is_none_or(|at| at <= now),
            JobStatus::Processing => self.lease_expires_at.is_some_and(|at| at <= now),
            JobStatus::Completed | JobStatus::Dlq => false,
        }
    }
}
