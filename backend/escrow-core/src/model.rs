//! Canonical milestone document types.
//!
//! These mirror the milestone-array JSON document stored per payout in the
//! document store.  Two fields have exclusive writers:
//!
//! - `status` moves only through the workflow's status setters
//!   (`PENDING → SUBMITTED → {REJECTED | COMPLETED}`, with `REJECTED`
//!   returning to `SUBMITTED` on re-submission);
//! - `flags.resolved` is written only by the reconciliation watcher,
//!   mirroring the on-chain "milestone resolved" flag.
//!
//! That split keeps the watcher and the workflow off each other's fields
//! when they interleave on the same payout.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum number of file attachments per evidence or feedback entry.
pub const MAX_ATTACHMENTS: usize = 3;

/// Caller roles recognised by the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Submits evidence for funded milestones.
    Grantee,
    /// Moderates submissions: feedback, approve, reject, complete.
    PayoutProvider,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grantee => "grantee",
            Self::PayoutProvider => "payout_provider",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local workflow status of a milestone, independent of on-chain flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    Submitted,
    Rejected,
    Completed,
}

/// Boolean overlay on a milestone, orthogonal to [`MilestoneStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MilestoneFlags {
    /// Set by a moderator approval; does not imply `status`.
    pub approved: bool,
    /// Mirror of the on-chain resolved flag; watcher-owned.
    pub resolved: bool,
}

/// One funded deliverable within a payout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub description: String,
    /// Non-negative, denominated in the payout currency.
    pub amount: Decimal,
    #[serde(default)]
    pub status: MilestoneStatus,
    #[serde(default)]
    pub flags: MilestoneFlags,
    /// Append-only; insertion order is submission order.
    #[serde(default)]
    pub evidences: Vec<Evidence>,
}

impl Milestone {
    pub fn new(description: impl Into<String>, amount: Decimal) -> Self {
        Milestone {
            description: description.into(),
            amount,
            status: MilestoneStatus::default(),
            flags: MilestoneFlags::default(),
            evidences: Vec::new(),
        }
    }
}

/// One submission attempt by the grantee for a milestone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Storage paths; uploads happen before the entry is appended.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Append-only comment thread.
    #[serde(default)]
    pub feedback: Vec<Feedback>,
}

impl Evidence {
    /// True when at least one of url/notes/files carries content.
    pub fn has_content(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
            || self.notes.as_deref().is_some_and(|n| !n.trim().is_empty())
            || !self.files.is_empty()
    }
}

/// One moderator/grantee comment attached to a specific evidence entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub message: String,
    /// Identity string of the author (e.g. an email).
    pub author: String,
    /// RFC-3339 timestamp taken at creation.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl Feedback {
    pub fn new(message: impl Into<String>, author: impl Into<String>, files: Vec<String>) -> Self {
        Feedback {
            message: message.into(),
            author: author.into(),
            timestamp: Utc::now().to_rfc3339(),
            files,
        }
    }
}

/// Identity of the caller driving a workflow operation.
#[derive(Debug, Clone)]
pub struct Actor {
    pub role: Role,
    /// Recorded as the feedback author.
    pub identity: String,
}

impl Actor {
    pub fn new(role: Role, identity: impl Into<String>) -> Self {
        Actor {
            role,
            identity: identity.into(),
        }
    }
}

/// A raw file payload headed for the upload service.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// An evidence submission before upload and validation.
#[derive(Debug, Clone, Default)]
pub struct EvidenceDraft {
    pub url: Option<String>,
    pub notes: Option<String>,
    pub files: Vec<FileUpload>,
}

impl EvidenceDraft {
    /// True when the draft carries a url, notes, or at least one file.
    pub fn has_content(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
            || self.notes.as_deref().is_some_and(|n| !n.trim().is_empty())
            || !self.files.is_empty()
    }
}
