//! Collaborator interfaces the core depends on.
//!
//! The document store, the escrow contract, and the attachment storage are
//! external services; the core consumes them through these traits so that
//! embedding applications and tests can inject their own implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::model::FileUpload;

/// Atomic replace of a payout's milestone document.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Replace the whole milestone array for `payout_id`.  Must be atomic
    /// at the document granularity — no partial-field update.
    async fn replace_milestones(&self, payout_id: &str, milestones: Value) -> Result<()>;
}

/// Per-milestone flag record as reported by the escrow contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainFlags {
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainMilestone {
    #[serde(default)]
    pub flags: ChainFlags,
}

/// All milestone records for one escrow, positional by request order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscrowMilestoneSet {
    #[serde(default)]
    pub milestones: Vec<ChainMilestone>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowBalance {
    pub address: String,
    pub balance: f64,
}

/// On-chain milestone approval, covering the build → sign → submit round
/// trip behind the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub contract_id: String,
    pub milestone_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    pub new_flag: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub contract_id: String,
    pub milestone_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_provider: Option<String>,
    pub new_status: String,
    /// Compact contract-readable encoding of the evidence thread.
    pub new_evidence: String,
}

/// On-chain reads and writes against the escrow contract.
#[async_trait]
pub trait EscrowClient: Send + Sync {
    /// Milestone flag records per escrow, keyed positionally by input order.
    async fn get_milestone_flags(&self, escrow_ids: &[String]) -> Result<Vec<EscrowMilestoneSet>>;

    /// Batched balance read for the given escrow addresses.
    async fn get_balances(&self, signer: &str, addresses: &[String]) -> Result<Vec<EscrowBalance>>;

    /// Approve round trip.  `Ok(false)` means the contract refused the
    /// change; callers treat that the same as a failed call.
    async fn approve_milestone(&self, req: ApproveRequest) -> Result<bool>;

    /// Complete round trip, carrying the evidence payload on-chain.
    async fn complete_milestone(&self, req: CompleteRequest) -> Result<bool>;
}

/// Storage folder for uploaded attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFolder {
    Evidence,
    Feedback,
}

impl UploadFolder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evidence => "evidence",
            Self::Feedback => "feedback",
        }
    }
}

/// Attachment storage for evidence and feedback files.
#[async_trait]
pub trait UploadService: Send + Sync {
    /// Upload raw file payloads, returning the storage paths that
    /// succeeded.  Partial success (fewer paths than files) is allowed and
    /// must be tolerated by callers.
    async fn upload(
        &self,
        payout_id: &str,
        milestone_index: usize,
        folder: UploadFolder,
        files: Vec<FileUpload>,
    ) -> Result<Vec<String>>;
}
