//! Role-gated milestone workflow.
//!
//! Combines the pure document transforms with collaborator calls under a
//! fixed commit ordering: operations with on-chain effect commit the chain
//! call first and only then persist locally, so the local document never
//! claims an approval or completion the chain refused.  The array returned
//! by every operation is the persisted document; a failed persistence
//! propagates and leaves the caller's copy untouched.
//!
//! No operation retries automatically — every failure surfaces to the
//! caller, who owns user-facing messaging and retry-by-resubmission.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::document::{self, AppendFeedback, EvidenceTarget};
use crate::errors::{CoreError, Result};
use crate::model::{
    Actor, Evidence, EvidenceDraft, Feedback, FileUpload, Milestone, Role, MAX_ATTACHMENTS,
};
use crate::ports::{
    ApproveRequest, CompleteRequest, EscrowClient, PersistenceGateway, UploadFolder, UploadService,
};

/// On-chain coordinates for an approval.  `None` at the call site means the
/// milestone has no escrow backing and the approval is local-only.
#[derive(Debug, Clone)]
pub struct ChainApproval {
    pub contract_id: String,
    pub approver: Option<String>,
}

/// On-chain coordinates for a completion.
#[derive(Debug, Clone)]
pub struct ChainCompletion {
    pub contract_id: String,
    pub service_provider: Option<String>,
}

/// Result of a feedback submission.
#[derive(Debug, Clone)]
pub enum FeedbackOutcome {
    Saved(Vec<Milestone>),
    /// No evidence exists on the milestone; nothing was persisted.
    NoEvidence,
}

pub struct MilestoneWorkflow {
    store: Arc<dyn PersistenceGateway>,
    escrow: Arc<dyn EscrowClient>,
    uploads: Arc<dyn UploadService>,
}

impl MilestoneWorkflow {
    pub fn new(
        store: Arc<dyn PersistenceGateway>,
        escrow: Arc<dyn EscrowClient>,
        uploads: Arc<dyn UploadService>,
    ) -> Self {
        MilestoneWorkflow {
            store,
            escrow,
            uploads,
        }
    }

    /// Grantee submits evidence for milestone `idx`.
    ///
    /// Files are uploaded best-effort before the entry is appended: paths
    /// that fail to upload are dropped with a warning rather than aborting
    /// the submission.  Appending moves the milestone (back) to `SUBMITTED`.
    pub async fn submit_evidence(
        &self,
        payout_id: &str,
        milestones: &[Milestone],
        idx: usize,
        draft: EvidenceDraft,
        actor: &Actor,
    ) -> Result<Vec<Milestone>> {
        if actor.role != Role::Grantee {
            return Err(CoreError::RoleNotPermitted {
                role: actor.role,
                action: "submit evidence",
            });
        }
        if !draft.has_content() {
            return Err(CoreError::EmptySubmission);
        }
        if draft.files.len() > MAX_ATTACHMENTS {
            return Err(CoreError::TooManyAttachments {
                count: draft.files.len(),
            });
        }

        let files = self
            .upload_best_effort(payout_id, idx, UploadFolder::Evidence, draft.files)
            .await;

        let entry = Evidence {
            url: draft.url.filter(|u| !u.trim().is_empty()),
            notes: draft.notes.filter(|n| !n.trim().is_empty()),
            files,
            feedback: Vec::new(),
        };

        let next = document::append_evidence(milestones, idx, entry)?;
        self.persist(payout_id, &next).await?;
        info!("Evidence submitted for payout {payout_id} milestone {idx}");
        Ok(next)
    }

    /// Attach a feedback comment to an evidence entry of milestone `idx`.
    ///
    /// `target` defaults to the latest evidence entry.  When the milestone
    /// has no evidence yet there is nothing to anchor to and the call
    /// returns [`FeedbackOutcome::NoEvidence`] without persisting.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_feedback(
        &self,
        payout_id: &str,
        milestones: &[Milestone],
        idx: usize,
        message: &str,
        files: Vec<FileUpload>,
        actor: &Actor,
        target: EvidenceTarget,
    ) -> Result<FeedbackOutcome> {
        let message = message.trim();
        if message.is_empty() {
            return Err(CoreError::EmptyMessage);
        }
        if files.len() > MAX_ATTACHMENTS {
            return Err(CoreError::TooManyAttachments { count: files.len() });
        }
        document::check_index(milestones, idx)?;

        let files = self
            .upload_best_effort(payout_id, idx, UploadFolder::Feedback, files)
            .await;

        let feedback = Feedback::new(message, actor.identity.clone(), files);
        match document::append_feedback(milestones, idx, target, feedback)? {
            AppendFeedback::NoEvidence => {
                debug!("No evidence on payout {payout_id} milestone {idx} to attach feedback to");
                Ok(FeedbackOutcome::NoEvidence)
            }
            AppendFeedback::Appended(next) => {
                self.persist(payout_id, &next).await?;
                Ok(FeedbackOutcome::Saved(next))
            }
        }
    }

    /// Moderator approves milestone `idx`.
    ///
    /// With an escrow backing, the chain call commits first; a failed or
    /// refused call aborts the whole operation with no local mutation and
    /// no persistence.
    pub async fn approve_milestone(
        &self,
        payout_id: &str,
        milestones: &[Milestone],
        idx: usize,
        chain: Option<ChainApproval>,
        actor: &Actor,
    ) -> Result<Vec<Milestone>> {
        self.require_moderator(actor, "approve a milestone")?;
        document::check_index(milestones, idx)?;

        if let Some(chain) = chain {
            let accepted = self
                .escrow
                .approve_milestone(ApproveRequest {
                    contract_id: chain.contract_id,
                    milestone_index: idx,
                    approver: chain.approver,
                    new_flag: true,
                })
                .await
                .map_err(|e| {
                    error!("Failed to approve milestone {idx} on-chain: {e}");
                    e
                })?;
            if !accepted {
                error!("Escrow contract refused approval of milestone {idx}");
                return Err(CoreError::ChainCallRejected);
            }
        }

        let next = document::set_approved(milestones, idx, true)?;
        self.persist(payout_id, &next).await?;
        info!("Milestone {idx} of payout {payout_id} approved");
        Ok(next)
    }

    /// Moderator completes milestone `idx`, releasing the tranche.
    ///
    /// Same ordering discipline as approval; the evidence thread is encoded
    /// into a compact string and carried on-chain as the completion payload.
    pub async fn complete_milestone(
        &self,
        payout_id: &str,
        milestones: &[Milestone],
        idx: usize,
        chain: Option<ChainCompletion>,
        actor: &Actor,
    ) -> Result<Vec<Milestone>> {
        self.require_moderator(actor, "complete a milestone")?;
        document::check_index(milestones, idx)?;

        if let Some(chain) = chain {
            let accepted = self
                .escrow
                .complete_milestone(CompleteRequest {
                    contract_id: chain.contract_id,
                    milestone_index: idx,
                    service_provider: chain.service_provider,
                    new_status: "completed".to_string(),
                    new_evidence: encode_evidence_log(idx, &milestones[idx].evidences),
                })
                .await
                .map_err(|e| {
                    error!("Failed to complete milestone {idx} on-chain: {e}");
                    e
                })?;
            if !accepted {
                error!("Escrow contract refused completion of milestone {idx}");
                return Err(CoreError::ChainCallRejected);
            }
        }

        let next = document::set_completed(milestones, idx)?;
        self.persist(payout_id, &next).await?;
        info!("Milestone {idx} of payout {payout_id} completed");
        Ok(next)
    }

    /// Moderator rejects milestone `idx`.  Local-only: no on-chain effect.
    pub async fn reject_milestone(
        &self,
        payout_id: &str,
        milestones: &[Milestone],
        idx: usize,
        actor: &Actor,
    ) -> Result<Vec<Milestone>> {
        self.require_moderator(actor, "reject a milestone")?;
        let next = document::set_rejected(milestones, idx)?;
        self.persist(payout_id, &next).await?;
        info!("Milestone {idx} of payout {payout_id} rejected");
        Ok(next)
    }

    fn require_moderator(&self, actor: &Actor, action: &'static str) -> Result<()> {
        match actor.role {
            Role::PayoutProvider | Role::Admin => Ok(()),
            Role::Grantee => Err(CoreError::RoleNotPermitted {
                role: actor.role,
                action,
            }),
        }
    }

    async fn upload_best_effort(
        &self,
        payout_id: &str,
        idx: usize,
        folder: UploadFolder,
        files: Vec<FileUpload>,
    ) -> Vec<String> {
        if files.is_empty() {
            return Vec::new();
        }
        let requested = files.len();
        match self.uploads.upload(payout_id, idx, folder, files).await {
            Ok(paths) => {
                if paths.len() < requested {
                    warn!(
                        "{} of {requested} attachment(s) failed to upload and were dropped",
                        requested - paths.len()
                    );
                }
                paths
            }
            Err(e) => {
                warn!("Attachment upload failed, continuing without files: {e}");
                Vec::new()
            }
        }
    }

    async fn persist(&self, payout_id: &str, milestones: &[Milestone]) -> Result<()> {
        let doc = serde_json::to_value(milestones)?;
        self.store
            .replace_milestones(payout_id, doc)
            .await
            .map_err(|e| {
                error!("Failed to persist milestones for payout {payout_id}: {e}");
                e
            })
    }
}

/// Serialize an evidence thread into the compact contract-readable string
/// supplied as the on-chain completion payload: one segment per entry in
/// submission order, `|`-separated, each `"{idx}:url=@…&file=…&notes=…"`
/// with absent fields omitted.
pub fn encode_evidence_log(idx: usize, evidences: &[Evidence]) -> String {
    evidences
        .iter()
        .map(|e| {
            let mut parts = Vec::new();
            if let Some(url) = e.url.as_deref() {
                parts.push(format!("url=@{url}"));
            }
            for file in &e.files {
                parts.push(format!("file={file}"));
            }
            if let Some(notes) = e.notes.as_deref() {
                parts.push(format!("notes={notes}"));
            }
            format!("{idx}:{}", parts.join("&"))
        })
        .collect::<Vec<_>>()
        .join("|")
}
