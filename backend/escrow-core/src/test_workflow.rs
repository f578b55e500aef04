//! Workflow scenario tests against recording mock collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::document::EvidenceTarget;
use crate::errors::{CoreError, Result};
use crate::model::{Actor, EvidenceDraft, FileUpload, Milestone, MilestoneStatus, Role};
use crate::ports::{
    ApproveRequest, CompleteRequest, EscrowBalance, EscrowClient, EscrowMilestoneSet,
    PersistenceGateway, UploadFolder, UploadService,
};
use crate::workflow::{ChainApproval, ChainCompletion, FeedbackOutcome, MilestoneWorkflow};

// ─────────────────────────────────────────────────────────
// Mock collaborators
// ─────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryStore {
    replaced: Mutex<Vec<(String, Value)>>,
    fail: AtomicBool,
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn replace_milestones(&self, payout_id: &str, milestones: Value) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::Persistence("replace failed".to_string()));
        }
        self.replaced
            .lock()
            .await
            .push((payout_id.to_string(), milestones));
        Ok(())
    }
}

impl MemoryStore {
    async fn replace_count(&self) -> usize {
        self.replaced.lock().await.len()
    }

    /// Deserialize the most recently persisted document.
    async fn last_persisted(&self) -> Vec<Milestone> {
        let replaced = self.replaced.lock().await;
        let (_, value) = replaced.last().expect("nothing was persisted");
        serde_json::from_value(value.clone()).expect("persisted document must deserialize")
    }
}

struct StubEscrow {
    accept_writes: bool,
    fail_writes: bool,
    approve_calls: AtomicUsize,
    complete_requests: Mutex<Vec<CompleteRequest>>,
}

impl Default for StubEscrow {
    fn default() -> Self {
        StubEscrow {
            accept_writes: true,
            fail_writes: false,
            approve_calls: AtomicUsize::new(0),
            complete_requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EscrowClient for StubEscrow {
    async fn get_milestone_flags(&self, _escrow_ids: &[String]) -> Result<Vec<EscrowMilestoneSet>> {
        unreachable!("workflow never reads milestone flags")
    }

    async fn get_balances(&self, _signer: &str, _addresses: &[String]) -> Result<Vec<EscrowBalance>> {
        unreachable!("workflow never reads balances")
    }

    async fn approve_milestone(&self, _req: ApproveRequest) -> Result<bool> {
        self.approve_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(CoreError::ChainCall("node unavailable".to_string()));
        }
        Ok(self.accept_writes)
    }

    async fn complete_milestone(&self, req: CompleteRequest) -> Result<bool> {
        self.complete_requests.lock().await.push(req);
        if self.fail_writes {
            return Err(CoreError::ChainCall("node unavailable".to_string()));
        }
        Ok(self.accept_writes)
    }
}

#[derive(Default)]
struct StubUploads {
    fail: AtomicBool,
    drop_last: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl UploadService for StubUploads {
    async fn upload(
        &self,
        payout_id: &str,
        milestone_index: usize,
        folder: UploadFolder,
        files: Vec<FileUpload>,
    ) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::Upload("storage offline".to_string()));
        }
        let mut paths: Vec<String> = files
            .iter()
            .map(|f| format!("{}/{payout_id}/{milestone_index}/{}", folder.as_str(), f.name))
            .collect();
        if self.drop_last.load(Ordering::SeqCst) {
            paths.pop();
        }
        Ok(paths)
    }
}

// ─────────────────────────────────────────────────────────
// Setup helpers
// ─────────────────────────────────────────────────────────

struct Harness {
    workflow: MilestoneWorkflow,
    store: Arc<MemoryStore>,
    escrow: Arc<StubEscrow>,
    uploads: Arc<StubUploads>,
}

fn setup() -> Harness {
    setup_with_escrow(StubEscrow::default())
}

fn setup_with_escrow(escrow: StubEscrow) -> Harness {
    // RUST_LOG controls verbosity; repeat initialisation is a no-op.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let store = Arc::new(MemoryStore::default());
    let escrow = Arc::new(escrow);
    let uploads = Arc::new(StubUploads::default());
    let workflow = MilestoneWorkflow::new(store.clone(), escrow.clone(), uploads.clone());
    Harness {
        workflow,
        store,
        escrow,
        uploads,
    }
}

fn payout() -> Vec<Milestone> {
    vec![
        Milestone::new("Design review", Decimal::new(1_000, 0)),
        Milestone::new("Mainnet launch", Decimal::new(4_000, 0)),
    ]
}

fn grantee() -> Actor {
    Actor::new(Role::Grantee, "grantee@example.com")
}

fn provider() -> Actor {
    Actor::new(Role::PayoutProvider, "provider@example.com")
}

fn url_draft(url: &str) -> EvidenceDraft {
    EvidenceDraft {
        url: Some(url.to_string()),
        ..Default::default()
    }
}

fn file(name: &str) -> FileUpload {
    FileUpload {
        name: name.to_string(),
        bytes: vec![0u8; 16],
    }
}

// ─────────────────────────────────────────────────────────
// Evidence submission
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn submit_evidence_appends_and_marks_submitted() {
    let h = setup();
    let next = h
        .workflow
        .submit_evidence("P1", &payout(), 0, url_draft("https://x"), &grantee())
        .await
        .unwrap();

    assert_eq!(next[0].status, MilestoneStatus::Submitted);
    assert_eq!(next[0].evidences.len(), 1);
    assert_eq!(next[0].evidences[0].url.as_deref(), Some("https://x"));

    // Returned document matches what was persisted.
    assert_eq!(h.store.last_persisted().await, next);
}

#[tokio::test]
async fn submit_evidence_rejects_non_grantee_before_any_call() {
    let h = setup();
    let err = h
        .workflow
        .submit_evidence("P1", &payout(), 0, url_draft("https://x"), &provider())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::RoleNotPermitted { .. }));
    assert_eq!(h.uploads.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.replace_count().await, 0);
}

#[tokio::test]
async fn submit_evidence_requires_content() {
    let h = setup();
    let err = h
        .workflow
        .submit_evidence("P1", &payout(), 0, EvidenceDraft::default(), &grantee())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::EmptySubmission));
    assert_eq!(h.store.replace_count().await, 0);
}

#[tokio::test]
async fn submit_evidence_limits_attachments() {
    let h = setup();
    let draft = EvidenceDraft {
        files: vec![file("a"), file("b"), file("c"), file("d")],
        ..Default::default()
    };
    let err = h
        .workflow
        .submit_evidence("P1", &payout(), 0, draft, &grantee())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::TooManyAttachments { count: 4 }));
    assert_eq!(h.uploads.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn submit_evidence_stores_uploaded_paths() {
    let h = setup();
    let draft = EvidenceDraft {
        notes: Some("report attached".to_string()),
        files: vec![file("report.pdf")],
        ..Default::default()
    };
    let next = h
        .workflow
        .submit_evidence("P7", &payout(), 1, draft, &grantee())
        .await
        .unwrap();
    assert_eq!(next[1].evidences[0].files, vec!["evidence/P7/1/report.pdf"]);
}

#[tokio::test]
async fn submit_evidence_survives_total_upload_failure() {
    let h = setup();
    h.uploads.fail.store(true, Ordering::SeqCst);
    let draft = EvidenceDraft {
        notes: Some("see attachment".to_string()),
        files: vec![file("a.pdf")],
        ..Default::default()
    };
    let next = h
        .workflow
        .submit_evidence("P1", &payout(), 0, draft, &grantee())
        .await
        .unwrap();

    // Submission went through without the failed files.
    assert_eq!(next[0].evidences.len(), 1);
    assert!(next[0].evidences[0].files.is_empty());
    assert_eq!(next[0].evidences[0].notes.as_deref(), Some("see attachment"));
    assert_eq!(h.store.replace_count().await, 1);
}

#[tokio::test]
async fn submit_evidence_tolerates_partial_upload() {
    let h = setup();
    h.uploads.drop_last.store(true, Ordering::SeqCst);
    let draft = EvidenceDraft {
        files: vec![file("a.pdf"), file("b.pdf")],
        ..Default::default()
    };
    let next = h
        .workflow
        .submit_evidence("P1", &payout(), 0, draft, &grantee())
        .await
        .unwrap();
    assert_eq!(next[0].evidences[0].files, vec!["evidence/P1/0/a.pdf"]);
}

#[tokio::test]
async fn submit_evidence_persistence_failure_propagates() {
    let h = setup();
    h.store.fail.store(true, Ordering::SeqCst);
    let err = h
        .workflow
        .submit_evidence("P1", &payout(), 0, url_draft("https://x"), &grantee())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Persistence(_)));
}

#[tokio::test]
async fn resubmission_after_rejection_returns_to_submitted() {
    let h = setup();
    let doc = h
        .workflow
        .submit_evidence("P1", &payout(), 0, url_draft("https://v1"), &grantee())
        .await
        .unwrap();
    let doc = h
        .workflow
        .reject_milestone("P1", &doc, 0, &provider())
        .await
        .unwrap();
    assert_eq!(doc[0].status, MilestoneStatus::Rejected);

    let doc = h
        .workflow
        .submit_evidence("P1", &doc, 0, url_draft("https://v2"), &grantee())
        .await
        .unwrap();
    assert_eq!(doc[0].status, MilestoneStatus::Submitted);
    assert_eq!(doc[0].evidences.len(), 2);
}

// ─────────────────────────────────────────────────────────
// Feedback
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn feedback_attaches_to_last_evidence_with_author() {
    let h = setup();
    let doc = h
        .workflow
        .submit_evidence("P1", &payout(), 0, url_draft("https://x"), &grantee())
        .await
        .unwrap();

    let outcome = h
        .workflow
        .submit_feedback(
            "P1",
            &doc,
            0,
            "Looks good",
            vec![],
            &provider(),
            EvidenceTarget::Last,
        )
        .await
        .unwrap();

    let FeedbackOutcome::Saved(next) = outcome else {
        panic!("expected feedback to save");
    };
    let fb = &next[0].evidences[0].feedback[0];
    assert_eq!(fb.message, "Looks good");
    assert_eq!(fb.author, "provider@example.com");
}

#[tokio::test]
async fn feedback_without_evidence_is_silent_noop() {
    let h = setup();
    let outcome = h
        .workflow
        .submit_feedback(
            "P1",
            &payout(),
            0,
            "Anything here?",
            vec![],
            &provider(),
            EvidenceTarget::Last,
        )
        .await
        .unwrap();

    assert!(matches!(outcome, FeedbackOutcome::NoEvidence));
    assert_eq!(h.store.replace_count().await, 0);
}

#[tokio::test]
async fn feedback_requires_non_blank_message() {
    let h = setup();
    let err = h
        .workflow
        .submit_feedback(
            "P1",
            &payout(),
            0,
            "   ",
            vec![],
            &provider(),
            EvidenceTarget::Last,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::EmptyMessage));
}

// ─────────────────────────────────────────────────────────
// Approve / complete / reject
// ─────────────────────────────────────────────────────────

fn chain_approval() -> Option<ChainApproval> {
    Some(ChainApproval {
        contract_id: "C1".to_string(),
        approver: Some("GAPPROVER".to_string()),
    })
}

#[tokio::test]
async fn approve_persists_after_successful_chain_call() {
    let h = setup();
    let next = h
        .workflow
        .approve_milestone("P1", &payout(), 0, chain_approval(), &provider())
        .await
        .unwrap();

    assert_eq!(h.escrow.approve_calls.load(Ordering::SeqCst), 1);
    assert!(next[0].flags.approved);
    assert!(!next[0].flags.resolved);
    assert_eq!(next[0].status, MilestoneStatus::Pending);
    assert!(h.store.last_persisted().await[0].flags.approved);
}

#[tokio::test]
async fn approve_aborts_when_chain_call_fails() {
    let h = setup_with_escrow(StubEscrow {
        fail_writes: true,
        ..Default::default()
    });
    let before = payout();
    let err = h
        .workflow
        .approve_milestone("P1", &before, 0, chain_approval(), &provider())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ChainCall(_)));
    // No local mutation, no persistence.
    assert_eq!(h.store.replace_count().await, 0);
    assert!(!before[0].flags.approved);
}

#[tokio::test]
async fn approve_aborts_when_contract_refuses() {
    let h = setup_with_escrow(StubEscrow {
        accept_writes: false,
        ..Default::default()
    });
    let err = h
        .workflow
        .approve_milestone("P1", &payout(), 0, chain_approval(), &provider())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ChainCallRejected));
    assert_eq!(h.store.replace_count().await, 0);
}

#[tokio::test]
async fn approve_without_contract_skips_the_chain() {
    let h = setup();
    let next = h
        .workflow
        .approve_milestone("P1", &payout(), 1, None, &provider())
        .await
        .unwrap();
    assert_eq!(h.escrow.approve_calls.load(Ordering::SeqCst), 0);
    assert!(next[1].flags.approved);
}

#[tokio::test]
async fn approve_rejects_grantee_before_any_call() {
    let h = setup();
    let err = h
        .workflow
        .approve_milestone("P1", &payout(), 0, chain_approval(), &grantee())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::RoleNotPermitted { .. }));
    assert_eq!(h.escrow.approve_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.replace_count().await, 0);
}

#[tokio::test]
async fn admin_may_moderate() {
    let h = setup();
    let admin = Actor::new(Role::Admin, "admin@example.com");
    let next = h
        .workflow
        .approve_milestone("P1", &payout(), 0, None, &admin)
        .await
        .unwrap();
    assert!(next[0].flags.approved);
}

#[tokio::test]
async fn complete_carries_encoded_evidence_on_chain() {
    let h = setup();
    let doc = h
        .workflow
        .submit_evidence(
            "P1",
            &payout(),
            0,
            EvidenceDraft {
                url: Some("https://x".to_string()),
                notes: Some("done".to_string()),
                ..Default::default()
            },
            &grantee(),
        )
        .await
        .unwrap();

    let next = h
        .workflow
        .complete_milestone(
            "P1",
            &doc,
            0,
            Some(ChainCompletion {
                contract_id: "C1".to_string(),
                service_provider: Some("GSP".to_string()),
            }),
            &provider(),
        )
        .await
        .unwrap();

    assert_eq!(next[0].status, MilestoneStatus::Completed);
    let requests = h.escrow.complete_requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].contract_id, "C1");
    assert_eq!(requests[0].new_status, "completed");
    assert_eq!(requests[0].new_evidence, "0:url=@https://x&notes=done");
}

#[tokio::test]
async fn complete_aborts_when_chain_call_fails() {
    let h = setup_with_escrow(StubEscrow {
        fail_writes: true,
        ..Default::default()
    });
    let err = h
        .workflow
        .complete_milestone(
            "P1",
            &payout(),
            0,
            Some(ChainCompletion {
                contract_id: "C1".to_string(),
                service_provider: None,
            }),
            &provider(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ChainCall(_)));
    assert_eq!(h.store.replace_count().await, 0);
}

#[tokio::test]
async fn reject_is_local_only_and_clears_approval() {
    let h = setup();
    let mut doc = payout();
    doc[0].flags.approved = true;
    doc[0].status = MilestoneStatus::Submitted;

    let next = h
        .workflow
        .reject_milestone("P1", &doc, 0, &provider())
        .await
        .unwrap();

    assert_eq!(next[0].status, MilestoneStatus::Rejected);
    assert!(!next[0].flags.approved);
    assert_eq!(h.escrow.approve_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.replace_count().await, 1);
}

#[tokio::test]
async fn reject_rejects_grantee() {
    let h = setup();
    let err = h
        .workflow
        .reject_milestone("P1", &payout(), 0, &grantee())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::RoleNotPermitted { .. }));
    assert_eq!(h.store.replace_count().await, 0);
}

#[tokio::test]
async fn out_of_range_index_fails_before_chain_call() {
    let h = setup();
    let err = h
        .workflow
        .approve_milestone("P1", &payout(), 5, chain_approval(), &provider())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::IndexOutOfRange { index: 5, .. }));
    assert_eq!(h.escrow.approve_calls.load(Ordering::SeqCst), 0);
}
