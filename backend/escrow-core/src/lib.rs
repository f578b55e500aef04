//! Milestone & escrow reconciliation core.
//!
//! Keeps the off-chain milestone ledger of a grant payout (a JSON document
//! per payout) consistent with the authoritative state of its on-chain
//! escrow contract, while mediating the grantee/provider evidence and
//! approval workflow:
//!
//! | Concern        | Module                                           |
//! |----------------|--------------------------------------------------|
//! | Document model | [`model`], [`document`] (pure transforms)        |
//! | Workflow       | [`workflow`] — role-gated submit/approve/reject/complete |
//! | Balance reads  | [`balance`] — read-through cache with staleness  |
//! | Reconciliation | [`watcher`] — chain → local merge of `resolved`  |
//! | Collaborators  | [`ports`] — persistence, escrow contract, uploads |
//! | RPC client     | [`rpc`] — Soroban JSON-RPC [`ports::EscrowClient`] |
//!
//! The core is a library consumed by UI code: it exposes no HTTP surface
//! and owns no storage.  Operations with on-chain effect commit the chain
//! call before local persistence, so the local document never claims a
//! state the chain refused.

pub mod balance;
pub mod config;
pub mod document;
pub mod errors;
pub mod model;
pub mod ports;
pub mod rpc;
pub mod watcher;
pub mod workflow;

#[cfg(test)]
mod test_workflow;

pub use balance::BalanceCache;
pub use config::Config;
pub use document::EvidenceTarget;
pub use errors::{CoreError, Result};
pub use model::{Actor, Evidence, EvidenceDraft, Feedback, FileUpload, Milestone, MilestoneStatus, Role};
pub use ports::{EscrowClient, PersistenceGateway, UploadService};
pub use rpc::SorobanEscrowClient;
pub use watcher::{PayoutRef, ResolutionCheck, ResolutionWatcher};
pub use workflow::{ChainApproval, ChainCompletion, FeedbackOutcome, MilestoneWorkflow};
