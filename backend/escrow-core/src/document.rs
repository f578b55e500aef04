//! Pure functional transformations over the milestone array.
//!
//! Every operation takes the current array by reference and returns a new
//! one; the input is never mutated.  [`merge_resolved_flags`] is the only
//! operation that writes `flags.resolved`, and the status setters are the
//! only operations that write `status`, so concurrent writers touch
//! disjoint fields.

use crate::errors::{CoreError, Result};
use crate::model::{Evidence, Feedback, Milestone, MilestoneStatus};

/// Which evidence entry a feedback comment attaches to.
#[derive(Debug, Clone, Copy, Default)]
pub enum EvidenceTarget {
    /// The most recently submitted entry.
    #[default]
    Last,
    At(usize),
}

/// Result of [`append_feedback`].
#[derive(Debug, Clone)]
pub enum AppendFeedback {
    Appended(Vec<Milestone>),
    /// No evidence entry exists to attach to; the document is unchanged.
    NoEvidence,
}

pub(crate) fn check_index(milestones: &[Milestone], idx: usize) -> Result<()> {
    if idx >= milestones.len() {
        return Err(CoreError::IndexOutOfRange {
            index: idx,
            len: milestones.len(),
        });
    }
    Ok(())
}

/// Append an evidence entry and move the milestone to `SUBMITTED`.
///
/// Re-submission after a rejection goes through here too: the status is
/// explicitly set back to `SUBMITTED`.
pub fn append_evidence(
    milestones: &[Milestone],
    idx: usize,
    entry: Evidence,
) -> Result<Vec<Milestone>> {
    check_index(milestones, idx)?;
    let mut next = milestones.to_vec();
    next[idx].evidences.push(entry);
    next[idx].status = MilestoneStatus::Submitted;
    Ok(next)
}

/// Append a feedback comment to the targeted evidence entry.
///
/// Returns [`AppendFeedback::NoEvidence`] when the milestone has no evidence
/// yet or the explicit target index is out of range — feedback must anchor
/// to an existing submission.
pub fn append_feedback(
    milestones: &[Milestone],
    idx: usize,
    target: EvidenceTarget,
    feedback: Feedback,
) -> Result<AppendFeedback> {
    check_index(milestones, idx)?;
    let evidences = &milestones[idx].evidences;
    let target_idx = match target {
        EvidenceTarget::Last => match evidences.len().checked_sub(1) {
            Some(i) => i,
            None => return Ok(AppendFeedback::NoEvidence),
        },
        EvidenceTarget::At(i) => i,
    };
    if target_idx >= evidences.len() {
        return Ok(AppendFeedback::NoEvidence);
    }
    let mut next = milestones.to_vec();
    next[idx].evidences[target_idx].feedback.push(feedback);
    Ok(AppendFeedback::Appended(next))
}

/// Set `flags.approved`, preserving everything else.
pub fn set_approved(milestones: &[Milestone], idx: usize, value: bool) -> Result<Vec<Milestone>> {
    check_index(milestones, idx)?;
    let mut next = milestones.to_vec();
    next[idx].flags.approved = value;
    Ok(next)
}

/// Move the milestone to `REJECTED` and withdraw any approval.
pub fn set_rejected(milestones: &[Milestone], idx: usize) -> Result<Vec<Milestone>> {
    check_index(milestones, idx)?;
    let mut next = milestones.to_vec();
    next[idx].status = MilestoneStatus::Rejected;
    next[idx].flags.approved = false;
    Ok(next)
}

/// Move the milestone to `COMPLETED`.
pub fn set_completed(milestones: &[Milestone], idx: usize) -> Result<Vec<Milestone>> {
    check_index(milestones, idx)?;
    let mut next = milestones.to_vec();
    next[idx].status = MilestoneStatus::Completed;
    Ok(next)
}

/// Outcome of a resolved-flag merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub milestones: Vec<Milestone>,
    /// Indices whose `resolved` flag flipped false → true on this merge.
    pub changed: Vec<usize>,
}

/// Merge on-chain resolution flags into the local document.
///
/// Monotonic and one-directional: an index flips only from false to true,
/// and only when the chain reports true.  Chain flags beyond the local
/// array length are ignored — the local document is authoritative for the
/// milestone count.  This is the sole writer of `flags.resolved`.
pub fn merge_resolved_flags(milestones: &[Milestone], chain_flags: &[bool]) -> MergeOutcome {
    let mut next = milestones.to_vec();
    let mut changed = Vec::new();
    for (i, m) in next.iter_mut().enumerate() {
        if chain_flags.get(i).copied().unwrap_or(false) && !m.flags.resolved {
            m.flags.resolved = true;
            changed.push(i);
        }
    }
    MergeOutcome {
        milestones: next,
        changed,
    }
}
