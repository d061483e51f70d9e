//! Proposal review loop
//!
//! Runs between preparing and executing a run: a reviewer sees each proposal
//! and accepts it, asks for a new one, changes the number of commits, or
//! aborts.

use crate::cluster::Cluster;
use crate::error::{CactusError, Result};
use tracing::{debug, warn};

/// What the reviewer wants to do with a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    /// Use the proposal
    Accept,
    /// Ask again with the same count
    Regenerate,
    /// Ask again for one more commit
    Increase,
    /// Ask again for one fewer commit
    Decrease,
    /// Stop without changing anything
    Abort,
}

/// Loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    /// A proposal is waiting for a decision
    Proposed,
    /// The proposal was accepted (terminal)
    Accepted,
    /// A new proposal with the same count is being fetched
    Regenerating,
    /// A new proposal with a different count is being fetched
    Adjusting,
    /// The reviewer gave up (terminal)
    Aborted,
}

/// Collaborator that shows proposals and returns decisions
pub trait ProposalReviewer {
    /// Decide on `clusters`, proposed for `requested` commits
    fn review(&mut self, clusters: &[Cluster], requested: Option<usize>) -> Result<ReviewDecision>;
}

/// Finite-state loop over a proposer and a reviewer
pub struct ReviewLoop<P>
where
    P: FnMut(Option<usize>) -> Result<Vec<Cluster>>,
{
    proposer: P,
    requested: Option<usize>,
    history: Vec<ReviewState>,
}

impl<P> ReviewLoop<P>
where
    P: FnMut(Option<usize>) -> Result<Vec<Cluster>>,
{
    /// Create a loop; `proposer` fetches clusters for a requested count
    pub fn new(proposer: P, requested: Option<usize>) -> Self {
        Self {
            proposer,
            requested,
            history: Vec::new(),
        }
    }

    /// Count the next proposal will ask for
    pub fn requested(&self) -> Option<usize> {
        self.requested
    }

    /// Current state, if the loop has started
    pub fn state(&self) -> Option<ReviewState> {
        self.history.last().copied()
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[ReviewState] {
        &self.history
    }

    /// Propose and review until the reviewer accepts or aborts
    pub fn run(&mut self, reviewer: &mut dyn ProposalReviewer) -> Result<Vec<Cluster>> {
        loop {
            let clusters = (self.proposer)(self.requested)?;
            self.history.push(ReviewState::Proposed);

            let decision = reviewer.review(&clusters, self.requested)?;
            debug!("Review decision: {:?}", decision);

            match decision {
                ReviewDecision::Accept => {
                    self.history.push(ReviewState::Accepted);
                    return Ok(clusters);
                }
                ReviewDecision::Regenerate => {
                    self.history.push(ReviewState::Regenerating);
                }
                ReviewDecision::Increase => {
                    self.history.push(ReviewState::Adjusting);
                    let current = self.requested.unwrap_or(clusters.len());
                    self.requested = Some(current + 1);
                }
                ReviewDecision::Decrease => {
                    self.history.push(ReviewState::Adjusting);
                    let current = self.requested.unwrap_or(clusters.len());
                    if current <= 1 {
                        warn!("Cannot decrease further. Minimum number of commits is 1.");
                    }
                    self.requested = Some(current.saturating_sub(1).max(1));
                }
                ReviewDecision::Abort => {
                    self.history.push(ReviewState::Aborted);
                    return Err(CactusError::Aborted);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HunkIndex;
    use pretty_assertions::assert_eq;

    /// Replays decisions and records the counts it was shown
    struct Scripted {
        decisions: Vec<ReviewDecision>,
        seen: Vec<Option<usize>>,
    }

    impl Scripted {
        fn new(decisions: &[ReviewDecision]) -> Self {
            Self {
                decisions: decisions.iter().rev().copied().collect(),
                seen: Vec::new(),
            }
        }
    }

    impl ProposalReviewer for Scripted {
        fn review(&mut self, _clusters: &[Cluster], requested: Option<usize>) -> Result<ReviewDecision> {
            self.seen.push(requested);
            Ok(self.decisions.pop().unwrap_or(ReviewDecision::Accept))
        }
    }

    /// Proposes `n` single-hunk clusters, or 3 when no count is requested
    fn propose(requested: Option<usize>) -> Result<Vec<Cluster>> {
        let n = requested.unwrap_or(3);
        Ok((1..=n)
            .map(|i| Cluster::new(format!("commit {i}"), vec![HunkIndex(i)]))
            .collect())
    }

    #[test]
    fn test_accept_first_proposal() {
        let mut review = ReviewLoop::new(propose, None);
        let clusters = review.run(&mut Scripted::new(&[])).unwrap();
        assert_eq!(clusters.len(), 3);
        assert_eq!(review.history(), &[ReviewState::Proposed, ReviewState::Accepted]);
    }

    #[test]
    fn test_increase_starts_from_proposal_size() {
        let mut reviewer = Scripted::new(&[ReviewDecision::Increase, ReviewDecision::Increase]);
        let mut review = ReviewLoop::new(propose, None);
        let clusters = review.run(&mut reviewer).unwrap();
        assert_eq!(clusters.len(), 5);
        assert_eq!(reviewer.seen, vec![None, Some(4), Some(5)]);
    }

    #[test]
    fn test_decrease_stops_at_one() {
        let mut reviewer = Scripted::new(&[
            ReviewDecision::Decrease,
            ReviewDecision::Decrease,
            ReviewDecision::Decrease,
        ]);
        let mut review = ReviewLoop::new(propose, Some(2));
        review.run(&mut reviewer).unwrap();
        assert_eq!(reviewer.seen, vec![Some(2), Some(1), Some(1), Some(1)]);
        assert_eq!(review.requested(), Some(1));
    }

    #[test]
    fn test_regenerate_keeps_count() {
        let mut calls = 0;
        let proposer = |requested: Option<usize>| {
            calls += 1;
            propose(requested)
        };
        let mut reviewer = Scripted::new(&[ReviewDecision::Regenerate]);
        let mut review = ReviewLoop::new(proposer, Some(2));
        review.run(&mut reviewer).unwrap();
        assert_eq!(reviewer.seen, vec![Some(2), Some(2)]);
        assert_eq!(
            review.history(),
            &[
                ReviewState::Proposed,
                ReviewState::Regenerating,
                ReviewState::Proposed,
                ReviewState::Accepted
            ]
        );
        drop(review);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_abort() {
        let mut review = ReviewLoop::new(propose, None);
        let err = review.run(&mut Scripted::new(&[ReviewDecision::Abort])).unwrap_err();
        assert!(matches!(err, CactusError::Aborted));
        assert_eq!(review.state(), Some(ReviewState::Aborted));
    }

    #[test]
    fn test_proposer_errors_propagate() {
        let mut review = ReviewLoop::new(|_| Err(CactusError::Remote("down".into())), None);
        let err = review.run(&mut Scripted::new(&[])).unwrap_err();
        assert!(matches!(err, CactusError::Remote(_)));
        assert_eq!(review.state(), None);
    }
}
