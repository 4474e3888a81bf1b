//! Quorum fan-out.
//!
//! A request goes to every candidate node concurrently. Responses are
//! classified as they arrive; the round ends as soon as enough nodes have
//! accepted, as soon as enough can no longer accept, or at the deadline.
//! Outstanding requests are aborted when the round ends, and also when the
//! caller drops the future.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::messages::{NodeId, NodeRejection, NodeRequest, NodeResponse};
use crate::transport::NodeTransport;

/// How the caller judged one node's response.
#[derive(Debug)]
pub enum Verdict<T> {
    /// The node agreed and produced something usable.
    Accept(T),
    /// The node refused.
    Reject(NodeRejection),
    /// The response was unusable (wrong kind, bad proof, bad signature).
    Invalid(String),
}

/// What happened in one quorum round.
#[derive(Debug)]
pub struct QuorumOutcome<T> {
    pub accepted: Vec<(NodeId, T)>,
    pub rejections: Vec<(NodeId, NodeRejection)>,
    /// Transport failures and invalid responses.
    pub failures: Vec<String>,
    pub timed_out: bool,
    /// Number of nodes the request went to.
    pub candidates: usize,
}

impl<T> QuorumOutcome<T> {
    pub fn reached(&self, needed: usize) -> bool {
        self.accepted.len() >= needed
    }

    /// The most common refusal, if refusals alone made the quorum impossible.
    ///
    /// Ties go to the refusal seen first.
    pub fn dominant_rejection(&self, needed: usize) -> Option<NodeRejection> {
        if self.rejections.len() <= self.candidates.saturating_sub(needed) {
            return None;
        }

        let mut counts: HashMap<NodeRejection, usize> = HashMap::new();
        for (_, rejection) in &self.rejections {
            *counts.entry(*rejection).or_default() += 1;
        }

        let mut best: Option<(NodeRejection, usize)> = None;
        for (_, rejection) in &self.rejections {
            let count = counts[rejection];
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((*rejection, count));
            }
        }
        best.map(|(rejection, _)| rejection)
    }

    pub fn into_accepted(self) -> Vec<(NodeId, T)> {
        self.accepted
    }
}

/// When a round may end before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRule {
    /// Stop at `needed` acceptances, or once they are out of reach.
    Quorum(usize),
    /// Wait for every node or the deadline.
    All,
    /// Wait for every node or the deadline, but stop once `needed`
    /// acceptances are out of reach.
    Every(usize),
}

/// Send each request to its node and classify the answers.
pub async fn gather<T, F>(
    requests: Vec<(Arc<dyn NodeTransport>, NodeRequest)>,
    stop: StopRule,
    timeout: Duration,
    mut classify: F,
) -> QuorumOutcome<T>
where
    F: FnMut(NodeId, NodeResponse) -> Verdict<T>,
{
    let deadline = Instant::now() + timeout;
    let candidates = requests.len();
    let mut set: JoinSet<(NodeId, Result<NodeResponse, TransportError>)> = JoinSet::new();

    for (transport, request) in requests {
        set.spawn(async move {
            let id = transport.node_id();
            (id, transport.call(request).await)
        });
    }

    let mut outcome = QuorumOutcome {
        accepted: Vec::new(),
        rejections: Vec::new(),
        failures: Vec::new(),
        timed_out: false,
        candidates,
    };

    loop {
        match stop {
            StopRule::Quorum(needed)
                if outcome.accepted.len() >= needed
                    || outcome.accepted.len() + set.len() < needed =>
            {
                break
            }
            StopRule::Every(needed) if outcome.accepted.len() + set.len() < needed => break,
            _ => {}
        }

        match tokio::time::timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok((id, Ok(response))))) => match classify(id, response) {
                Verdict::Accept(value) => outcome.accepted.push((id, value)),
                Verdict::Reject(rejection) => outcome.rejections.push((id, rejection)),
                Verdict::Invalid(reason) => {
                    warn!(node = %id, %reason, "invalid node response");
                    outcome.failures.push(format!("{id}: {reason}"));
                }
            },
            Ok(Some(Ok((id, Err(e))))) => {
                debug!(node = %id, error = %e, "node call failed");
                outcome.failures.push(format!("{id}: {e}"));
            }
            Ok(Some(Err(e))) => outcome.failures.push(format!("task failed: {e}")),
            Ok(None) => break,
            Err(_) => {
                outcome.timed_out = true;
                break;
            }
        }
    }

    debug!(
        candidates,
        accepted = outcome.accepted.len(),
        rejected = outcome.rejections.len(),
        failed = outcome.failures.len(),
        timed_out = outcome.timed_out,
        aborted = set.len(),
        "quorum round finished"
    );
    outcome
}
