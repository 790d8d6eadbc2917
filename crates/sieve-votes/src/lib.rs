//! Vote and engagement aggregation.
//!
//! [`VoteAggregator`] reads proposals, vote submissions, and profile
//! relationships from a [`VoteDataSource`] and folds them into the
//! `proposal id -> VoteAggregation` map that pipeline expressions see as
//! `voteData`.

pub mod memory;

pub use memory::{InMemoryVoteSource, VoteDataset};

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sieve_types::{Result, VoteAggregation};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A proposal as far as aggregation cares: its id and owning profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    pub id: String,
    pub profile_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSubmission {
    pub id: String,
    pub proposal_id: String,
    pub voter_profile_id: String,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    Like,
    Follow,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRelationship {
    pub source_profile_id: String,
    pub target_profile_id: String,
    pub kind: RelationshipKind,
}

/// How a single submission counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

impl VoteChoice {
    /// Read the choice out of a submission payload.
    ///
    /// Accepts a string under `vote`, `decision` or `choice`, or a boolean
    /// under `approve`/`approved`. Anything else is unclassified.
    pub fn classify(payload: &Value) -> Option<Self> {
        for key in ["vote", "decision", "choice"] {
            if let Some(Value::String(s)) = payload.get(key) {
                return match s.trim().to_ascii_lowercase().as_str() {
                    "approve" | "approved" | "yes" | "for" | "accept" => Some(Self::Approve),
                    "reject" | "rejected" | "no" | "against" | "deny" => Some(Self::Reject),
                    "abstain" => Some(Self::Abstain),
                    _ => None,
                };
            }
        }
        for key in ["approve", "approved"] {
            if let Some(Value::Bool(b)) = payload.get(key) {
                return Some(if *b { Self::Approve } else { Self::Reject });
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// VoteDataSource trait
// ---------------------------------------------------------------------------

/// Where aggregation reads its raw records from.
#[async_trait]
pub trait VoteDataSource: Send + Sync {
    async fn proposals(&self, process_instance_id: &str) -> Result<Vec<ProposalRecord>>;

    async fn votes(&self, process_instance_id: &str) -> Result<Vec<VoteSubmission>>;

    /// Relationships whose target is one of `profile_ids`.
    async fn relationships(&self, profile_ids: &[String]) -> Result<Vec<ProfileRelationship>>;

    /// Number of voters eligible in this process, when known.
    async fn eligible_voter_count(&self, _process_instance_id: &str) -> Result<Option<u64>> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// VoteAggregator
// ---------------------------------------------------------------------------

pub struct VoteAggregator<S> {
    source: S,
}

impl<S: VoteDataSource> VoteAggregator<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Build `voteData` for a process instance.
    ///
    /// Never fails: a source error is logged and yields an empty map, so
    /// pipelines must already cope with missing `voteData` entries.
    pub async fn aggregate(&self, process_instance_id: &str) -> BTreeMap<String, VoteAggregation> {
        match self.try_aggregate(process_instance_id).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(
                    process = %process_instance_id,
                    error = %e,
                    "Vote aggregation failed, continuing without vote data"
                );
                BTreeMap::new()
            }
        }
    }

    async fn try_aggregate(
        &self,
        process_instance_id: &str,
    ) -> Result<BTreeMap<String, VoteAggregation>> {
        let proposals = self.source.proposals(process_instance_id).await?;
        let votes = self.source.votes(process_instance_id).await?;
        let eligible = self.source.eligible_voter_count(process_instance_id).await?;

        let owners: Vec<String> = proposals
            .iter()
            .map(|p| p.profile_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let relationships = if owners.is_empty() {
            Vec::new()
        } else {
            self.source.relationships(&owners).await?
        };

        let mut likes: HashMap<&str, u64> = HashMap::new();
        let mut follows: HashMap<&str, u64> = HashMap::new();
        for rel in &relationships {
            // Only profiles that own an in-scope proposal count.
            if !owners.contains(&rel.target_profile_id) {
                continue;
            }
            let counter = match rel.kind {
                RelationshipKind::Like => &mut likes,
                RelationshipKind::Follow => &mut follows,
                RelationshipKind::Other => continue,
            };
            *counter.entry(rel.target_profile_id.as_str()).or_default() += 1;
        }

        let mut data: BTreeMap<String, VoteAggregation> = proposals
            .iter()
            .map(|p| {
                let agg = VoteAggregation {
                    like_count: likes.get(p.profile_id.as_str()).copied().unwrap_or(0),
                    follow_count: follows.get(p.profile_id.as_str()).copied().unwrap_or(0),
                    ..Default::default()
                };
                (p.id.clone(), agg)
            })
            .collect();

        let mut skipped = 0usize;
        for vote in votes {
            let Some(agg) = data.get_mut(&vote.proposal_id) else {
                skipped += 1;
                continue;
            };
            agg.vote_count += 1;
            match VoteChoice::classify(&vote.payload) {
                Some(VoteChoice::Approve) => agg.approval_count += 1,
                Some(VoteChoice::Reject) => agg.rejection_count += 1,
                Some(VoteChoice::Abstain) => agg.abstain_count += 1,
                None => {}
            }
            agg.votes.push(vote.payload);
        }
        if skipped > 0 {
            tracing::debug!(
                process = %process_instance_id,
                skipped,
                "Ignored votes for proposals outside the process"
            );
        }

        for agg in data.values_mut() {
            agg.finalize(eligible);
        }

        tracing::debug!(
            process = %process_instance_id,
            proposals = data.len(),
            relationships = relationships.len(),
            "Aggregated vote data"
        );
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
