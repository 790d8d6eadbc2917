//! In-memory [`VoteDataSource`] for tests and file-driven runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sieve_types::Result;
use tokio::sync::RwLock;

use crate::{ProfileRelationship, ProposalRecord, VoteDataSource, VoteSubmission};

/// The records of one process instance, in the shape the CLI reads from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteDataset {
    #[serde(default)]
    pub proposals: Vec<ProposalRecord>,
    #[serde(default)]
    pub votes: Vec<VoteSubmission>,
    #[serde(default)]
    pub relationships: Vec<ProfileRelationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_voters: Option<u64>,
}

/// Serves a single [`VoteDataset`] regardless of the process id asked for.
#[derive(Debug, Default)]
pub struct InMemoryVoteSource {
    data: RwLock<VoteDataset>,
}

impl InMemoryVoteSource {
    pub fn new(data: VoteDataset) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn from_json(source: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(source)?))
    }

    pub async fn add_proposal(&self, proposal: ProposalRecord) {
        self.data.write().await.proposals.push(proposal);
    }

    pub async fn add_vote(&self, vote: VoteSubmission) {
        self.data.write().await.votes.push(vote);
    }

    pub async fn add_relationship(&self, relationship: ProfileRelationship) {
        self.data.write().await.relationships.push(relationship);
    }
}

#[async_trait]
impl VoteDataSource for InMemoryVoteSource {
    async fn proposals(&self, _process_instance_id: &str) -> Result<Vec<ProposalRecord>> {
        Ok(self.data.read().await.proposals.clone())
    }

    async fn votes(&self, _process_instance_id: &str) -> Result<Vec<VoteSubmission>> {
        Ok(self.data.read().await.votes.clone())
    }

    async fn relationships(&self, profile_ids: &[String]) -> Result<Vec<ProfileRelationship>> {
        Ok(self
            .data
            .read()
            .await
            .relationships
            .iter()
            .filter(|r| profile_ids.contains(&r.target_profile_id))
            .cloned()
            .collect())
    }

    async fn eligible_voter_count(&self, _process_instance_id: &str) -> Result<Option<u64>> {
        Ok(self.data.read().await.eligible_voters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RelationshipKind;

    #[tokio::test]
    async fn relationships_are_filtered_by_target() {
        let source = InMemoryVoteSource::default();
        let edges = [
            ("owner", RelationshipKind::Like),
            ("stranger", RelationshipKind::Follow),
        ];
        for (target, kind) in edges {
            source
                .add_relationship(ProfileRelationship {
                    source_profile_id: "fan".into(),
                    target_profile_id: target.into(),
                    kind,
                })
                .await;
        }
        let rels = source.relationships(&["owner".to_string()]).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].kind, RelationshipKind::Like);
    }

    #[tokio::test]
    async fn parses_dataset_json() {
        let source = InMemoryVoteSource::from_json(
            r#"{
                "proposals": [{"id": "p1", "profileId": "u1"}],
                "votes": [{"id": "v1", "proposalId": "p1", "voterProfileId": "u2",
                           "payload": {"vote": "yes"}, "createdAt": "2024-05-01T10:00:00Z"}],
                "eligibleVoters": 12
            }"#,
        )
        .unwrap();
        assert_eq!(source.proposals("any").await.unwrap().len(), 1);
        assert_eq!(source.votes("any").await.unwrap()[0].voter_profile_id, "u2");
        assert_eq!(source.eligible_voter_count("any").await.unwrap(), Some(12));
    }
}
