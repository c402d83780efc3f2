//! Vote weighting and report relevance.
//!
//! A user's voting weight is the number of post-count thresholds they have
//! reached, unless an administrator forced a fixed weight. A report's
//! relevance is the weighted sum of its votes, or the override if one is set.

use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelevanceError {
    #[error("invalid threshold '{0}' in voting weight definition")]
    InvalidThreshold(String),

    #[error("voting weight thresholds must be strictly ascending")]
    NotAscending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VotingWeightDefinition {
    thresholds: Vec<u64>,
}

impl VotingWeightDefinition {
    pub fn new(thresholds: Vec<u64>) -> Result<Self, RelevanceError> {
        if thresholds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(RelevanceError::NotAscending);
        }
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &[u64] {
        &self.thresholds
    }

    /// Weight earned from `post_count` posts. Never below 1.
    pub fn calculated_weight(&self, post_count: u64) -> i64 {
        let reached = self
            .thresholds
            .iter()
            .take_while(|&&threshold| post_count >= threshold)
            .count() as i64;
        reached.max(1)
    }

    pub fn weight(&self, post_count: u64, forced: Option<i64>) -> i64 {
        forced.unwrap_or_else(|| self.calculated_weight(post_count))
    }
}

impl FromStr for VotingWeightDefinition {
    type Err = RelevanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let thresholds = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| RelevanceError::InvalidThreshold(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(thresholds)
    }
}

impl std::fmt::Display for VotingWeightDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.thresholds.iter().map(u64::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

/// A vote together with what is needed to weigh it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedVote {
    pub upvote: bool,
    pub voter_post_count: u64,
    pub voter_forced_weight: Option<i64>,
}

pub fn computed_relevance(definition: &VotingWeightDefinition, votes: &[WeightedVote]) -> i64 {
    votes
        .iter()
        .map(|vote| {
            let weight = definition.weight(vote.voter_post_count, vote.voter_forced_weight);
            if vote.upvote {
                weight
            } else {
                -weight
            }
        })
        .sum()
}

pub fn effective_relevance(computed: i64, override_value: Option<i64>) -> i64 {
    override_value.unwrap_or(computed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(upvote: bool, posts: u64, forced: Option<i64>) -> WeightedVote {
        WeightedVote {
            upvote,
            voter_post_count: posts,
            voter_forced_weight: forced,
        }
    }

    #[test]
    fn test_parse_definition() {
        let definition: VotingWeightDefinition = " 0, 10 ,50,".parse().unwrap();
        assert_eq!(definition.thresholds(), &[0, 10, 50]);
        assert_eq!(definition.to_string(), "0,10,50");
    }

    #[test]
    fn test_rejects_bad_definitions() {
        assert_eq!(
            "0,ten".parse::<VotingWeightDefinition>(),
            Err(RelevanceError::InvalidThreshold("ten".to_string()))
        );
        assert_eq!(
            "5,5".parse::<VotingWeightDefinition>(),
            Err(RelevanceError::NotAscending)
        );
        assert_eq!(
            "10,2".parse::<VotingWeightDefinition>(),
            Err(RelevanceError::NotAscending)
        );
    }

    #[test]
    fn test_calculated_weight_counts_reached_thresholds() {
        let definition: VotingWeightDefinition = "0,10,50".parse().unwrap();
        assert_eq!(definition.calculated_weight(0), 1);
        assert_eq!(definition.calculated_weight(9), 1);
        assert_eq!(definition.calculated_weight(10), 2);
        assert_eq!(definition.calculated_weight(500), 3);
    }

    #[test]
    fn test_weight_floor_and_empty_definition() {
        let definition: VotingWeightDefinition = "5,20".parse().unwrap();
        assert_eq!(definition.calculated_weight(0), 1);

        let empty = VotingWeightDefinition::default();
        assert_eq!(empty.calculated_weight(1_000), 1);
    }

    #[test]
    fn test_forced_weight_wins() {
        let definition: VotingWeightDefinition = "0,10".parse().unwrap();
        assert_eq!(definition.weight(100, Some(7)), 7);
        assert_eq!(definition.weight(100, None), 2);
    }

    #[test]
    fn test_computed_relevance() {
        let definition: VotingWeightDefinition = "0,10,50".parse().unwrap();
        let votes = [
            vote(true, 60, None),   // +3
            vote(true, 0, None),    // +1
            vote(false, 12, None),  // -2
            vote(false, 0, Some(5)), // -5
        ];
        assert_eq!(computed_relevance(&definition, &votes), -3);
        assert_eq!(computed_relevance(&definition, &[]), 0);
    }

    #[test]
    fn test_override_replaces_computed() {
        assert_eq!(effective_relevance(12, None), 12);
        assert_eq!(effective_relevance(12, Some(-4)), -4);
    }
}
