//! Reaction-time scoring: a configurable step table mapping latency to points.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// One step of the score table: every latency strictly below `below_ms` earns `points`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreTier {
    /// Exclusive upper bound of the latency covered by this tier.
    pub below_ms: u64,
    /// Points awarded inside this tier.
    pub points: u32,
}

/// Reasons a score table is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreTableError {
    /// At least one tier is required.
    #[error("score table must declare at least one tier")]
    Empty,
    /// Tier bounds must be strictly increasing.
    #[error("tier bounds must be strictly increasing ({previous}ms then {next}ms)")]
    UnorderedBounds {
        /// Bound of the earlier tier.
        previous: u64,
        /// Bound of the offending tier.
        next: u64,
    },
    /// A slower tier may never be worth more than a faster one.
    #[error("tier below {below_ms}ms awards more points than a faster tier")]
    IncreasingPoints {
        /// Bound of the offending tier.
        below_ms: u64,
    },
    /// The floor must be strictly positive.
    #[error("floor points must be strictly positive")]
    ZeroFloor,
    /// The floor must not exceed the slowest tier.
    #[error("floor points ({floor}) exceed the slowest tier ({slowest})")]
    FloorAboveTiers {
        /// Configured floor.
        floor: u32,
        /// Points of the slowest tier.
        slowest: u32,
    },
}

/// Monotonically non-increasing step function from latency to points.
///
/// Latencies above the last tier earn `floor_points`, which is always positive, so
/// [`ScoreTable::score_of`] is total over every possible latency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreTable {
    tiers: Vec<ScoreTier>,
    floor_points: u32,
}

impl ScoreTable {
    /// Build a validated table.
    pub fn new(tiers: Vec<ScoreTier>, floor_points: u32) -> Result<Self, ScoreTableError> {
        let Some(slowest) = tiers.last() else {
            return Err(ScoreTableError::Empty);
        };

        if floor_points == 0 {
            return Err(ScoreTableError::ZeroFloor);
        }

        if floor_points > slowest.points {
            return Err(ScoreTableError::FloorAboveTiers {
                floor: floor_points,
                slowest: slowest.points,
            });
        }

        for pair in tiers.windows(2) {
            let (faster, slower) = (pair[0], pair[1]);
            if slower.below_ms <= faster.below_ms {
                return Err(ScoreTableError::UnorderedBounds {
                    previous: faster.below_ms,
                    next: slower.below_ms,
                });
            }
            if slower.points > faster.points {
                return Err(ScoreTableError::IncreasingPoints {
                    below_ms: slower.below_ms,
                });
            }
        }

        Ok(Self {
            tiers,
            floor_points,
        })
    }

    /// Points earned for a reaction of `reaction_time_ms`.
    pub fn score_of(&self, reaction_time_ms: u64) -> u32 {
        self.tiers
            .iter()
            .find(|tier| reaction_time_ms < tier.below_ms)
            .map(|tier| tier.points)
            .unwrap_or(self.floor_points)
    }

    /// Tiers ordered from fastest to slowest.
    pub fn tiers(&self) -> &[ScoreTier] {
        &self.tiers
    }

    /// Points awarded past the slowest tier.
    pub fn floor_points(&self) -> u32 {
        self.floor_points
    }
}

impl Default for ScoreTable {
    fn default() -> Self {
        let tiers = [
            (150, 1000),
            (200, 900),
            (250, 800),
            (300, 700),
            (350, 600),
            (400, 500),
            (500, 400),
            (600, 300),
            (700, 200),
        ]
        .into_iter()
        .map(|(below_ms, points)| ScoreTier { below_ms, points })
        .collect();

        Self {
            tiers,
            floor_points: 100,
        }
    }
}

/// Qualitative label attached to a valid reaction for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceRating {
    /// Under 150ms.
    WorldChampion,
    /// Under 200ms.
    Elite,
    /// Under 250ms.
    Professional,
    /// Under 300ms.
    NearProfessional,
    /// Under 350ms.
    Karting,
    /// Under 400ms.
    Average,
    /// Under 500ms.
    NeedsPractice,
    /// Under 600ms.
    Amateur,
    /// Anything slower.
    Sunday,
}

impl PerformanceRating {
    /// Rate a reaction time.
    pub fn from_reaction_ms(reaction_time_ms: u64) -> Self {
        match reaction_time_ms {
            0..150 => Self::WorldChampion,
            150..200 => Self::Elite,
            200..250 => Self::Professional,
            250..300 => Self::NearProfessional,
            300..350 => Self::Karting,
            350..400 => Self::Average,
            400..500 => Self::NeedsPractice,
            500..600 => Self::Amateur,
            _ => Self::Sunday,
        }
    }

    /// Message shown next to the result.
    pub fn message(self) -> &'static str {
        match self {
            Self::WorldChampion => "Phenomenal! World champion reflexes",
            Self::Elite => "Extraordinary! Front-row F1 driver level",
            Self::Professional => "Excellent! Professional F1 driver time",
            Self::NearProfessional => "Very good! F2/F3 level, almost professional",
            Self::Karting => "Good, professional karting level",
            Self::Average => "Average, keep training like the pros",
            Self::NeedsPractice => "You need more simulator practice",
            Self::Amateur => "Amateur time, train more!",
            Self::Sunday => "Sunday morning pace, lots of practice needed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_canonical_values() {
        let table = ScoreTable::default();
        assert_eq!(table.score_of(0), 1000);
        assert_eq!(table.score_of(149), 1000);
        assert_eq!(table.score_of(150), 900);
        assert_eq!(table.score_of(180), 900);
        assert_eq!(table.score_of(399), 500);
        assert_eq!(table.score_of(699), 200);
        assert_eq!(table.score_of(700), 100);
    }

    #[test]
    fn default_table_passes_validation() {
        let table = ScoreTable::default();
        let rebuilt = ScoreTable::new(table.tiers().to_vec(), table.floor_points()).unwrap();
        assert_eq!(rebuilt, table);
    }

    #[test]
    fn score_is_monotonic_over_latency() {
        let table = ScoreTable::default();
        let mut previous = table.score_of(0);
        for ms in 1..2_000 {
            let current = table.score_of(ms);
            assert!(current <= previous, "score increased at {ms}ms");
            previous = current;
        }
    }

    #[test]
    fn score_is_positive_for_huge_latencies() {
        let table = ScoreTable::default();
        assert_eq!(table.score_of(u64::MAX), 100);
        assert!(table.score_of(60 * 60 * 1_000) > 0);
    }

    #[test]
    fn rejects_empty_table() {
        assert_eq!(ScoreTable::new(vec![], 10), Err(ScoreTableError::Empty));
    }

    #[test]
    fn rejects_unordered_bounds() {
        let tiers = vec![
            ScoreTier {
                below_ms: 200,
                points: 10,
            },
            ScoreTier {
                below_ms: 200,
                points: 5,
            },
        ];
        assert!(matches!(
            ScoreTable::new(tiers, 1),
            Err(ScoreTableError::UnorderedBounds { .. })
        ));
    }

    #[test]
    fn rejects_slower_tier_worth_more() {
        let tiers = vec![
            ScoreTier {
                below_ms: 100,
                points: 10,
            },
            ScoreTier {
                below_ms: 200,
                points: 20,
            },
        ];
        assert_eq!(
            ScoreTable::new(tiers, 1),
            Err(ScoreTableError::IncreasingPoints { below_ms: 200 })
        );
    }

    #[test]
    fn rejects_zero_or_oversized_floor() {
        let tiers = vec![ScoreTier {
            below_ms: 100,
            points: 10,
        }];
        assert_eq!(
            ScoreTable::new(tiers.clone(), 0),
            Err(ScoreTableError::ZeroFloor)
        );
        assert_eq!(
            ScoreTable::new(tiers, 11),
            Err(ScoreTableError::FloorAboveTiers {
                floor: 11,
                slowest: 10
            })
        );
    }

    #[test]
    fn ratings_follow_thresholds() {
        assert_eq!(
            PerformanceRating::from_reaction_ms(120),
            PerformanceRating::WorldChampion
        );
        assert_eq!(
            PerformanceRating::from_reaction_ms(180),
            PerformanceRating::Elite
        );
        assert_eq!(
            PerformanceRating::from_reaction_ms(599),
            PerformanceRating::Amateur
        );
        assert_eq!(
            PerformanceRating::from_reaction_ms(5_000),
            PerformanceRating::Sunday
        );
    }
}
