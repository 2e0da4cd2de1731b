//! Source-rating comparator (C3): scores and orders candidate sources for a package.
//!
//! Pluggable strategy, mirroring the shape of [`crate::transport::FileSourceDriver`] — ratings
//! may later be extended with historical-failure penalties without touching the download
//! worker's attempt loop.

/// Weight given to a source whose owning centre matches the package's producing centre.
pub const AFFINITY_WEIGHT: i64 = 30;

/// A candidate hosting relation, as seen by the rating comparator. Carries only what rating
/// needs, not the full `FileSourceHasZip` row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// The `FileSourceHasZip` row id, used as the deterministic tie-break key.
    pub source_id: i64,
    /// Whether the hosting source's centre equals the package's producing centre.
    pub same_centre: bool,
}

/// A pluggable strategy for rating and ordering download candidates.
pub trait SourceRating: Send + Sync {
    /// Compute the rating of a single candidate.
    fn rate(&self, candidate: &Candidate) -> i64;

    /// Sort candidates into attempt order: highest rating first, ties broken by ascending
    /// source id. Rates *every* candidate, per the corrected `sortByPreference` contract (see
    /// the design-notes open question this implementation follows).
    fn sort(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates.sort_by(|a, b| {
            let rating_a = self.rate(a);
            let rating_b = self.rate(b);
            rating_b
                .cmp(&rating_a)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        candidates
    }
}

/// The baseline rating strategy described in §4.3: affinity-matched sources score
/// [`AFFINITY_WEIGHT`], everything else scores zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct AffinityRating;

impl SourceRating for AffinityRating {
    fn rate(&self, candidate: &Candidate) -> i64 {
        if candidate.same_centre {
            AFFINITY_WEIGHT
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_matched_source_outranks_unmatched() {
        let candidates = vec![
            Candidate {
                source_id: 2,
                same_centre: false,
            },
            Candidate {
                source_id: 1,
                same_centre: true,
            },
        ];
        let sorted = AffinityRating.sort(candidates);
        assert_eq!(sorted[0].source_id, 1);
        assert_eq!(sorted[1].source_id, 2);
    }

    #[test]
    fn ties_break_by_ascending_source_id() {
        let candidates = vec![
            Candidate {
                source_id: 5,
                same_centre: false,
            },
            Candidate {
                source_id: 3,
                same_centre: false,
            },
            Candidate {
                source_id: 4,
                same_centre: false,
            },
        ];
        let sorted = AffinityRating.sort(candidates);
        let ids: Vec<i64> = sorted.iter().map(|c| c.source_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn all_candidates_are_rated_not_just_the_first() {
        // Regression test for the sortByPreference ambiguity: every candidate must be rated,
        // not only the first element of the input collection.
        let candidates = vec![
            Candidate {
                source_id: 10,
                same_centre: false,
            },
            Candidate {
                source_id: 20,
                same_centre: true,
            },
            Candidate {
                source_id: 30,
                same_centre: true,
            },
        ];
        let sorted = AffinityRating.sort(candidates);
        assert_eq!(sorted[0].source_id, 20);
        assert_eq!(sorted[1].source_id, 30);
        assert_eq!(sorted[2].source_id, 10);
    }
}
