//! Decryption of the final tally by the authority.

use std::fmt;
use std::sync::Arc;

use fhe::bfv::SecretKey;
use tracing::{debug, info};

use crate::accumulator::{Tally, Undercount};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::params::SchemeParameters;

/// Per-candidate vote counts, candidate 1 first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultVector {
    counts: Vec<u64>,
    ballots: usize,
    noise_budget: usize,
    undercount: Option<Undercount>,
}

impl ResultVector {
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Number of ballots the counts were summed from.
    pub fn ballots(&self) -> usize {
        self.ballots
    }

    /// Noise budget, in bits, the tally still had when it was decrypted.
    pub fn noise_budget(&self) -> usize {
        self.noise_budget
    }

    /// Carried over from the tally: the counts miss whatever the store held
    /// after its first unreadable record.
    pub fn undercount(&self) -> Option<&Undercount> {
        self.undercount.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.undercount.is_none()
    }

    /// Candidates with the most votes, numbered from 1.
    pub fn leaders(&self) -> Vec<usize> {
        let Some(max) = self.counts.iter().copied().max() else {
            return Vec::new();
        };
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == max && max > 0)
            .map(|(i, _)| i + 1)
            .collect()
    }
}

impl fmt::Display for ResultVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, count) in self.counts.iter().enumerate() {
            writeln!(f, "Candidate {}: {} votes", i + 1, count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TallyDecoder {
    engine: Engine,
}

impl TallyDecoder {
    pub fn new(params: Arc<SchemeParameters>) -> Self {
        Self {
            engine: Engine::new(params),
        }
    }

    /// Decrypts `tally` into per-candidate counts.
    ///
    /// Refuses to hand out numbers when the noise budget is gone or when the
    /// decrypted slots do not look like a sum of one-hot ballots: non-zero
    /// padding, counts not adding up to the ballot count, or more ballots than
    /// the plaintext modulus can represent.
    pub fn decode(&self, tally: &Tally, sk: &SecretKey) -> Result<ResultVector> {
        let params = self.engine.params();
        let ballots = tally.ballots();

        let noise_budget = self.engine.noise_budget(tally.ciphertext(), sk)?;
        info!(noise_budget, ballots, "noise budget in encrypted tally");
        if noise_budget == 0 {
            return Err(Error::NoiseBudgetExhausted { ballots });
        }
        if ballots > params.max_ballots() {
            return Err(Error::InconsistentTally(format!(
                "{ballots} ballots overflow plaintext modulus {}",
                params.plaintext_modulus()
            )));
        }

        let mut slots = self.engine.decrypt(tally.ciphertext(), sk)?;
        let padding = slots.split_off(params.num_candidates());
        if let Some(slot) = padding.iter().position(|v| *v != 0) {
            return Err(Error::InconsistentTally(format!(
                "unused slot {} holds {}",
                params.num_candidates() + slot,
                padding[slot]
            )));
        }
        let total: u64 = slots.iter().sum();
        if total != ballots as u64 {
            return Err(Error::InconsistentTally(format!(
                "counts add up to {total} but {ballots} ballots were summed"
            )));
        }

        debug!(?slots, "decoded tally");
        Ok(ResultVector {
            counts: slots,
            ballots,
            noise_budget,
            undercount: tally.undercount().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::VoteEncoder;
    use crate::keys::AuthorityKeys;
    use crate::params::ParameterSet;
    use rand::thread_rng;

    fn result(counts: Vec<u64>) -> ResultVector {
        let ballots = counts.iter().sum::<u64>() as usize;
        ResultVector {
            counts,
            ballots,
            noise_budget: 20,
            undercount: None,
        }
    }

    #[test]
    fn displays_one_line_per_candidate() {
        let r = result(vec![0, 2, 1]);
        assert_eq!(
            r.to_string(),
            "Candidate 1: 0 votes\nCandidate 2: 2 votes\nCandidate 3: 1 votes\n"
        );
    }

    #[test]
    fn leaders_handle_ties_and_silence() {
        assert_eq!(result(vec![3, 1, 3]).leaders(), vec![1, 3]);
        assert_eq!(result(vec![0, 0]).leaders(), Vec::<usize>::new());
    }

    #[test]
    fn tally_under_foreign_keys_has_no_budget_left() {
        let params = ParameterSet::testing().build().unwrap();
        let authority = AuthorityKeys::generate(&params, &mut thread_rng());
        let impostor = AuthorityKeys::generate(&params, &mut thread_rng());
        let engine = Engine::new(params.clone());
        let vote = VoteEncoder::new(params.clone()).encode(4).unwrap();
        let ballot = engine
            .encrypt(&vote, impostor.public_key(), &mut thread_rng())
            .unwrap();
        let tally = Tally::from_ballot(ballot);

        let err = TallyDecoder::new(params)
            .decode(&tally, authority.secret_key())
            .unwrap_err();
        assert!(matches!(err, Error::NoiseBudgetExhausted { ballots: 1 }));
    }

    #[test]
    fn decoded_result_is_complete_for_a_whole_store() {
        let params = ParameterSet::testing().build().unwrap();
        let keys = AuthorityKeys::generate(&params, &mut thread_rng());
        let engine = Engine::new(params.clone());
        let vote = VoteEncoder::new(params.clone()).encode(2).unwrap();
        let ballot = engine
            .encrypt(&vote, keys.public_key(), &mut thread_rng())
            .unwrap();

        let result = TallyDecoder::new(params)
            .decode(&Tally::from_ballot(ballot), keys.secret_key())
            .unwrap();
        assert!(result.is_complete());
        assert_eq!(result.counts()[..3], [0, 1, 0]);
    }
}
