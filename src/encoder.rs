//! One-hot vote encoding.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::params::SchemeParameters;

/// A plaintext vote: one slot per plaintext slot of the scheme, all zero
/// except the chosen candidate's slot, which holds 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteVector(Vec<u64>);

impl VoteVector {
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    /// Zero-based slot of the chosen candidate.
    pub fn candidate_slot(&self) -> usize {
        self.0.iter().position(|v| *v == 1).unwrap_or_default()
    }
}

/// Turns a candidate number into a [`VoteVector`].
#[derive(Debug, Clone)]
pub struct VoteEncoder {
    params: Arc<SchemeParameters>,
}

impl VoteEncoder {
    pub fn new(params: Arc<SchemeParameters>) -> Self {
        Self { params }
    }

    /// Checks that `choice` names a candidate, counting from 1.
    pub fn validate(&self, choice: usize) -> Result<()> {
        let num_candidates = self.params.num_candidates();
        if choice < 1 || choice > num_candidates {
            return Err(Error::InvalidChoice {
                choice,
                num_candidates,
            });
        }
        Ok(())
    }

    pub fn encode(&self, choice: usize) -> Result<VoteVector> {
        self.validate(choice)?;
        let mut vote = vec![0u64; self.params.slot_count()];
        vote[choice - 1] = 1;
        Ok(VoteVector(vote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSet;

    fn encoder() -> VoteEncoder {
        VoteEncoder::new(ParameterSet::testing().build().unwrap())
    }

    #[test]
    fn encodes_one_hot() {
        let vote = encoder().encode(3).unwrap();
        assert_eq!(vote.as_slice().len(), 2048);
        assert_eq!(vote.as_slice().iter().sum::<u64>(), 1);
        assert_eq!(vote.as_slice()[2], 1);
        assert_eq!(vote.candidate_slot(), 2);
    }

    #[test]
    fn encoding_is_deterministic() {
        let encoder = encoder();
        assert_eq!(encoder.encode(10).unwrap(), encoder.encode(10).unwrap());
    }

    #[test]
    fn rejects_out_of_range_choices() {
        let encoder = encoder();
        for choice in [0, 11, usize::MAX] {
            let err = encoder.encode(choice).unwrap_err();
            assert!(matches!(
                err,
                Error::InvalidChoice {
                    num_candidates: 10,
                    ..
                }
            ));
        }
    }
}
