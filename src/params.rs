//! Scheme parameters shared by every role of the election.
//!
//! The BFV parameters are built exactly once from a [`ParameterSet`] and the
//! resulting [`SchemeParameters`] is handed around behind an [`Arc`]. Voters,
//! the aggregator and the authority must agree on these bit for bit, otherwise
//! ballots written by one cannot be read by another.

use std::sync::Arc;

use fhe::bfv::{self, BfvParameters};
use tracing::debug;

use crate::error::{Error, Result};

/// Plain description of the encryption parameters and the ballot layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    /// The degree of the polynomial modulus, usually denoted as `n` in the
    /// literature. With SIMD encoding it is also the number of slots, so it
    /// bounds the number of candidates.
    pub degree: usize,
    /// The plaintext modulus `t`. Every per-candidate count lives modulo `t`,
    /// so it must exceed the number of ballots. It has to be a prime with
    /// `t = 1 mod 2n` for SIMD batching.
    pub plaintext_modulus: u64,
    /// The ciphertext moduli `q_i`. Their product over `t` is what the noise
    /// budget is carved from.
    pub moduli: Vec<u64>,
    /// Number of candidates on the ballot.
    pub num_candidates: usize,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            degree: 4096,
            // 3 * 2^18 + 1, a 20-bit prime that supports batching up to n = 2^17.
            plaintext_modulus: 786433,
            moduli: vec![0xffffee001, 0xffffc4001, 0x1ffffe0001],
            num_candidates: 10,
        }
    }
}

impl ParameterSet {
    /// Small parameters, fast enough for unit tests. Not secure.
    pub fn testing() -> Self {
        Self {
            degree: 2048,
            plaintext_modulus: 786433,
            moduli: vec![0x3FFFFFFF000001],
            num_candidates: 10,
        }
    }

    pub fn with_candidates(mut self, num_candidates: usize) -> Self {
        self.num_candidates = num_candidates;
        self
    }

    /// Validates the set and builds the shared scheme parameters.
    pub fn build(&self) -> Result<Arc<SchemeParameters>> {
        if self.num_candidates == 0 {
            return Err(Error::Parameters(
                "at least one candidate is required".to_string(),
            ));
        }
        if self.num_candidates > self.degree {
            return Err(Error::Parameters(format!(
                "{} candidates do not fit in {} slots",
                self.num_candidates, self.degree
            )));
        }
        if self.moduli.is_empty() {
            return Err(Error::Parameters(
                "at least one ciphertext modulus is required".to_string(),
            ));
        }

        let bfv = bfv::BfvParametersBuilder::new()
            .set_degree(self.degree)
            .set_plaintext_modulus(self.plaintext_modulus)
            .set_moduli(&self.moduli)
            .build_arc()?;

        let scheme = SchemeParameters {
            bfv,
            set: self.clone(),
        };
        debug!(
            degree = self.degree,
            plaintext_modulus = self.plaintext_modulus,
            budget_bits = scheme.initial_budget_bits(),
            "built scheme parameters"
        );
        Ok(Arc::new(scheme))
    }
}

/// The built, immutable parameters every component shares.
#[derive(Debug)]
pub struct SchemeParameters {
    bfv: Arc<BfvParameters>,
    set: ParameterSet,
}

impl SchemeParameters {
    pub fn bfv(&self) -> &Arc<BfvParameters> {
        &self.bfv
    }

    pub fn num_candidates(&self) -> usize {
        self.set.num_candidates
    }

    /// Number of plaintext slots in one ballot.
    pub fn slot_count(&self) -> usize {
        self.set.degree
    }

    pub fn plaintext_modulus(&self) -> u64 {
        self.set.plaintext_modulus
    }

    /// Largest number of ballots whose per-candidate counts cannot wrap
    /// around the plaintext modulus.
    pub fn max_ballots(&self) -> usize {
        (self.set.plaintext_modulus - 1) as usize
    }

    /// Bits of noise a ciphertext may carry before decryption fails:
    /// `log2(q / 2t)`, rounded down.
    pub fn initial_budget_bits(&self) -> usize {
        let q_bits: f64 = self.set.moduli.iter().map(|q| (*q as f64).log2()).sum();
        let t_bits = (self.set.plaintext_modulus as f64).log2();
        (q_bits - t_bits - 1.0).floor().max(0.0) as usize
    }

    pub fn parameter_set(&self) -> &ParameterSet {
        &self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_candidates() {
        let err = ParameterSet::testing().with_candidates(0).build().unwrap_err();
        assert!(matches!(err, Error::Parameters(_)));
    }

    #[test]
    fn rejects_more_candidates_than_slots() {
        let err = ParameterSet::testing()
            .with_candidates(4096)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Parameters(_)));
    }

    #[test]
    fn testing_parameters_have_a_budget() {
        let params = ParameterSet::testing().build().unwrap();
        assert_eq!(params.slot_count(), 2048);
        assert_eq!(params.num_candidates(), 10);
        // 54-bit modulus, 20-bit plaintext modulus.
        assert_eq!(params.initial_budget_bits(), 33);
        assert_eq!(params.max_ballots(), 786432);
    }
}
