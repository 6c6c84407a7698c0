//! The slice of fhe.rs the pipeline relies on.
//!
//! Everything that touches BFV directly goes through [`Engine`]: encrypting a
//! vote vector, adding ciphertexts, decrypting and decoding the tally, and
//! measuring how much noise budget a ciphertext has left.

use std::sync::Arc;

use fhe::bfv::{Ciphertext, Encoding, Plaintext, PublicKey, SecretKey};
use fhe_traits::{FheDecoder, FheDecrypter, FheEncoder, FheEncrypter};
use rand::{CryptoRng, RngCore};

use crate::ballot::Ballot;
use crate::encoder::VoteVector;
use crate::error::Result;
use crate::params::SchemeParameters;

#[derive(Debug, Clone)]
pub struct Engine {
    params: Arc<SchemeParameters>,
}

impl Engine {
    pub fn new(params: Arc<SchemeParameters>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &Arc<SchemeParameters> {
        &self.params
    }

    /// Encrypts a vote vector under the election public key.
    ///
    /// The vector is batched with SIMD encoding so candidate `i` sits in slot
    /// `i` and ciphertext addition sums the candidates independently.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        vote: &VoteVector,
        pk: &PublicKey,
        rng: &mut R,
    ) -> Result<Ballot> {
        let pt = Plaintext::try_encode(vote.as_slice(), Encoding::simd(), self.params.bfv())?;
        let ct: Ciphertext = pk.try_encrypt(&pt, rng)?;
        Ok(Ballot::new(ct))
    }

    /// Homomorphic addition, in place.
    pub fn add(&self, acc: &mut Ciphertext, ballot: &Ciphertext) {
        *acc += ballot;
    }

    /// Decrypts a ciphertext and decodes every slot.
    pub fn decrypt(&self, ct: &Ciphertext, sk: &SecretKey) -> Result<Vec<u64>> {
        let pt: Plaintext = sk.try_decrypt(ct)?;
        self.decode_vector(&pt)
    }

    pub fn decode_vector(&self, pt: &Plaintext) -> Result<Vec<u64>> {
        Ok(Vec::<u64>::try_decode(pt, Encoding::simd())?)
    }

    /// Remaining noise budget of `ct` in bits. Zero means decryption is no
    /// longer reliable.
    pub fn noise_budget(&self, ct: &Ciphertext, sk: &SecretKey) -> Result<usize> {
        // SAFETY: measuring the noise may take time dependent on the noise
        // value. Only the authority calls this, on the final tally.
        let noise = unsafe { sk.measure_noise(ct)? };
        Ok(self.params.initial_budget_bits().saturating_sub(noise))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::VoteEncoder;
    use crate::keys::AuthorityKeys;
    use crate::params::ParameterSet;
    use rand::thread_rng;

    #[test]
    fn ballot_decrypts_to_its_vote() {
        let params = ParameterSet::testing().build().unwrap();
        let engine = Engine::new(params.clone());
        let keys = AuthorityKeys::generate(&params, &mut thread_rng());
        let vote = VoteEncoder::new(params).encode(4).unwrap();

        let ballot = engine.encrypt(&vote, keys.public_key(), &mut thread_rng()).unwrap();
        let decrypted = engine.decrypt(ballot.ciphertext(), keys.secret_key()).unwrap();
        assert_eq!(decrypted, vote.as_slice());
    }

    #[test]
    fn addition_sums_slots() {
        let params = ParameterSet::testing().build().unwrap();
        let engine = Engine::new(params.clone());
        let keys = AuthorityKeys::generate(&params, &mut thread_rng());
        let encoder = VoteEncoder::new(params);

        let a = engine
            .encrypt(&encoder.encode(1).unwrap(), keys.public_key(), &mut thread_rng())
            .unwrap();
        let b = engine
            .encrypt(&encoder.encode(1).unwrap(), keys.public_key(), &mut thread_rng())
            .unwrap();
        let mut sum = a.into_ciphertext();
        engine.add(&mut sum, b.ciphertext());

        let decrypted = engine.decrypt(&sum, keys.secret_key()).unwrap();
        assert_eq!(decrypted[0], 2);
        assert!(decrypted[1..].iter().all(|v| *v == 0));
        assert!(engine.noise_budget(&sum, keys.secret_key()).unwrap() > 0);
    }
}
