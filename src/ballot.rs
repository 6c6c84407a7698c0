use std::sync::Arc;

use fhe::bfv::{BfvParameters, Ciphertext};
use fhe_traits::{DeserializeParametrized, Serialize};

/// One voter's encrypted one-hot vote vector.
///
/// A ballot is never mutated after encryption. It moves from the voter to the
/// store and from the store to the accumulator; nobody shares it.
#[derive(Debug, Clone, PartialEq)]
pub struct Ballot(Ciphertext);

impl Ballot {
    pub(crate) fn new(ct: Ciphertext) -> Self {
        Self(ct)
    }

    pub fn ciphertext(&self) -> &Ciphertext {
        &self.0
    }

    pub fn into_ciphertext(self) -> Ciphertext {
        self.0
    }

    /// Engine-native serialization of the ciphertext.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8], params: &Arc<BfvParameters>) -> fhe::Result<Self> {
        Ciphertext::from_bytes(bytes, params).map(Self)
    }
}
