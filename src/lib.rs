//! Secret ballot with homomorphic tallying.
//!
//! Each voter turns a candidate number into a one-hot vector, encrypts it with
//! BFV under the authority's public key and appends it to a ballot store. The
//! aggregator adds up every ballot in the store without decrypting any of them.
//! Only the authority decrypts, and only the final sum.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fhe_ballot::{Aggregator, Authority, BallotStore, ParameterSet, Voter};
//! use rand::thread_rng;
//!
//! # fn main() -> fhe_ballot::Result<()> {
//! let params = ParameterSet::default().build()?;
//! let store = Arc::new(BallotStore::new("encrypted_votes.bin", params.clone()));
//! let authority = Authority::generate(params.clone(), &mut thread_rng());
//!
//! let voter = Voter::new(params.clone(), authority.public_key().clone(), store.clone());
//! voter.cast(3, &mut thread_rng())?;
//!
//! let aggregate = Aggregator::new(params, store).tally()?;
//! println!("{}", authority.decode(&aggregate.tally)?);
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod ballot;
pub mod decoder;
pub mod election;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod keys;
pub mod params;
pub mod store;

pub use accumulator::{Accumulator, Aggregate, StreamInterrupted, Tally, Undercount};
pub use ballot::Ballot;
pub use decoder::{ResultVector, TallyDecoder};
pub use election::{Aggregator, Authority, Election, Phase, Voter};
pub use encoder::{VoteEncoder, VoteVector};
pub use engine::Engine;
pub use error::{Error, Result};
pub use keys::AuthorityKeys;
pub use params::{ParameterSet, SchemeParameters};
pub use store::{BallotStore, BallotStream, Record};
