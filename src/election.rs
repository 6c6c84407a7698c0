//! The three roles of an election and the order they act in.
//!
//! Voters only ever hold the public key and append to the store. The
//! aggregator reads the store and sums ballots without any key. The authority
//! holds the secret key and sees nothing but the final tally.

use std::fmt;
use std::sync::Arc;

use fhe::bfv::PublicKey;
use rand::{CryptoRng, RngCore};
use tracing::info;

use crate::accumulator::{Accumulator, Aggregate, Tally};
use crate::decoder::{ResultVector, TallyDecoder};
use crate::encoder::VoteEncoder;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::keys::AuthorityKeys;
use crate::params::SchemeParameters;
use crate::store::BallotStore;

/// Casts ballots into a shared store.
#[derive(Debug)]
pub struct Voter {
    encoder: VoteEncoder,
    engine: Engine,
    public_key: PublicKey,
    store: Arc<BallotStore>,
}

impl Voter {
    pub fn new(params: Arc<SchemeParameters>, public_key: PublicKey, store: Arc<BallotStore>) -> Self {
        Self {
            encoder: VoteEncoder::new(params.clone()),
            engine: Engine::new(params),
            public_key,
            store,
        }
    }

    /// Encodes, encrypts and appends one vote.
    ///
    /// An invalid choice fails before anything is encrypted or written.
    pub fn cast<R: RngCore + CryptoRng>(&self, choice: usize, rng: &mut R) -> Result<()> {
        let vote = self.encoder.encode(choice)?;
        let ballot = self.engine.encrypt(&vote, &self.public_key, rng)?;
        self.store.append(ballot)
    }

    pub fn encoder(&self) -> &VoteEncoder {
        &self.encoder
    }
}

/// Sums the store into an encrypted tally.
#[derive(Debug)]
pub struct Aggregator {
    store: Arc<BallotStore>,
    accumulator: Accumulator,
    parallel: bool,
}

impl Aggregator {
    pub fn new(params: Arc<SchemeParameters>, store: Arc<BallotStore>) -> Self {
        Self {
            store,
            accumulator: Accumulator::new(params),
            parallel: false,
        }
    }

    /// Sum on the rayon pool instead of folding one ballot at a time.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn tally(&self) -> Result<Aggregate> {
        let stream = self.store.stream()?;
        if self.parallel {
            self.accumulator.reduce_parallel(stream)
        } else {
            self.accumulator.reduce(stream)
        }
    }
}

/// Holds the secret key and decrypts the final tally.
#[derive(Debug)]
pub struct Authority {
    keys: AuthorityKeys,
    decoder: TallyDecoder,
}

impl Authority {
    pub fn new(params: Arc<SchemeParameters>, keys: AuthorityKeys) -> Self {
        Self {
            decoder: TallyDecoder::new(params),
            keys,
        }
    }

    pub fn generate<R: RngCore + CryptoRng>(params: Arc<SchemeParameters>, rng: &mut R) -> Self {
        let keys = AuthorityKeys::generate(&params, rng);
        Self::new(params, keys)
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    pub fn keys(&self) -> &AuthorityKeys {
        &self.keys
    }

    pub fn decode(&self, tally: &Tally) -> Result<ResultVector> {
        self.decoder.decode(tally, self.keys.secret_key())
    }
}

/// Where an election stands. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Empty,
    Collecting,
    ClosedForReading,
    Aggregated,
    Decoded,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Collecting => "collecting ballots",
            Self::ClosedForReading => "closed for reading",
            Self::Aggregated => "aggregated",
            Self::Decoded => "decoded",
        };
        f.write_str(name)
    }
}

/// Drives one store through every phase within a single process.
#[derive(Debug)]
pub struct Election {
    store: Arc<BallotStore>,
    phase: Phase,
    aggregate: Option<Aggregate>,
}

impl Election {
    pub fn new(store: Arc<BallotStore>) -> Self {
        Self {
            store,
            phase: Phase::Empty,
            aggregate: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn store(&self) -> &Arc<BallotStore> {
        &self.store
    }

    fn require(&self, action: &'static str, allowed: &[Phase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(Error::Phase {
                action,
                phase: self.phase.to_string(),
            })
        }
    }

    pub fn cast<R: RngCore + CryptoRng>(&mut self, voter: &Voter, choice: usize, rng: &mut R) -> Result<()> {
        self.require("cast a ballot", &[Phase::Empty, Phase::Collecting])?;
        voter.cast(choice, rng)?;
        self.phase = Phase::Collecting;
        Ok(())
    }

    /// Closes the store and sums it. Once closed, no more ballots are
    /// accepted, even if the store turns out to be empty.
    pub fn aggregate(&mut self, aggregator: &Aggregator) -> Result<&Aggregate> {
        self.require("aggregate", &[Phase::Empty, Phase::Collecting])?;
        self.phase = Phase::ClosedForReading;
        let aggregate = aggregator.tally()?;
        self.phase = Phase::Aggregated;
        Ok(self.aggregate.insert(aggregate))
    }

    pub fn decode(&mut self, authority: &Authority) -> Result<ResultVector> {
        self.require("decode", &[Phase::Aggregated])?;
        let Some(aggregate) = self.aggregate.as_ref() else {
            return Err(Error::EmptyStore);
        };
        let result = authority.decode(&aggregate.tally)?;
        self.phase = Phase::Decoded;
        info!(ballots = result.ballots(), "vote counting completed");
        Ok(result)
    }
}
