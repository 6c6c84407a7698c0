//! Homomorphic accumulation of ballots into a single encrypted tally.
//!
//! Ciphertext addition is commutative and associative, so the tally does not
//! depend on the order ballots arrive in. [`Accumulator::reduce`] folds the
//! store sequentially; [`Accumulator::reduce_parallel`] reads the store
//! sequentially but sums the ballots on the rayon pool, merging partial
//! tallies pairwise.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use bincode::Options;
use fhe::bfv::Ciphertext;
use fhe_traits::{DeserializeParametrized, Serialize};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::ballot::Ballot;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::params::SchemeParameters;
use crate::store::{record_options, RecordBytes};

/// The ballots a tally is missing: the store ended on a bad record after
/// `ballots_read` good ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undercount {
    pub ballots_read: usize,
    pub reason: String,
}

impl fmt::Display for Undercount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "only {} ballots could be read before a corrupt record: {}",
            self.ballots_read, self.reason
        )
    }
}

/// Running encrypted sum of ballots, plus how many ballots went into it and
/// whether the store was cut short.
#[derive(Debug, Clone)]
pub struct Tally {
    ct: Ciphertext,
    ballots: usize,
    undercount: Option<Undercount>,
}

/// On-disk layout of a tally file.
type TallyRecord = (u64, Option<(u64, String)>, RecordBytes);

impl Tally {
    pub(crate) fn from_ballot(ballot: Ballot) -> Self {
        Self {
            ct: ballot.into_ciphertext(),
            ballots: 1,
            undercount: None,
        }
    }

    pub fn ciphertext(&self) -> &Ciphertext {
        &self.ct
    }

    /// Number of ballots summed into this tally.
    pub fn ballots(&self) -> usize {
        self.ballots
    }

    /// Set when the ballot store ended on a record that could not be read.
    pub fn undercount(&self) -> Option<&Undercount> {
        self.undercount.as_ref()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let undercount = self
            .undercount
            .as_ref()
            .map(|u| (u.ballots_read as u64, u.reason.clone()));
        let record: TallyRecord = (
            self.ballots as u64,
            undercount,
            RecordBytes(self.ct.to_bytes()),
        );
        Ok(record_options().serialize(&record)?)
    }

    pub fn from_bytes(bytes: &[u8], params: &SchemeParameters) -> Result<Self> {
        let (ballots, undercount, RecordBytes(ct)): TallyRecord =
            record_options().deserialize(bytes)?;
        Ok(Self {
            ct: Ciphertext::from_bytes(&ct, params.bfv())?,
            ballots: ballots as usize,
            undercount: undercount.map(|(ballots_read, reason)| Undercount {
                ballots_read: ballots_read as usize,
                reason,
            }),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes()?).map_err(|source| Error::StorageOpen {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads a tally file written by [`save`](Self::save).
    pub fn load(path: &Path, params: &SchemeParameters) -> Result<Self> {
        let bytes = fs::read(path).map_err(|source| Error::StorageOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes, params).map_err(|e| Error::CorruptFile {
            what: "tally file",
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// The ballot stream ended on a record that could not be decoded.
///
/// The tally it travels with is still correct for the ballots that were read,
/// but it undercounts whatever came after the bad record.
#[derive(Debug)]
pub struct StreamInterrupted {
    pub ballots_read: usize,
    pub error: Error,
}

/// Result of reducing a ballot stream.
#[derive(Debug)]
pub struct Aggregate {
    pub tally: Tally,
    pub interrupted: Option<StreamInterrupted>,
}

impl Aggregate {
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Accumulator {
    engine: Engine,
}

impl Accumulator {
    pub fn new(params: Arc<SchemeParameters>) -> Self {
        Self {
            engine: Engine::new(params),
        }
    }

    fn absorb(&self, tally: &mut Tally, ballot: &Ballot) {
        self.engine.add(&mut tally.ct, ballot.ciphertext());
        tally.ballots += 1;
    }

    fn merge(&self, mut left: Tally, right: Tally) -> Tally {
        self.engine.add(&mut left.ct, &right.ct);
        left.ballots += right.ballots;
        left
    }

    /// Folds every ballot of the stream into one tally.
    ///
    /// The first ballot becomes the tally; each later one is added in place.
    /// A stream with no ballots is [`Error::EmptyStore`]. A decoding error ends
    /// the fold: with at least one ballot read the partial tally is returned
    /// along with the error, otherwise the error itself is returned.
    pub fn reduce<I>(&self, ballots: I) -> Result<Aggregate>
    where
        I: IntoIterator<Item = Result<Ballot>>,
    {
        let mut tally: Option<Tally> = None;
        let mut interrupted = None;

        for ballot in ballots {
            match ballot {
                Ok(ballot) => match tally.as_mut() {
                    Some(tally) => self.absorb(tally, &ballot),
                    None => tally = Some(Tally::from_ballot(ballot)),
                },
                Err(error) => {
                    interrupted = Some(error);
                    break;
                }
            }
        }

        self.finish(tally, interrupted)
    }

    /// Same contract as [`reduce`](Self::reduce), summing on the rayon pool.
    pub fn reduce_parallel<I>(&self, ballots: I) -> Result<Aggregate>
    where
        I: IntoIterator<Item = Result<Ballot>>,
    {
        let mut read = Vec::new();
        let mut interrupted = None;
        for ballot in ballots {
            match ballot {
                Ok(ballot) => read.push(ballot),
                Err(error) => {
                    interrupted = Some(error);
                    break;
                }
            }
        }

        let tally = read
            .into_par_iter()
            .map(Tally::from_ballot)
            .reduce_with(|left, right| self.merge(left, right));

        self.finish(tally, interrupted)
    }

    fn finish(&self, tally: Option<Tally>, interrupted: Option<Error>) -> Result<Aggregate> {
        match (tally, interrupted) {
            (Some(tally), interrupted) => Ok(self.report(tally, interrupted)),
            // The very first record was bad: that is corruption, not "no votes".
            (None, Some(error)) => Err(error),
            (None, None) => Err(Error::EmptyStore),
        }
    }

    fn report(&self, mut tally: Tally, interrupted: Option<Error>) -> Aggregate {
        let interrupted = interrupted.map(|error| {
            warn!(
                ballots = tally.ballots,
                error = %error,
                "tally only covers the ballots read before the bad record"
            );
            tally.undercount = Some(Undercount {
                ballots_read: tally.ballots,
                reason: error.to_string(),
            });
            StreamInterrupted {
                ballots_read: tally.ballots,
                error,
            }
        });
        if tally.ballots > self.engine.params().max_ballots() {
            warn!(
                ballots = tally.ballots,
                max = self.engine.params().max_ballots(),
                "more ballots than the plaintext modulus can count"
            );
        }
        info!(ballots = tally.ballots, "tallied encrypted ballots");
        Aggregate { tally, interrupted }
    }
}
