//! Append-only encrypted ballot store.
//!
//! The store is a single file holding ballot records back to back: no header,
//! no record count, no checksum. Each record is the ciphertext's fhe.rs
//! serialization wrapped as a bincode byte string (a varint length followed
//! by the bytes), which is what lets a reader find where one record ends and
//! the next begins.
//!
//! Since nothing but the records themselves mark the boundaries, a corrupted
//! length near the front of a record desynchronizes the reader and every later
//! ballot is lost. Interleaved writes would do the same, so every append holds
//! an exclusive lock on the file, across threads and processes alike.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bincode::Options;
use fs2::FileExt;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::ballot::Ballot;
use crate::error::{Error, Result};
use crate::params::SchemeParameters;

/// Upper bound on one serialized record; anything larger is treated as garbage.
pub const MAX_RECORD_BYTES: u64 = 64 * 1024 * 1024;

pub(crate) fn record_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_RECORD_BYTES)
}

/// Opaque engine bytes, framed as one length-prefixed byte string.
///
/// Same layout as a `Vec<u8>` sequence under bincode, but read and written in
/// one piece instead of element by element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordBytes(pub(crate) Vec<u8>);

impl Serialize for RecordBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = RecordBytes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<RecordBytes, E> {
                Ok(RecordBytes(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<RecordBytes, E> {
                Ok(RecordBytes(v))
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

/// Frames one ballot as a self-delimiting record.
pub fn encode_record(ballot: &Ballot) -> Result<Vec<u8>> {
    Ok(record_options().serialize(&RecordBytes(ballot.to_bytes()))?)
}

#[derive(Debug)]
pub struct BallotStore {
    path: PathBuf,
    params: Arc<SchemeParameters>,
}

impl BallotStore {
    /// Points at the store file. Nothing is created until the first append.
    pub fn new(path: impl Into<PathBuf>, params: Arc<SchemeParameters>) -> Self {
        Self {
            path: path.into(),
            params,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one ballot and makes it durable before returning.
    ///
    /// The write handle is opened, locked exclusively, written, synced and
    /// released within the call. Any other appender on the same file, in this
    /// process or another, waits for the lock.
    pub fn append(&self, ballot: Ballot) -> Result<()> {
        let record = encode_record(&ballot)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| Error::StorageOpen {
                path: self.path.clone(),
                source,
            })?;
        // Lock for writing
        file.lock_exclusive()?;
        let written = write_record(&mut file, &record);
        let unlocked = file.unlock();
        written?;
        unlocked?;

        debug!(bytes = record.len(), path = %self.path.display(), "appended ballot");
        Ok(())
    }

    /// Opens the store for reading. Assumes no appender is active.
    pub fn stream(&self) -> Result<BallotStream> {
        let file = File::open(&self.path).map_err(|source| Error::StorageOpen {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "reading ballot store");
        Ok(BallotStream::new(BufReader::new(file), self.params.clone()))
    }
}

fn write_record(file: &mut File, record: &[u8]) -> std::io::Result<()> {
    file.write_all(record)?;
    file.flush()?;
    file.sync_data()
}

/// Outcome of decoding one step of the store.
#[derive(Debug)]
pub enum Record {
    Ballot(Ballot),
    EndOfStream,
}

/// Lazy, single-pass reader over the records of a store.
///
/// Iteration stops at the end of the input, or right after yielding the first
/// decoding error. Ballots yielded before an error remain valid.
pub struct BallotStream<R = BufReader<File>> {
    reader: R,
    params: Arc<SchemeParameters>,
    read: usize,
    done: bool,
}

impl<R: BufRead> BallotStream<R> {
    pub fn new(reader: R, params: Arc<SchemeParameters>) -> Self {
        Self {
            reader,
            params,
            read: 0,
            done: false,
        }
    }

    /// Number of ballots decoded so far.
    pub fn ballots_read(&self) -> usize {
        self.read
    }

    /// Decodes the record under the cursor, advancing past it.
    pub fn decode_one(&mut self) -> Result<Record> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(Record::EndOfStream);
        }

        let index = self.read;
        let RecordBytes(bytes) = record_options()
            .deserialize_from(&mut self.reader)
            .map_err(|e| Error::Deserialization {
                index,
                reason: e.to_string(),
            })?;
        let ballot =
            Ballot::from_bytes(&bytes, self.params.bfv()).map_err(|e| Error::Deserialization {
                index,
                reason: e.to_string(),
            })?;

        self.read += 1;
        debug!(index, bytes = bytes.len(), "loaded encrypted ballot");
        Ok(Record::Ballot(ballot))
    }
}

impl<R: BufRead> Iterator for BallotStream<R> {
    type Item = Result<Ballot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decode_one() {
            Ok(Record::Ballot(ballot)) => Some(Ok(ballot)),
            Ok(Record::EndOfStream) => {
                self.done = true;
                debug!(ballots = self.read, "reached end of ballot store");
                None
            }
            Err(e) => {
                self.done = true;
                warn!(ballots = self.read, error = %e, "ballot store ended early");
                Some(Err(e))
            }
        }
    }
}

impl<R: BufRead> FusedIterator for BallotStream<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::VoteEncoder;
    use crate::engine::Engine;
    use crate::keys::AuthorityKeys;
    use crate::params::ParameterSet;
    use rand::thread_rng;
    use std::io::Cursor;

    struct Fixture {
        params: Arc<SchemeParameters>,
        engine: Engine,
        keys: AuthorityKeys,
        encoder: VoteEncoder,
    }

    impl Fixture {
        fn new() -> Self {
            let params = ParameterSet::testing().build().unwrap();
            Self {
                engine: Engine::new(params.clone()),
                keys: AuthorityKeys::generate(&params, &mut thread_rng()),
                encoder: VoteEncoder::new(params.clone()),
                params,
            }
        }

        fn ballot(&self, choice: usize) -> Ballot {
            let vote = self.encoder.encode(choice).unwrap();
            self.engine
                .encrypt(&vote, self.keys.public_key(), &mut thread_rng())
                .unwrap()
        }
    }

    #[test]
    fn streams_back_what_was_appended() {
        let fx = Fixture::new();
        let dir = tempfile::tempdir().unwrap();
        let store = BallotStore::new(dir.path().join("votes.bin"), fx.params.clone());

        let choices = [2, 9, 2, 5];
        for choice in choices {
            store.append(fx.ballot(choice)).unwrap();
        }

        let ballots: Vec<Ballot> = store.stream().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(ballots.len(), choices.len());
        for (ballot, choice) in ballots.iter().zip(choices) {
            let slots = fx
                .engine
                .decrypt(ballot.ciphertext(), fx.keys.secret_key())
                .unwrap();
            assert_eq!(slots, fx.encoder.encode(choice).unwrap().as_slice());
        }
    }

    #[test]
    fn missing_store_cannot_be_streamed() {
        let fx = Fixture::new();
        let dir = tempfile::tempdir().unwrap();
        let store = BallotStore::new(dir.path().join("absent.bin"), fx.params.clone());
        assert!(matches!(store.stream(), Err(Error::StorageOpen { .. })));
    }

    #[test]
    fn empty_input_is_end_of_stream() {
        let fx = Fixture::new();
        let mut stream = BallotStream::new(Cursor::new(Vec::new()), fx.params.clone());
        assert!(matches!(stream.decode_one().unwrap(), Record::EndOfStream));
        assert!(stream.next().is_none());
        assert_eq!(stream.ballots_read(), 0);
    }

    #[test]
    fn truncated_record_stops_the_stream() {
        let fx = Fixture::new();
        let mut bytes = encode_record(&fx.ballot(1)).unwrap();
        let second = encode_record(&fx.ballot(2)).unwrap();
        bytes.extend_from_slice(&second[..second.len() / 2]);

        let mut stream = BallotStream::new(Cursor::new(bytes), fx.params.clone());
        assert!(stream.next().unwrap().is_ok());
        match stream.next() {
            Some(Err(Error::Deserialization { index, .. })) => assert_eq!(index, 1),
            other => panic!("expected a deserialization error, got {other:?}"),
        }
        assert!(stream.next().is_none());
        assert_eq!(stream.ballots_read(), 1);
    }

    #[test]
    fn well_framed_garbage_is_rejected() {
        let fx = Fixture::new();
        let bytes = record_options()
            .serialize(&RecordBytes(vec![0xabu8; 64]))
            .unwrap();
        let mut stream = BallotStream::new(Cursor::new(bytes), fx.params.clone());
        assert!(matches!(
            stream.next(),
            Some(Err(Error::Deserialization { index: 0, .. }))
        ));
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let fx = Fixture::new();
        let dir = tempfile::tempdir().unwrap();
        let store = BallotStore::new(dir.path().join("votes.bin"), fx.params.clone());

        let ballots: Vec<Ballot> = (1..=8).map(|c| fx.ballot(c)).collect();
        std::thread::scope(|s| {
            for ballot in ballots {
                let store = &store;
                s.spawn(move || store.append(ballot).unwrap());
            }
        });

        let read: Vec<Ballot> = store.stream().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(read.len(), 8);
    }

    #[test]
    fn byte_string_framing_matches_a_byte_sequence() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let as_bytes = record_options()
            .serialize(&RecordBytes(payload.clone()))
            .unwrap();
        let as_seq = record_options().serialize(&payload).unwrap();
        assert_eq!(as_bytes, as_seq);

        let decoded: RecordBytes = record_options().deserialize(&as_seq).unwrap();
        assert_eq!(decoded.0, payload);
    }

    #[test]
    fn separate_stores_on_one_file_take_turns() {
        let fx = Fixture::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("votes.bin");
        let left = BallotStore::new(&path, fx.params.clone());
        let right = BallotStore::new(&path, fx.params.clone());

        let left_choices = [1, 2, 3, 4, 5];
        let right_choices = [6, 7, 8, 9, 10];
        let left_ballots: Vec<Ballot> = left_choices.iter().map(|c| fx.ballot(*c)).collect();
        let right_ballots: Vec<Ballot> = right_choices.iter().map(|c| fx.ballot(*c)).collect();
        std::thread::scope(|s| {
            s.spawn(|| {
                for ballot in left_ballots {
                    left.append(ballot).unwrap();
                }
            });
            s.spawn(|| {
                for ballot in right_ballots {
                    right.append(ballot).unwrap();
                }
            });
        });

        let read: Vec<Ballot> = left.stream().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(read.len(), 10);
        let mut choices: Vec<usize> = read
            .iter()
            .map(|ballot| {
                let slots = fx
                    .engine
                    .decrypt(ballot.ciphertext(), fx.keys.secret_key())
                    .unwrap();
                assert_eq!(slots.iter().sum::<u64>(), 1);
                slots.iter().position(|v| *v == 1).unwrap() + 1
            })
            .collect();
        choices.sort_unstable();
        assert_eq!(choices, (1..=10).collect::<Vec<_>>());
    }
}
