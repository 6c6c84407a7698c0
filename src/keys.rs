//! Election key material.
//!
//! The authority owns a 32-byte seed. The secret key and the public key are
//! both derived from it, so the seed file is the only secret that has to be
//! kept; the public key is published for voters.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fhe::bfv::{PublicKey, SecretKey};
use fhe_traits::{DeserializeParametrized, Serialize};
use rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use tracing::info;

use crate::error::{Error, Result};
use crate::params::SchemeParameters;

const SEED_FILE: &str = "authority.seed";
const PUBLIC_KEY_FILE: &str = "public.key";

pub fn seed_path(dir: &Path) -> PathBuf {
    dir.join(SEED_FILE)
}

pub fn public_key_path(dir: &Path) -> PathBuf {
    dir.join(PUBLIC_KEY_FILE)
}

/// The tallying authority's key pair.
pub struct AuthorityKeys {
    seed: [u8; 32],
    secret: SecretKey,
    public: PublicKey,
}

// Don't expose the seed in Debug
impl std::fmt::Debug for AuthorityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityKeys")
            .field("seed", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl AuthorityKeys {
    pub fn generate<R: RngCore + CryptoRng>(params: &SchemeParameters, rng: &mut R) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Self::from_seed(params, seed)
    }

    /// Derives the key pair deterministically from `seed`.
    pub fn from_seed(params: &SchemeParameters, seed: [u8; 32]) -> Self {
        let mut rng = StdRng::from_seed(seed);
        let secret = SecretKey::random(params.bfv(), &mut rng);
        let public = PublicKey::new(&secret, &mut rng);
        Self {
            seed,
            secret,
            public,
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Writes the seed (owner-only on unix) and the public key into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|source| Error::StorageOpen {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = seed_path(dir);
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path).map_err(|source| Error::StorageOpen {
            path: path.clone(),
            source,
        })?;
        file.write_all(&self.seed)?;
        file.sync_all()?;

        let path = public_key_path(dir);
        fs::write(&path, self.public.to_bytes())
            .map_err(|source| Error::StorageOpen { path, source })?;

        info!(dir = %dir.display(), "saved election keys");
        Ok(())
    }

    /// Loads the full key pair. Only the authority can do this.
    pub fn load(params: &SchemeParameters, dir: &Path) -> Result<Self> {
        let path = seed_path(dir);
        let bytes = fs::read(&path).map_err(|source| Error::StorageOpen {
            path: path.clone(),
            source,
        })?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| Error::CorruptFile {
                what: "authority seed",
                path: path.clone(),
                reason: format!("{} bytes, expected 32", bytes.len()),
            })?;
        Ok(Self::from_seed(params, seed))
    }
}

/// Loads the published public key, which is all a voter needs.
pub fn load_public_key(params: &SchemeParameters, dir: &Path) -> Result<PublicKey> {
    let path = public_key_path(dir);
    let bytes = fs::read(&path).map_err(|source| Error::StorageOpen {
        path: path.clone(),
        source,
    })?;
    PublicKey::from_bytes(&bytes, params.bfv()).map_err(|e| Error::CorruptFile {
        what: "public key",
        path,
        reason: e.to_string(),
    })
}
