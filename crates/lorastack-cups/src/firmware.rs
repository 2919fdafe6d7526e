//! Firmware updates and their signatures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use tracing::debug;

use lorastack_core::Result;
use lorastack_registry::VersionIdentifiers;

use crate::errors::{ERR_INVALID_SIGNING_KEY, ERR_SIGN};

/// What a station reported, and how its gateway is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateQuery {
    pub station: String,
    pub model: String,
    pub package: String,
    pub version_ids: VersionIdentifiers,
    pub update_channel: String,
}

/// Finds the firmware update for a station, if there is one.
#[async_trait]
pub trait UpdateResolver: Send + Sync {
    async fn resolve(&self, query: &UpdateQuery) -> Result<Option<Vec<u8>>>;
}

/// Signs firmware digests with a key stations know by its CRC.
pub trait UpdateSigner: Send + Sync {
    /// CRC32 (IEEE) of the public key.
    fn key_crc(&self) -> u32;

    /// Sign the SHA-512 digest of an update.
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>>;
}

/// An Ed25519 update signer.
pub struct Ed25519Signer {
    key: SigningKey,
    crc: u32,
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("key_crc", &self.crc)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Ed25519Signer {
    pub fn new(key: SigningKey) -> Self {
        let crc = crc32fast::hash(key.verifying_key().as_bytes());
        Self { key, crc }
    }

    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Load a key file holding the 32 byte secret, raw or hex encoded.
    pub fn from_file(path: &Path) -> Result<Self> {
        let invalid = || ERR_INVALID_SIGNING_KEY.with_attribute("path", path.display().to_string());
        let data = std::fs::read(path).map_err(|e| invalid().with_cause(e))?;
        let secret: [u8; 32] = match data.len() {
            32 => data.try_into().map_err(|_| invalid())?,
            _ => {
                let text = std::str::from_utf8(&data).map_err(|_| invalid())?;
                hex::decode(text.trim())
                    .map_err(|_| invalid())?
                    .try_into()
                    .map_err(|_| invalid())?
            }
        };
        Ok(Self::new(SigningKey::from_bytes(&secret)))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

impl UpdateSigner for Ed25519Signer {
    fn key_crc(&self) -> u32 {
        self.crc
    }

    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        let signature = self
            .key
            .try_sign(digest)
            .map_err(|_| ERR_SIGN.with_attribute("key_crc", self.crc))?;
        Ok(signature.to_bytes().to_vec())
    }
}

/// Signers by key CRC.
#[derive(Clone, Default)]
pub struct Signers(BTreeMap<u32, Arc<dyn UpdateSigner>>);

impl std::fmt::Debug for Signers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl Signers {
    pub fn insert(&mut self, signer: Arc<dyn UpdateSigner>) {
        self.0.insert(signer.key_crc(), signer);
    }

    /// The first of `keys` a signer is held for, in the order given.
    pub fn first_of(&self, keys: &[u32]) -> Option<(u32, &Arc<dyn UpdateSigner>)> {
        keys.iter()
            .find_map(|crc| self.0.get(crc).map(|signer| (*crc, signer)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

const DEFAULT_CHANNEL: &str = "stable";

/// Serves `<root>/<channel>/<model>/<station>.bin`.
///
/// The package version of a binary is in `<station>.package` beside it.
/// Stations that already run that package get no update, nor do stations
/// for which the marker is missing.
#[derive(Debug, Clone)]
pub struct DirectoryUpdateResolver {
    root: PathBuf,
}

impl DirectoryUpdateResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the station's files without extension.
    fn station_path(&self, query: &UpdateQuery) -> Option<PathBuf> {
        let channel = if query.update_channel.is_empty() {
            DEFAULT_CHANNEL
        } else {
            query.update_channel.as_str()
        };
        let model = if query.version_ids.model_id.is_empty() {
            query.model.as_str()
        } else {
            query.version_ids.model_id.as_str()
        };
        let station = query.station.as_str();
        [channel, model, station]
            .iter()
            .all(|part| is_path_component(part))
            .then(|| self.root.join(channel).join(model).join(station))
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// Reported strings end up in paths; allow only plain file names.
fn is_path_component(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\', '\0'])
}

#[async_trait]
impl UpdateResolver for DirectoryUpdateResolver {
    async fn resolve(&self, query: &UpdateQuery) -> Result<Option<Vec<u8>>> {
        let Some(base) = self.station_path(query) else {
            debug!(station = %query.station, model = %query.model, "No update path for station");
            return Ok(None);
        };
        let marker = with_suffix(&base, ".package");
        let package = match tokio::fs::read_to_string(&marker).await {
            Ok(package) => package.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if package == query.package {
            return Ok(None);
        }
        let binary = with_suffix(&base, ".bin");
        match tokio::fs::read(&binary).await {
            Ok(data) => {
                debug!(path = %binary.display(), from = %query.package, to = %package, "Serving update");
                Ok(Some(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};
    use sha2::{Digest, Sha512};

    use super::*;

    #[test]
    fn signs_digests_verifiably() {
        let signer = Ed25519Signer::generate();
        let digest = Sha512::digest(b"firmware");
        let signature = signer.sign(&digest).unwrap();
        assert_eq!(signature.len(), 64);

        let public = VerifyingKey::from_bytes(&signer.public_key()).unwrap();
        let signature = Signature::from_slice(&signature).unwrap();
        assert!(public.verify(&digest, &signature).is_ok());
        assert_eq!(signer.key_crc(), crc32fast::hash(&signer.public_key()));
    }

    #[test]
    fn loads_raw_and_hex_keys() {
        let dir = tempfile::tempdir().unwrap();
        let secret = [7u8; 32];
        let raw = dir.path().join("raw.key");
        std::fs::write(&raw, secret).unwrap();
        let hexed = dir.path().join("hex.key");
        std::fs::write(&hexed, format!("{}\n", hex::encode(secret))).unwrap();

        let a = Ed25519Signer::from_file(&raw).unwrap();
        let b = Ed25519Signer::from_file(&hexed).unwrap();
        assert_eq!(a.public_key(), b.public_key());

        let bad = dir.path().join("bad.key");
        std::fs::write(&bad, "not a key").unwrap();
        let err = Ed25519Signer::from_file(&bad).unwrap_err();
        assert!(err.is(&ERR_INVALID_SIGNING_KEY));
    }

    #[test]
    fn signer_lookup_is_positional() {
        let a: Arc<dyn UpdateSigner> = Arc::new(Ed25519Signer::generate());
        let b: Arc<dyn UpdateSigner> = Arc::new(Ed25519Signer::generate());
        let mut signers = Signers::default();
        signers.insert(Arc::clone(&a));
        signers.insert(Arc::clone(&b));

        let (crc, _) = signers.first_of(&[1, b.key_crc(), a.key_crc()]).unwrap();
        assert_eq!(crc, b.key_crc());
        assert!(signers.first_of(&[1, 2]).is_none());
    }

    fn query(package: &str) -> UpdateQuery {
        UpdateQuery {
            station: "station".to_string(),
            model: "rak7248".to_string(),
            package: package.to_string(),
            ..UpdateQuery::default()
        }
    }

    #[tokio::test]
    async fn directory_serves_newer_packages() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("stable").join("rak7248");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("station.bin"), b"firmware-2").unwrap();
        std::fs::write(model_dir.join("station.package"), "2.0.0\n").unwrap();

        let resolver = DirectoryUpdateResolver::new(dir.path());
        assert_eq!(
            resolver.resolve(&query("1.0.0")).await.unwrap(),
            Some(b"firmware-2".to_vec())
        );
        assert_eq!(resolver.resolve(&query("2.0.0")).await.unwrap(), None);

        let mut other = query("1.0.0");
        other.update_channel = "beta".to_string();
        assert_eq!(resolver.resolve(&other).await.unwrap(), None);

        let mut escape = query("1.0.0");
        escape.station = "../station".to_string();
        assert_eq!(resolver.resolve(&escape).await.unwrap(), None);
    }
}
