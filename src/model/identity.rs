//! Who this device is

use crate::{config::Paths, error::IdentityError};
use sha2::{Digest, Sha256};
use std::{env, fs, path::Path};

/// API credentials shared with the control plane
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub api_prefix: String,
    pub api_secret: String,
}

impl Credentials {
    /// Parse the literal `PREFIX.SECRET` form
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, secret) = raw.trim().split_once('.')?;
        if prefix.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self {
            api_prefix: prefix.to_owned(),
            api_secret: secret.to_owned(),
        })
    }

    /// Read `JACKTRIP_API_PREFIX`/`JACKTRIP_API_SECRET`, both must be set
    pub fn from_env() -> Option<Self> {
        let api_prefix = env::var("JACKTRIP_API_PREFIX").ok()?;
        let api_secret = env::var("JACKTRIP_API_SECRET").ok()?;
        Some(Self {
            api_prefix,
            api_secret,
        })
    }

    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        let raw = read_scalar(path)?;
        Self::parse(&raw).ok_or_else(|| IdentityError::MalformedCredentials(path.to_path_buf()))
    }

    /// Hex encoded SHA-256 of the secret, safe to publish
    pub fn api_hash(&self) -> String {
        hex::encode(Sha256::digest(self.api_secret.as_bytes()))
    }
}

/// Immutable device identity, created once at startup
#[derive(Clone, Debug)]
pub struct Identity {
    /// MAC address of the primary interface
    pub mac: String,
    pub sound_card_name: String,
    pub sound_card_type: String,
    pub patch_version: String,
    pub credentials: Credentials,
}

impl Identity {
    /// Load every identity field from disk.  Credentials from the
    /// environment win over the credentials file.
    pub fn load(paths: &Paths) -> Result<Self, IdentityError> {
        let credentials = match Credentials::from_env() {
            Some(c) => c,
            None => Credentials::load(&paths.credentials)?,
        };

        // The patch tag is only written once an image has been patched
        let patch_version = match fs::read_to_string(&paths.patch) {
            Ok(s) => s.trim().to_owned(),
            Err(_) => String::new(),
        };

        Ok(Self {
            mac: read_scalar(&paths.mac)?,
            sound_card_name: read_scalar(&paths.device_name)?,
            sound_card_type: read_scalar(&paths.device_type)?,
            patch_version,
            credentials,
        })
    }
}

/// Read a single line file, trimmed
fn read_scalar(path: &Path) -> Result<String, IdentityError> {
    let raw = fs::read_to_string(path).map_err(|source| IdentityError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let value = raw.trim();
    if value.is_empty() {
        return Err(IdentityError::Empty(path.to_path_buf()));
    }
    Ok(value.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn credentials_round_trip() {
        let c = Credentials::parse("P.S").unwrap();
        assert_eq!(c.api_prefix, "P");
        assert_eq!(c.api_secret, "S");
        assert_eq!(Credentials::parse("ab.cd\n").unwrap().api_secret, "cd");
    }

    #[test]
    fn malformed_credentials() {
        assert!(Credentials::parse("nodot").is_none());
        assert!(Credentials::parse(".secret").is_none());
        assert!(Credentials::parse("prefix.").is_none());
    }

    #[test]
    fn api_hash_is_sha256_hex() {
        let c = Credentials::parse("p.secret").unwrap();
        assert_eq!(
            c.api_hash(),
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[test]
    fn loads_identity_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::rooted(dir.path());
        write(&paths.credentials, "ab.cd\n");
        write(&paths.mac, "aa:bb:cc:dd:ee:ff\n");
        write(&paths.device_name, "USB Audio\n");
        write(&paths.device_type, "USB Audio Device\n");

        let id = Identity::load(&paths).unwrap();
        assert_eq!(id.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(id.sound_card_type, "USB Audio Device");
        assert_eq!(id.patch_version, "");
        assert_eq!(id.credentials.api_prefix, "ab");
    }

    #[test]
    fn missing_mac_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::rooted(dir.path());
        write(&paths.credentials, "ab.cd");
        assert!(matches!(
            Identity::load(&paths),
            Err(IdentityError::Unreadable { .. })
        ));
    }
}
