use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use lendline_types::Address;

use crate::error::{SessionError, SessionResult};

/// File holding the last connected identity.
///
/// Used only to decide whether to attempt a silent reconnect at startup.
/// Its contents never authorize anything.
#[derive(Clone, Debug)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The remembered identity. Missing or unreadable contents yield `None`.
    pub fn load(&self) -> SessionResult<Option<Address>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        match text.trim().parse::<Address>() {
            Ok(address) => Ok(address.non_zero()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt identity store");
                Ok(None)
            }
        }
    }

    pub fn save(&self, identity: Address) -> SessionResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }
        fs::write(&self.path, format!("{}\n", identity.to_hex())).map_err(|e| self.io_error(e))
    }

    pub fn clear(&self) -> SessionResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Store {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("identity"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("nested").join("identity"));
        let who = Address::derive("alice");
        store.save(who).unwrap();
        assert_eq!(store.load().unwrap(), Some(who));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_contents_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity");
        fs::write(&path, "not-an-address").unwrap();
        assert_eq!(IdentityStore::new(&path).load().unwrap(), None);
    }
}
