//! File-backed token cache.

use crate::clock::{Clock, SystemClock};
use crate::record::{record_identifier, CachedRecord};
use crate::{CacheError, CacheResult, Credential};
use runtime_config_and_utils::Paths;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Permission bits every record must carry.
const RECORD_MODE: u32 = 0o600;
/// Permission bits for directories the cache creates.
const DIR_MODE: u32 = 0o700;

/// One credential per (working context, server origin), stored under `root`.
#[derive(Clone)]
pub struct TokenCache {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    /// Cache rooted at an explicit directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Cache rooted at `~/.tollgate/tokens`.
    ///
    /// Fails when the home directory cannot be resolved.
    pub fn open_default() -> CacheResult<Self> {
        let paths = Paths::new().map_err(|e| CacheError::Config(e.to_string()))?;
        Ok(Self::from_paths(&paths))
    }

    pub fn from_paths(paths: &Paths) -> Self {
        Self::new(paths.tokens_dir())
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the record for a (context, origin) pair.
    pub fn record_path(&self, context: &str, server_origin: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", record_identifier(context, server_origin)))
    }

    /// Look up a valid, unexpired credential.
    ///
    /// Any record that fails a check is deleted and reported as absent.
    pub fn get(&self, context: &str, server_origin: &str) -> Option<Credential> {
        let path = self.record_path(context, server_origin);

        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat token record");
                return None;
            }
        };

        if let Some(problem) = storage_problem(&metadata) {
            self.discard(&path, &problem);
            return None;
        }

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                self.discard(&path, &format!("unreadable: {e}"));
                return None;
            }
        };

        let record = match CachedRecord::decode(&raw, server_origin) {
            Ok(record) => record,
            Err(rejection) => {
                self.discard(&path, &rejection.to_string());
                return None;
            }
        };

        if record
            .credential
            .is_expired(record.issued_at_millis, self.clock.now_millis())
        {
            debug!(path = %path.display(), "token record expired");
            self.remove(&path);
            return None;
        }

        Some(record.credential)
    }

    /// Store a credential issued now, replacing any previous record atomically.
    pub fn set(
        &self,
        context: &str,
        server_origin: &str,
        credential: &Credential,
    ) -> CacheResult<()> {
        let record = CachedRecord {
            credential: credential.clone(),
            issued_at_millis: self.clock.now_millis(),
            server_origin: server_origin.to_string(),
        };
        let encoded = record.encode()?;

        create_private_dir(&self.root)?;

        let path = self.record_path(context, server_origin);
        let tmp_path = self.root.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

        if let Err(e) = write_private_file(&tmp_path, encoded.as_bytes()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(path = %path.display(), token_type = %credential.token_type, "token record stored");
        Ok(())
    }

    /// Remove the record for a (context, origin) pair.
    ///
    /// Returns whether a record existed. A missing record is not an error.
    pub fn delete(&self, context: &str, server_origin: &str) -> CacheResult<bool> {
        let path = self.record_path(context, server_origin);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn discard(&self, path: &Path, reason: &str) {
        warn!(path = %path.display(), reason, "discarding invalid token record");
        self.remove(path);
    }

    fn remove(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to delete token record");
            }
        }
    }
}

/// Reason the storage object itself is unacceptable, if any.
#[cfg(unix)]
fn storage_problem(metadata: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::MetadataExt;

    if !metadata.file_type().is_file() {
        return Some("not a regular file".to_string());
    }
    let mode = metadata.mode() & 0o7777;
    if mode != RECORD_MODE {
        return Some(format!("permission bits {:o}, expected {:o}", mode, RECORD_MODE));
    }
    if metadata.nlink() != 1 {
        return Some(format!("link count {}", metadata.nlink()));
    }
    None
}

#[cfg(not(unix))]
fn storage_problem(metadata: &fs::Metadata) -> Option<String> {
    if !metadata.file_type().is_file() {
        return Some("not a regular file".to_string());
    }
    None
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir)
}

fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(RECORD_MODE);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
