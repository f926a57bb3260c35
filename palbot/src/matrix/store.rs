//! Small files the bot keeps between restarts: the sync token and the access token.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Persists the `/sync` continuation token so restarts resume without replaying history.
#[derive(Debug, Clone)]
pub struct FileSyncStore {
    path: PathBuf,
}

impl FileSyncStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when no token was saved yet.
    pub fn load_next_batch(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(data) => {
                let token = data.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn save_next_batch(&self, token: &str) -> io::Result<()> {
        write_secret_file(&self.path, format!("{}\n", token.trim()).as_bytes())
    }
}

/// Reads a trimmed secret, treating a missing or unreadable file as absent.
pub fn read_secret_file(path: &Path) -> Option<String> {
    let data = fs::read_to_string(path).ok()?;
    let value = data.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Replaces `path` atomically with owner-only permissions.
pub fn write_secret_file(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        create_private_dir(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    write_private(&tmp, data)?;
    fs::rename(&tmp, path)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::write(path, data)
}
