use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;

/// File system abstraction for derived-file I/O and testing
pub trait FileSystem {
    /// Check if a file exists
    fn exists(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the whole file
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Last modification time
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// Real file system implementation
#[derive(Debug, Clone, Copy)]
pub struct RealFileSystem {
    atomic: bool,
}

impl RealFileSystem {
    pub fn new() -> Self {
        Self { atomic: true }
    }

    /// Write through a temporary file renamed over the target, so readers
    /// never see a half-written file
    pub fn with_atomic_writes(atomic: bool) -> Self {
        Self { atomic }
    }
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if !self.atomic {
            return std::fs::write(path, bytes);
        }
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        io::Write::write_all(&mut temp, bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    bytes: Vec<u8>,
    modified: SystemTime,
}

/// In-memory file system with a manual clock, for tests
#[derive(Debug)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, MemoryFile>>,
    clock: Mutex<SystemTime>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            clock: Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
        }
    }

    /// Current time of the manual clock
    pub fn now(&self) -> SystemTime {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn advance(&self, by: Duration) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        *clock += by;
    }

    /// Create or replace a file, stamped with the current clock
    pub fn add_file(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        let modified = self.now();
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                path.into(),
                MemoryFile {
                    bytes: bytes.into(),
                    modified,
                },
            );
    }

    /// Bump the modification time without changing the content
    pub fn touch(&self, path: &Path) -> io::Result<()> {
        let now = self.now();
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let file = files.get_mut(path).ok_or_else(|| not_found(path))?;
        file.modified = now;
        Ok(())
    }

    pub fn remove_file(&self, path: &Path) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    /// File content as UTF-8, for assertions
    pub fn contents(&self, path: &Path) -> Option<String> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .get(path)
            .map(|file| String::from_utf8_lossy(&file.bytes).into_owned())
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .get(path)
            .map(|file| file.bytes.clone())
            .ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.add_file(path, bytes);
        Ok(())
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .get(path)
            .map(|file| file.modified)
            .ok_or_else(|| not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_clock_and_files() {
        let fs = MemoryFileSystem::new();
        let path = Path::new("/tmp/a.py");
        assert!(!fs.exists(path));

        fs.add_file(path, "x = 1\n");
        let before = fs.modified(path).unwrap();
        fs.advance(Duration::from_secs(5));
        fs.touch(path).unwrap();

        assert_eq!(fs.modified(path).unwrap(), before + Duration::from_secs(5));
        assert_eq!(fs.read(path).unwrap(), b"x = 1\n");
        assert!(fs.read(Path::new("/tmp/missing.py")).is_err());
    }

    #[test]
    fn test_real_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.py");
        let fs = RealFileSystem::new();

        fs.write(&path, b"first\n").unwrap();
        fs.write(&path, b"second\n").unwrap();

        assert!(fs.exists(&path));
        assert_eq!(fs.read(&path).unwrap(), b"second\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
