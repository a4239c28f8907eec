//! # Sync Controller
//!
//! Keeps one outline subtree and one derived file on disk in step. Each call
//! to [`SyncController::sync`] looks at both sides, decides which of them
//! moved since the last sync, and either writes the outline out, reads the
//! file in, or hands the decision to the user when both moved.
//!
//! Disk changes are detected by modification time first and confirmed with a
//! crc32 of the bytes, so touching a file without editing it is not a change.
//! Outline changes are detected against the [`Snapshot`] taken at the last
//! sync.

use crate::errors::{SyncError, SyncResult};
use crate::filesystem::{FileSystem, RealFileSystem};
use crate::locks::{acquire, PathLocks};
use crate::options::SyncOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, instrument, warn};
use trellis_outline::{NodeId, Outline, Snapshot};
use trellis_sentinel::directives::{classify_body_line, BodyLine};
use trellis_sentinel::{
    Diagnostic, LanguageSpec, ReadContext, Reader, ReconciliationResult, Writer,
};

/// What was on disk and in the outline at the last successful sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub mtime: SystemTime,
    pub crc: u32,
    pub snapshot: Snapshot,
}

/// A file on disk derived from an outline node
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFile {
    pub path: PathBuf,
    pub root: NodeId,
    /// Explicit language; otherwise taken from the root body or the extension
    pub language: Option<LanguageSpec>,
    /// The root's subtree is only partly loaded
    pub partial: bool,
    pub last_sync: Option<SyncState>,
}

impl DerivedFile {
    pub fn new(path: impl Into<PathBuf>, root: NodeId) -> Self {
        Self {
            path: path.into(),
            root,
            language: None,
            partial: false,
            last_sync: None,
        }
    }

    pub fn with_language(mut self, language: LanguageSpec) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn is_synced(&self) -> bool {
        self.last_sync.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    UpToDate,
    /// Outline to disk
    Write,
    /// Disk to outline
    Read,
    /// Both sides changed since the last sync
    AskUser,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    /// False when the bytes on disk already matched
    pub written: bool,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    UpToDate,
    Written(WriteReport),
    Read(ReconciliationResult),
    AskUser,
}

impl SyncOutcome {
    pub fn action(&self) -> SyncAction {
        match self {
            SyncOutcome::UpToDate => SyncAction::UpToDate,
            SyncOutcome::Written(_) => SyncAction::Write,
            SyncOutcome::Read(_) => SyncAction::Read,
            SyncOutcome::AskUser => SyncAction::AskUser,
        }
    }
}

/// Drives writes and reads of derived files
pub struct SyncController<F: FileSystem> {
    fs: F,
    options: SyncOptions,
    locks: PathLocks,
}

impl SyncController<RealFileSystem> {
    pub fn with_options(options: SyncOptions) -> Self {
        let fs = RealFileSystem::with_atomic_writes(options.atomic_writes);
        Self::new(fs, options)
    }
}

impl<F: FileSystem> SyncController<F> {
    pub fn new(fs: F, options: SyncOptions) -> Self {
        Self {
            fs,
            options,
            locks: PathLocks::new(),
        }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Which way the next sync of `file` would go
    #[instrument(skip_all, fields(path = %file.path.display()))]
    pub fn decide(&self, outline: &Outline, file: &DerivedFile) -> SyncResult<SyncAction> {
        check_tracked(outline, file)?;
        let lock = self.locks.lock_for(&file.path);
        let _guard = acquire(&lock);
        self.decide_locked(outline, file)
    }

    /// Bring outline and disk back in step. `AskUser` is returned as is;
    /// resolve it with an explicit [`write_file`](Self::write_file) or
    /// [`read_file`](Self::read_file).
    #[instrument(skip_all, fields(path = %file.path.display()))]
    pub fn sync(&self, outline: &mut Outline, file: &mut DerivedFile) -> SyncResult<SyncOutcome> {
        check_tracked(outline, file)?;
        let lock = self.locks.lock_for(&file.path);
        let _guard = acquire(&lock);

        match self.decide_locked(outline, file)? {
            SyncAction::UpToDate => Ok(SyncOutcome::UpToDate),
            SyncAction::Write => self.write_locked(outline, file).map(SyncOutcome::Written),
            SyncAction::Read => self.read_locked(outline, file).map(SyncOutcome::Read),
            SyncAction::AskUser => {
                warn!("Outline and file both changed since the last sync");
                Ok(SyncOutcome::AskUser)
            }
        }
    }

    /// Write the outline to disk regardless of what is there
    #[instrument(skip_all, fields(path = %file.path.display()))]
    pub fn write_file(&self, outline: &Outline, file: &mut DerivedFile) -> SyncResult<WriteReport> {
        check_tracked(outline, file)?;
        let lock = self.locks.lock_for(&file.path);
        let _guard = acquire(&lock);
        self.write_locked(outline, file)
    }

    /// Read the file into the outline regardless of what changed
    #[instrument(skip_all, fields(path = %file.path.display()))]
    pub fn read_file(
        &self,
        outline: &mut Outline,
        file: &mut DerivedFile,
    ) -> SyncResult<ReconciliationResult> {
        check_tracked(outline, file)?;
        let lock = self.locks.lock_for(&file.path);
        let _guard = acquire(&lock);
        self.read_locked(outline, file)
    }

    /// Language for a write: an `@language` directive in the root body, then
    /// the file's explicit language, then the extension, then the default
    pub fn write_language(&self, outline: &Outline, file: &DerivedFile) -> SyncResult<LanguageSpec> {
        let root = outline.node(file.root)?;
        let from_body = root
            .body()
            .iter()
            .find_map(|line| match classify_body_line(line) {
                BodyLine::Directive {
                    name: "language",
                    value,
                } => LanguageSpec::lookup(value),
                _ => None,
            });

        Ok(from_body
            .or_else(|| file.language.clone())
            .or_else(|| LanguageSpec::from_path(&file.path))
            .unwrap_or_else(|| self.options.codec.default_language_spec()))
    }

    fn decide_locked(&self, outline: &Outline, file: &DerivedFile) -> SyncResult<SyncAction> {
        if !self.fs.exists(&file.path) {
            return Ok(SyncAction::Write);
        }
        let Some(state) = &file.last_sync else {
            return Ok(SyncAction::Read);
        };

        let disk_changed = self.disk_changed(&file.path, state)?;
        let outline_changed = state.snapshot.outline_changed(outline, file.root)?;
        let action = match (disk_changed, outline_changed) {
            (false, false) => SyncAction::UpToDate,
            (false, true) => SyncAction::Write,
            (true, false) => SyncAction::Read,
            (true, true) => SyncAction::AskUser,
        };
        debug!(disk_changed, outline_changed, ?action, "Decided sync action");
        Ok(action)
    }

    fn disk_changed(&self, path: &Path, state: &SyncState) -> SyncResult<bool> {
        if self.fs.modified(path)? == state.mtime {
            return Ok(false);
        }
        let bytes = self.fs.read(path)?;
        Ok(crc32fast::hash(&bytes) != state.crc)
    }

    fn write_locked(&self, outline: &Outline, file: &mut DerivedFile) -> SyncResult<WriteReport> {
        let language = self.write_language(outline, file)?;
        let output = Writer::new(outline, &self.options.codec).write(file.root, &language)?;
        let bytes = output.text.as_bytes();

        let unchanged = self.options.write_only_if_changed
            && self.fs.exists(&file.path)
            && self.fs.read(&file.path)? == bytes;
        if !unchanged {
            self.fs.write(&file.path, bytes)?;
        }

        file.last_sync = Some(SyncState {
            mtime: self.fs.modified(&file.path)?,
            crc: crc32fast::hash(bytes),
            snapshot: Snapshot::capture(outline, file.root)?,
        });

        info!(
            language = language.name(),
            written = !unchanged,
            diagnostics = output.diagnostics.len(),
            "Wrote derived file"
        );
        Ok(WriteReport {
            written: !unchanged,
            diagnostics: output.diagnostics,
        })
    }

    fn read_locked(
        &self,
        outline: &mut Outline,
        file: &mut DerivedFile,
    ) -> SyncResult<ReconciliationResult> {
        let bytes = self.fs.read(&file.path)?;
        let mtime = self.fs.modified(&file.path)?;
        let hint = file
            .language
            .clone()
            .or_else(|| LanguageSpec::from_path(&file.path));

        let ctx = ReadContext {
            snapshot: file.last_sync.as_ref().map(|state| &state.snapshot),
            partial: file.partial,
        };
        let result =
            Reader::new(&self.options.codec).read(&bytes, outline, file.root, hint.as_ref(), &ctx)?;

        // A conflicted read leaves the old state so the next decision asks again
        if result.structural_conflicts.is_empty() {
            file.last_sync = Some(SyncState {
                mtime,
                crc: crc32fast::hash(&bytes),
                snapshot: Snapshot::capture(outline, file.root)?,
            });
        } else {
            warn!(
                conflicts = result.structural_conflicts.len(),
                "Read finished with structural conflicts"
            );
        }

        info!(
            updated = result.updated_nodes.len(),
            new = result.new_nodes.len(),
            orphaned = result.orphaned_nodes.len(),
            "Read derived file"
        );
        Ok(result)
    }
}

fn check_tracked(outline: &Outline, file: &DerivedFile) -> SyncResult<()> {
    if outline.contains(file.root) {
        Ok(())
    } else {
        Err(SyncError::UntrackedFile(file.path.clone()))
    }
}
