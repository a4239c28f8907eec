//! # Trellis Sync
//!
//! Keeps derived files on disk in step with the outline nodes they come
//! from. The [`SyncController`] decides per file whether to write, read, or
//! ask the user, and runs the sentinel codec in the chosen direction.
//!
//! ```no_run
//! use trellis_outline::{Gnx, Outline};
//! use trellis_sync::{DerivedFile, SyncController, SyncOptions};
//!
//! let mut outline = Outline::new();
//! let root = outline
//!     .add_root(Gnx::new("ekr.20240101.1").unwrap(), "@file app.py", vec!["print()".into()])
//!     .unwrap();
//! let controller = SyncController::with_options(SyncOptions::default());
//! let mut file = DerivedFile::new("app.py", root);
//! controller.sync(&mut outline, &mut file).unwrap();
//! ```

pub mod controller;
pub mod errors;
pub mod filesystem;
pub mod locks;
pub mod options;

pub use controller::{DerivedFile, SyncAction, SyncController, SyncOutcome, SyncState, WriteReport};
pub use errors::{SyncError, SyncResult};
pub use filesystem::{FileSystem, MemoryFileSystem, RealFileSystem};
pub use locks::PathLocks;
pub use options::{SyncOptions, DEFAULT_CONFIG_NAME};
