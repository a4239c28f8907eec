//! # Trellis Outline
//!
//! In-memory outline tree: nodes with a stable gnx, a headline, a body and
//! ordered children. Nodes may be shared between several parents (clones).

pub mod error;
pub mod gnx;
pub mod outline;
pub mod position;
pub mod snapshot;

pub use error::{OutlineError, OutlineResult};
pub use gnx::{Gnx, GnxGenerator};
pub use outline::{split_body, NodeId, Outline, VNode};
pub use position::Position;
pub use snapshot::{content_checksum, Snapshot};
