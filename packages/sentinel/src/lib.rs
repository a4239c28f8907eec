//! # Trellis Sentinel
//!
//! Codec between an outline subtree and a "derived file": an ordinary source
//! file whose comments carry the outline structure as sentinel lines.
//!
//! ```text
//! #@+leo-ver=5-thin
//! #@+node:ekr.20240101.1: * @file app.py
//! import sys
//! #@+others
//! #@+node:ekr.20240101.2: ** main
//! def main():
//!     pass
//! #@-node
//! #@-others
//! #@-node
//! #@-leo
//! ```
//!
//! ## Modules
//!
//! - [`grammar`]: line classification and sentinel encoding
//! - [`delims`]: comment delimiters per language
//! - [`directives`]: body-line directives and section resolution
//! - [`writer`]: outline to text
//! - [`reader`]: text to [`DerivedFileModel`]
//! - [`reconcile`]: merging a model back into the outline

pub mod delims;
pub mod diagnostics;
pub mod directives;
pub mod error;
pub mod grammar;
pub mod model;
pub mod options;
pub mod reader;
pub mod reconcile;
pub mod writer;

pub use delims::{Delims, LanguageSpec, SentinelDelims};
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
#[cfg(feature = "pretty-errors")]
pub use diagnostics::format_diagnostics;
pub use error::{SentinelError, SentinelResult};
pub use grammar::{classify, LineClass, SentinelKind, SentinelToken};
pub use model::{DerivedFileModel, ParsedChild, ParsedNode, Placement, Repair};
pub use options::{CodecOptions, FormattingState, LineEnding, SectionPolicy};
pub use reader::Reader;
pub use reconcile::{reconcile, ConflictKind, ReadContext, ReconciliationResult, StructuralConflict};
pub use writer::{write, WriteOutput, Writer};

use trellis_outline::{NodeId, Outline};

/// Read with default options, merging into `known_root`
pub fn read(
    bytes: &[u8],
    outline: &mut Outline,
    known_root: NodeId,
    language_hint: Option<&LanguageSpec>,
) -> SentinelResult<ReconciliationResult> {
    let options = CodecOptions::default();
    Reader::new(&options).read(bytes, outline, known_root, language_hint, &ReadContext::default())
}
