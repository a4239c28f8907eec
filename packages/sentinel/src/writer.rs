//! # Writer
//!
//! Serializes the subtree under an `@file` root into sentineled text.
//!
//! ## Passes
//!
//! 1. A planning pass walks the tree exactly as writing would and records
//!    every child consumed by a resolved section reference anywhere in the
//!    subtree.
//! 2. The writing pass emits lines. A node's `@others` set is its children
//!    minus the consumed ones, in stored order.
//!
//! Output is a pure function of the outline and the options: writing an
//! unchanged tree twice yields identical bytes.

use crate::delims::{LanguageSpec, SentinelDelims};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::directives::{classify_body_line, indent_line, resolve_section, BodyLine, Resolution};
use crate::error::SentinelResult;
use crate::grammar::{is_sentinel_candidate, DocKind, Header, SentinelKind, SentinelToken};
use crate::options::{CodecOptions, FormattingState, SectionPolicy};
use std::collections::HashSet;
use tracing::{debug, info, instrument};
use trellis_outline::{NodeId, Outline, Position};

/// Text of a derived file plus whatever the writer noticed on the way
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutput {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl WriteOutput {
    pub fn into_bytes(self) -> Vec<u8> {
        self.text.into_bytes()
    }
}

pub struct Writer<'a> {
    outline: &'a Outline,
    options: &'a CodecOptions,
}

impl<'a> Writer<'a> {
    pub fn new(outline: &'a Outline, options: &'a CodecOptions) -> Self {
        Self { outline, options }
    }

    #[instrument(skip(self, language), fields(root = root.index(), language = %language.name()))]
    pub fn write(&self, root: NodeId, language: &LanguageSpec) -> SentinelResult<WriteOutput> {
        let mut planner = Emitter::new(self.outline, self.options, language, HashSet::new(), true);
        planner.write_file(root)?;
        let consumed = planner.consumed;
        debug!(consumed = consumed.len(), "Planned section references");

        let mut emitter = Emitter::new(self.outline, self.options, language, consumed, false);
        emitter.write_file(root)?;

        for id in self.outline.subtree(root)? {
            if !emitter.written.contains(&id) {
                let gnx = self.outline.node(id)?.gnx().clone();
                emitter.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UnwrittenNode { gnx: gnx.clone() },
                    0,
                    format!("node {} is consumed by a reference that is never expanded", gnx),
                ));
            }
        }

        let ending = self.options.line_ending.as_str();
        let mut text = emitter.lines.join(ending);
        text.push_str(ending);

        info!(
            lines = emitter.lines.len(),
            diagnostics = emitter.diagnostics.len(),
            "Wrote derived file"
        );
        Ok(WriteOutput {
            text,
            diagnostics: emitter.diagnostics,
        })
    }
}

/// Serialize with default options and an explicit tab width
pub fn write(
    outline: &Outline,
    root: NodeId,
    language: &LanguageSpec,
    tab_width: i32,
) -> SentinelResult<WriteOutput> {
    let options = CodecOptions {
        tab_width,
        ..CodecOptions::default()
    };
    Writer::new(outline, &options).write(root, language)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Doc,
    Raw,
}

struct Emitter<'a> {
    outline: &'a Outline,
    options: &'a CodecOptions,
    language: &'a LanguageSpec,
    delims: SentinelDelims,
    policy: SectionPolicy,
    /// (scope parent, child) pairs expanded through a section reference
    consumed: HashSet<(NodeId, NodeId)>,
    written: HashSet<NodeId>,
    planning: bool,
    lines: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Emitter<'a> {
    fn new(
        outline: &'a Outline,
        options: &'a CodecOptions,
        language: &'a LanguageSpec,
        consumed: HashSet<(NodeId, NodeId)>,
        planning: bool,
    ) -> Self {
        Self {
            outline,
            options,
            language,
            delims: language.sentinel_delims(),
            policy: options.section_policy,
            consumed,
            written: HashSet::new(),
            planning,
            lines: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn sentinel(&mut self, indent: &str, kind: SentinelKind) {
        let line = SentinelToken::indented(kind, indent).encode(&self.delims);
        self.lines.push(line);
    }

    /// Push a content line, escaping it if it would read back as a sentinel
    fn content(&mut self, indent: &str, line: String) {
        if is_sentinel_candidate(&line, &self.delims) {
            self.sentinel(indent, SentinelKind::Verbatim);
        }
        self.lines.push(line);
    }

    fn diagnostic(&mut self, kind: DiagnosticKind, message: String) {
        if !self.planning {
            let line = self.lines.len() + 1;
            self.diagnostics.push(Diagnostic::new(kind, line, message));
        }
    }

    fn write_file(&mut self, root: NodeId) -> SentinelResult<()> {
        let outline = self.outline;
        let body = outline.node(root)?.body();

        let first = body.iter().take_while(|l| is_directive(l, "first")).count();
        let last = body[first..]
            .iter()
            .rev()
            .take_while(|l| is_directive(l, "last"))
            .count();

        for line in &body[..first] {
            self.lines.push(directive_text(line, "first").to_string());
        }
        self.lines.push(Header::new(self.delims.clone()).encode());

        let state = FormattingState::new(self.language.clone(), self.options);
        self.sentinel("", SentinelKind::pragma("language", format!(" {}", state.language.name())));
        self.sentinel("", SentinelKind::pragma("tabwidth", format!(" {}", state.tab_width)));
        self.sentinel("", SentinelKind::pragma("pagewidth", format!(" {}", state.page_width)));

        self.write_node(&Position::root(root), 1, "", &state, Some((first, last)))?;
        self.sentinel("", SentinelKind::FileClose);

        for line in &body[body.len() - last..] {
            self.lines.push(directive_text(line, "last").to_string());
        }
        Ok(())
    }

    fn write_node(
        &mut self,
        pos: &Position,
        level: usize,
        indent: &str,
        state: &FormattingState,
        first_last: Option<(usize, usize)>,
    ) -> SentinelResult<()> {
        let outline = self.outline;
        let id = pos.node();
        let node = outline.node(id)?;
        self.written.insert(id);
        self.sentinel(
            indent,
            SentinelKind::NodeOpen {
                gnx: node.gnx().clone(),
                level,
                headline: node.headline().to_string(),
            },
        );
        let mut state = state.for_child();
        self.write_body(pos, level, indent, &mut state, first_last)?;
        self.sentinel(indent, SentinelKind::NodeClose);
        Ok(())
    }

    fn write_body(
        &mut self,
        pos: &Position,
        level: usize,
        indent: &str,
        state: &mut FormattingState,
        first_last: Option<(usize, usize)>,
    ) -> SentinelResult<()> {
        let outline = self.outline;
        let id = pos.node();
        let node = outline.node(id)?;
        let body = node.body();
        let eligible: Vec<NodeId> = node
            .children()
            .iter()
            .copied()
            .filter(|child| self.planning || !self.consumed.contains(&(id, *child)))
            .collect();

        let mut mode = Mode::Code;
        let mut others_written = false;
        let mut all_written = false;

        for (i, line) in body.iter().enumerate() {
            if let Some((first, last)) = first_last {
                if i < first {
                    self.sentinel(indent, SentinelKind::pragma("first", ""));
                    continue;
                }
                if i >= body.len() - last {
                    self.sentinel(indent, SentinelKind::pragma("last", ""));
                    continue;
                }
            }

            let class = classify_body_line(line);
            match mode {
                Mode::Raw => {
                    if let BodyLine::RawEnd { value } = class {
                        self.sentinel(indent, SentinelKind::pragma("end_raw", value));
                        mode = Mode::Code;
                    } else {
                        self.content(indent, line.clone());
                    }
                    continue;
                }
                Mode::Doc => {
                    match class {
                        BodyLine::DocStart { kind, follow } => {
                            self.end_doc(indent);
                            self.start_doc(indent, kind, follow);
                        }
                        BodyLine::CodeStart { name, value } => {
                            self.end_doc(indent);
                            self.sentinel(indent, SentinelKind::pragma(name, value));
                            mode = Mode::Code;
                        }
                        _ => self.doc_line(indent, line),
                    }
                    continue;
                }
                Mode::Code => {}
            }

            match class {
                BodyLine::Plain => self.content(indent, indent_line(indent, line)),
                BodyLine::Others { indent: ws } => {
                    let inner = format!("{}{}", indent, ws);
                    self.sentinel(&inner, SentinelKind::OthersOpen { implicit: false });
                    if others_written {
                        self.diagnostic(
                            DiagnosticKind::MultipleOthers,
                            format!("second @others in {}", node.headline()),
                        );
                    } else {
                        for child in &eligible {
                            self.write_node(&pos.child(*child), level + 1, &inner, state, None)?;
                        }
                        others_written = true;
                    }
                    self.sentinel(&inner, SentinelKind::OthersClose { implicit: false });
                }
                BodyLine::All { indent: ws } => {
                    let inner = format!("{}{}", indent, ws);
                    self.sentinel(&inner, SentinelKind::AllOpen);
                    for child in node.children() {
                        self.write_all_node(&pos.child(*child), level + 1, &inner)?;
                    }
                    self.sentinel(&inner, SentinelKind::AllClose);
                    all_written = true;
                }
                BodyLine::SectionRef {
                    indent: ws,
                    name,
                    after,
                } => self.write_reference(pos, level, indent, ws, name, after, line, state)?,
                BodyLine::DocStart { kind, follow } => {
                    self.start_doc(indent, kind, follow);
                    mode = Mode::Doc;
                }
                BodyLine::CodeStart { name, value } => {
                    self.sentinel(indent, SentinelKind::pragma(name, value));
                }
                BodyLine::RawStart { value } => {
                    self.sentinel(indent, SentinelKind::pragma("raw", value));
                    mode = Mode::Raw;
                }
                BodyLine::RawEnd { value } => {
                    self.sentinel(indent, SentinelKind::pragma("end_raw", value));
                }
                BodyLine::Directive { name, value } => {
                    state.apply(name, value);
                    self.sentinel(indent, SentinelKind::pragma(name, value));
                }
            }
        }

        if mode == Mode::Doc {
            self.end_doc(indent);
        }

        if !others_written && !all_written && !eligible.is_empty() {
            self.sentinel(indent, SentinelKind::OthersOpen { implicit: true });
            for child in &eligible {
                self.write_node(&pos.child(*child), level + 1, indent, state, None)?;
            }
            self.sentinel(indent, SentinelKind::OthersClose { implicit: true });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_reference(
        &mut self,
        pos: &Position,
        level: usize,
        indent: &str,
        ws: &str,
        name: &str,
        after: &str,
        line: &str,
        state: &FormattingState,
    ) -> SentinelResult<()> {
        match self.resolve(pos, name)? {
            Resolution::Resolved((scope, child)) => {
                if pos.contains(child) {
                    self.diagnostic(
                        DiagnosticKind::RecursiveSectionReference {
                            name: name.to_string(),
                        },
                        format!("<<{}>> expands a node that contains it", name),
                    );
                    self.content(indent, indent_line(indent, line));
                    return Ok(());
                }
                self.consumed.insert((scope, child));

                let inner = format!("{}{}", indent, ws);
                self.sentinel(&inner, SentinelKind::SectionRefOpen(name.to_string()));
                self.write_node(&pos.child(child), level + 1, &inner, state, None)?;
                self.sentinel(&inner, SentinelKind::SectionRefClose(name.to_string()));
                if !after.is_empty() {
                    self.sentinel(&inner, SentinelKind::AfterRef);
                    self.lines.push(after.to_string());
                }
            }
            Resolution::Ambiguous(candidates) => {
                let mut gnxs = Vec::new();
                for (_, child) in &candidates {
                    gnxs.push(self.outline.node(*child)?.gnx().clone());
                }
                self.diagnostic(
                    DiagnosticKind::AmbiguousSectionReference {
                        name: name.to_string(),
                        candidates: gnxs,
                    },
                    format!("<<{}>> matches {} nodes", name, candidates.len()),
                );
                self.content(indent, indent_line(indent, line));
            }
            Resolution::Dangling => {
                self.diagnostic(
                    DiagnosticKind::DanglingSectionReference {
                        name: name.to_string(),
                    },
                    format!("no definition for <<{}>>", name),
                );
                self.content(indent, indent_line(indent, line));
            }
        }
        Ok(())
    }

    /// Candidates are children of the node, then of each ancestor up to the
    /// file root
    fn resolve(&self, pos: &Position, name: &str) -> SentinelResult<Resolution<(NodeId, NodeId)>> {
        let outline = self.outline;
        let mut scopes = Vec::new();
        for parent in std::iter::once(pos.node()).chain(pos.ancestors()) {
            let mut scope = Vec::new();
            for child in outline.children(parent)? {
                scope.push(((parent, *child), outline.node(*child)?.headline()));
            }
            scopes.push(scope);
        }
        Ok(resolve_section(name, &scopes, self.policy))
    }

    /// `@all`: every descendant in stored order, bodies written as code
    fn write_all_node(&mut self, pos: &Position, level: usize, indent: &str) -> SentinelResult<()> {
        let outline = self.outline;
        let id = pos.node();
        let node = outline.node(id)?;
        self.written.insert(id);
        self.sentinel(
            indent,
            SentinelKind::NodeOpen {
                gnx: node.gnx().clone(),
                level,
                headline: node.headline().to_string(),
            },
        );
        for line in node.body() {
            self.content(indent, indent_line(indent, line));
        }
        for child in node.children() {
            self.write_all_node(&pos.child(*child), level + 1, indent)?;
        }
        self.sentinel(indent, SentinelKind::NodeClose);
        Ok(())
    }

    fn start_doc(&mut self, indent: &str, kind: DocKind, follow: &str) {
        self.sentinel(
            indent,
            SentinelKind::DocStart {
                kind,
                follow: follow.to_string(),
            },
        );
        if self.delims.is_block() {
            let open = self.delims.open.clone();
            self.content(indent, indent_line(indent, &open));
        }
    }

    fn end_doc(&mut self, indent: &str) {
        if self.delims.is_block() {
            let close = self.delims.close.clone();
            self.content(indent, indent_line(indent, &close));
        }
    }

    fn doc_line(&mut self, indent: &str, line: &str) {
        let text = if self.delims.is_block() {
            line.to_string()
        } else if line.is_empty() {
            self.delims.open.clone()
        } else {
            format!("{} {}", self.delims.open, line)
        };
        self.content(indent, indent_line(indent, &text));
    }
}

fn is_directive(line: &str, directive: &str) -> bool {
    matches!(classify_body_line(line), BodyLine::Directive { name, .. } if name == directive)
}

/// `@first text` -> `text`
fn directive_text<'l>(line: &'l str, directive: &str) -> &'l str {
    let rest = line.get(directive.len() + 1..).unwrap_or("");
    rest.strip_prefix(' ').unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_outline::Gnx;

    fn gnx(s: &str) -> Gnx {
        Gnx::new(s).unwrap()
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    fn python() -> LanguageSpec {
        LanguageSpec::named("python").unwrap()
    }

    #[test]
    fn test_write_single_node() {
        let mut outline = Outline::new();
        let root = outline
            .add_root(gnx("r"), "@file a.py", lines("x = 1\n\ny = 2"))
            .unwrap();

        let out = write(&outline, root, &python(), -4).unwrap();
        assert_eq!(
            out.text,
            "#@+leo-ver=5-thin\n#@@language python\n#@@tabwidth -4\n#@@pagewidth 132\n\
             #@+node:r: * @file a.py\nx = 1\n\ny = 2\n#@-node\n#@-leo\n"
        );
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_implicit_others_for_children() {
        let mut outline = Outline::new();
        let root = outline.add_root(gnx("r"), "@file a.py", lines("import os")).unwrap();
        let a = outline.new_node(gnx("a"), "a", lines("def a(): pass")).unwrap();
        outline.append_child(root, a).unwrap();

        let text = write(&outline, root, &python(), -4).unwrap().text;
        assert!(text.contains(
            "import os\n#@+others-implicit\n#@+node:a: ** a\ndef a(): pass\n#@-node\n#@-others-implicit\n"
        ));
    }

    #[test]
    fn test_indented_others() {
        let mut outline = Outline::new();
        let root = outline
            .add_root(gnx("r"), "@file a.py", lines("class A:\n    @others"))
            .unwrap();
        let m = outline
            .new_node(gnx("m"), "m", lines("def m(self):\n    pass\n\n"))
            .unwrap();
        outline.append_child(root, m).unwrap();

        let text = write(&outline, root, &python(), -4).unwrap().text;
        assert!(text.contains(
            "class A:\n    #@+others\n    #@+node:m: ** m\n    def m(self):\n        pass\n\n    #@-node\n    #@-others\n"
        ));
    }

    #[test]
    fn test_section_reference_expanded_inline() {
        let mut outline = Outline::new();
        let root = outline
            .add_root(gnx("r"), "@file a.py", lines("<<imports>>\n@others"))
            .unwrap();
        let imports = outline
            .new_node(gnx("i"), "<<imports>>", lines("import sys"))
            .unwrap();
        let f = outline.new_node(gnx("f"), "f", lines("def f(): pass")).unwrap();
        outline.append_child(root, imports).unwrap();
        outline.append_child(root, f).unwrap();

        let text = write(&outline, root, &python(), -4).unwrap().text;
        assert!(text.contains("#@+<<imports>>\n#@+node:i: ** <<imports>>\nimport sys\n#@-node\n#@-<<imports>>\n"));
        assert_eq!(text.matches("#@+node:i:").count(), 1);
        assert!(text.contains("#@+others\n#@+node:f: ** f"));
    }

    #[test]
    fn test_afterref_and_verbatim() {
        let mut outline = Outline::new();
        let root = outline
            .add_root(gnx("r"), "@file a.py", lines("<<x>> # tail\n#@+node:fake"))
            .unwrap();
        let x = outline.new_node(gnx("x"), "<<x>>", lines("x = 1")).unwrap();
        outline.append_child(root, x).unwrap();

        let text = write(&outline, root, &python(), -4).unwrap().text;
        assert!(text.contains("#@-<<x>>\n#@afterref\n # tail\n"));
        assert!(text.contains("#@verbatim\n#@+node:fake\n"));
    }

    #[test]
    fn test_dangling_and_ambiguous_references() {
        let mut outline = Outline::new();
        let root = outline
            .add_root(gnx("r"), "@file a.py", lines("<<missing>>\n<<helper>>"))
            .unwrap();
        for g in ["h1", "h2"] {
            let h = outline.new_node(gnx(g), "helper", lines("pass")).unwrap();
            outline.append_child(root, h).unwrap();
        }

        let out = write(&outline, root, &python(), -4).unwrap();
        assert!(out
            .diagnostics
            .iter()
            .any(|d| matches!(&d.kind, DiagnosticKind::DanglingSectionReference { name } if name == "missing")));
        assert!(out.diagnostics.iter().any(|d| matches!(
            &d.kind,
            DiagnosticKind::AmbiguousSectionReference { candidates, .. } if candidates.len() == 2
        )));
        // Ambiguous candidates are not consumed
        assert!(out.text.contains("#@+others-implicit"));
        assert!(out.text.contains("\n<<helper>>\n"));
    }

    #[test]
    fn test_multiple_others_warns() {
        let mut outline = Outline::new();
        let root = outline
            .add_root(gnx("r"), "@file a.py", lines("@others\n@others"))
            .unwrap();
        let a = outline.new_node(gnx("a"), "a", vec![]).unwrap();
        outline.append_child(root, a).unwrap();

        let out = write(&outline, root, &python(), -4).unwrap();
        assert_eq!(out.text.matches("#@+node:a:").count(), 1);
        assert!(out
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::MultipleOthers));
    }

    #[test]
    fn test_first_and_last_lines() {
        let mut outline = Outline::new();
        let root = outline
            .add_root(
                gnx("r"),
                "@file s.sh",
                lines("@first #!/bin/sh\necho hi\n@last # end"),
            )
            .unwrap();
        let text = write(&outline, root, &LanguageSpec::named("shell").unwrap(), 8)
            .unwrap()
            .text;
        assert!(text.starts_with("#!/bin/sh\n#@+leo-ver=5-thin\n"));
        assert!(text.contains("#@@first\necho hi\n#@@last\n#@-node\n#@-leo\n# end\n"));
    }

    #[test]
    fn test_block_comment_doc_part() {
        let mut outline = Outline::new();
        let root = outline
            .add_root(gnx("r"), "@file a.html", lines("@ notes\nsome doc\n@c\n<p/>"))
            .unwrap();
        let text = write(&outline, root, &LanguageSpec::named("html").unwrap(), -4)
            .unwrap()
            .text;
        assert!(text.contains("<!--@+at notes-->\n<!--\nsome doc\n-->\n<!--@@c-->\n<p/>\n"));
    }

    #[test]
    fn test_write_is_deterministic() {
        let mut outline = Outline::new();
        let root = outline.add_root(gnx("r"), "@file a.py", lines("@others")).unwrap();
        for g in ["a", "b", "c"] {
            let id = outline.new_node(gnx(g), g, lines("pass")).unwrap();
            outline.append_child(root, id).unwrap();
        }
        let first = write(&outline, root, &python(), -4).unwrap();
        let second = write(&outline, root, &python(), -4).unwrap();
        assert_eq!(first, second);
    }
}
