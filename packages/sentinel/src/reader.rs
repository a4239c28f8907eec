//! # Reader
//!
//! Parses a derived file back into a [`DerivedFileModel`].
//!
//! The [`Scanner`] is a single pass that classifies lines and maintains the
//! bracket stack at the same time: whether a line is content or structure
//! depends on the mode of the node being read (doc part, raw block, `@all`
//! region, a pending `@verbatim`).
//!
//! ## Recovery
//!
//! - A malformed sentinel is kept as content
//! - A node whose level is deeper than its bracket allows is skipped up to
//!   its matching `@-node` and reported as a failed child
//! - A shallower level, or a close sentinel for an outer bracket, closes the
//!   brackets in between, unless the current bracket's own close comes
//!   first. Then the node is read at the bracket's level, or the stray close
//!   is dropped.
//! - Every repair is noted in [`DerivedFileModel::repairs`] against the node
//!   it happened in
//! - Only a missing header, invalid UTF-8 or end of input before `@-leo`
//!   abort the read

use crate::delims::{LanguageSpec, SentinelDelims};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::directives::{classify_body_line, resolve_section, strip_indent, BodyLine, Resolution};
use crate::error::{SentinelError, SentinelResult};
use crate::grammar::{classify, Header, LineClass, SentinelKind, SentinelToken};
use crate::model::{DerivedFileModel, ParsedChild, ParsedNode, Placement, Repair};
use crate::options::{CodecOptions, FormattingState, SectionPolicy};
use crate::reconcile::{reconcile, ReadContext, ReconciliationResult};
use std::collections::HashSet;
use tracing::{debug, info, instrument};
use trellis_outline::{Gnx, NodeId, Outline};

pub struct Reader<'a> {
    options: &'a CodecOptions,
}

impl<'a> Reader<'a> {
    pub fn new(options: &'a CodecOptions) -> Self {
        Self { options }
    }

    /// Parse derived-file bytes and merge them into the subtree of
    /// `known_root`. The outline is only touched once the whole file parsed.
    #[instrument(skip_all, fields(root = known_root.index()))]
    pub fn read(
        &self,
        bytes: &[u8],
        outline: &mut Outline,
        known_root: NodeId,
        language_hint: Option<&LanguageSpec>,
        ctx: &ReadContext<'_>,
    ) -> SentinelResult<ReconciliationResult> {
        let model = self.parse(bytes, language_hint)?;
        reconcile(outline, known_root, &model, ctx)
    }

    /// Parse derived-file bytes. `language_hint` is used only when the file
    /// carries no `@@language` header pragma.
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    pub fn parse(
        &self,
        bytes: &[u8],
        language_hint: Option<&LanguageSpec>,
    ) -> SentinelResult<DerivedFileModel> {
        let text = std::str::from_utf8(bytes).map_err(|e| SentinelError::InvalidUtf8 {
            offset: e.valid_up_to(),
        })?;
        let lines = split_lines(text);
        let (header_index, header) = find_header(&lines)?;
        if header.version.version != 5 || !header.version.thin {
            return Err(SentinelError::unsupported(
                header_index + 1,
                format!(
                    "version {}{} is not supported",
                    header.version.version,
                    if header.version.thin { "-thin" } else { "" }
                ),
            ));
        }

        let language = language_hint
            .cloned()
            .unwrap_or_else(|| self.options.default_language_spec());
        let state = FormattingState::new(language, self.options);
        let mut scanner = Scanner::new(lines, header_index, header.delims.clone(), state);

        if let Some(encoding) = &header.version.encoding {
            if !matches!(encoding.to_lowercase().as_str(), "utf-8" | "utf8") {
                scanner.diagnostic(
                    DiagnosticKind::MalformedSentinel,
                    header_index + 1,
                    format!("encoding {} is not supported, decoding as UTF-8", encoding),
                );
            }
        }

        let mut root = scanner.parse_document()?;
        let last_lines: Vec<String> = scanner.rest().iter().map(|l| l.to_string()).collect();
        restore_last_lines(&mut root, &last_lines);

        let header_state = scanner.header_state.clone().unwrap_or_else(|| scanner.state.clone());
        let mut diagnostics = scanner.diagnostics;
        check_literal_references(&root, self.options.section_policy, &mut diagnostics);

        let model = DerivedFileModel {
            header,
            language: header_state.language,
            tab_width: header_state.tab_width,
            page_width: header_state.page_width,
            root,
            first_lines: scanner.first_lines,
            last_lines,
            diagnostics,
            repairs: scanner.repairs,
        };
        info!(
            root = %model.root.gnx,
            nodes = model.nodes().len(),
            diagnostics = model.diagnostics.len(),
            repairs = model.repairs.len(),
            "Parsed derived file"
        );
        Ok(model)
    }
}

/// Split on `\n`, dropping a `\r` before it. A trailing newline does not
/// start another line.
fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

fn find_header(lines: &[&str]) -> SentinelResult<(usize, Header)> {
    for (i, line) in lines.iter().enumerate() {
        match Header::parse(line) {
            Some(Ok(header)) => return Ok((i, header)),
            Some(Err(message)) => return Err(SentinelError::unsupported(i + 1, message)),
            None => {}
        }
    }
    Err(SentinelError::MissingHeader)
}

fn directive_line(name: &str, text: &str) -> String {
    if text.is_empty() {
        format!("@{}", name)
    } else {
        format!("@{} {}", name, text)
    }
}

/// Bare `@last` lines at the end of the root body stand for the lines after
/// `@-leo`, in order.
fn restore_last_lines(root: &mut ParsedNode, last_lines: &[String]) {
    let run = root.body.iter().rev().take_while(|l| *l == "@last").count();
    let start = root.body.len() - run;
    for (i, text) in last_lines.iter().take(run).enumerate() {
        root.body[start + i] = directive_line("last", text);
    }
}

/// Report literal `<<name>>` lines that match several definitions
fn check_literal_references(root: &ParsedNode, policy: SectionPolicy, out: &mut Vec<Diagnostic>) {
    let mut ancestors = Vec::new();
    visit_references(root, false, &mut ancestors, policy, out);
}

/// Bodies written out by an `@all` are verbatim, so their references are
/// never expanded.
fn visit_references<'m>(
    node: &'m ParsedNode,
    placed_by_all: bool,
    ancestors: &mut Vec<&'m ParsedNode>,
    policy: SectionPolicy,
    out: &mut Vec<Diagnostic>,
) {
    let expanded: HashSet<&str> = node
        .section_definitions()
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    let mut in_doc = false;
    let mut in_raw = false;
    let body: &[String] = if placed_by_all { &[] } else { &node.body };
    for line in body {
        match classify_body_line(line) {
            BodyLine::RawStart { .. } if !in_doc => in_raw = true,
            BodyLine::RawEnd { .. } => in_raw = false,
            BodyLine::DocStart { .. } if !in_raw => in_doc = true,
            BodyLine::CodeStart { .. } if !in_raw => in_doc = false,
            BodyLine::SectionRef { name, .. } if !in_doc && !in_raw && !expanded.contains(name) => {
                let scopes: Vec<Vec<(Gnx, &str)>> = std::iter::once(node)
                    .chain(ancestors.iter().rev().copied())
                    .map(|scope| {
                        scope
                            .child_nodes()
                            .map(|(child, _)| (child.gnx.clone(), child.headline.as_str()))
                            .collect()
                    })
                    .collect();
                if let Resolution::Ambiguous(candidates) = resolve_section(name, &scopes, policy) {
                    out.push(Diagnostic::new(
                        DiagnosticKind::AmbiguousSectionReference {
                            name: name.to_string(),
                            candidates: candidates.clone(),
                        },
                        node.line,
                        format!(
                            "<<{}>> in {} matches {} nodes",
                            name,
                            node.headline,
                            candidates.len()
                        ),
                    ));
                }
            }
            _ => {}
        }
    }

    ancestors.push(node);
    for (child, via) in node.child_nodes() {
        let verbatim = placed_by_all || *via == Placement::All;
        visit_references(child, verbatim, ancestors, policy, out);
    }
    ancestors.pop();
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Document,
    Node { level: usize, gnx: Gnx },
    Others { implicit: bool, child_level: usize },
    All { child_level: usize },
    Section { name: String, child_level: usize },
}

impl Frame {
    fn closed_by(&self, kind: &SentinelKind) -> bool {
        match (self, kind) {
            (Frame::Document, SentinelKind::FileClose) => true,
            (Frame::Node { .. }, SentinelKind::NodeClose) => true,
            (Frame::Others { implicit, .. }, SentinelKind::OthersClose { implicit: closing }) => {
                implicit == closing
            }
            (Frame::All { .. }, SentinelKind::AllClose) => true,
            (Frame::Section { name, .. }, SentinelKind::SectionRefClose(closing)) => name == closing,
            _ => false,
        }
    }

    /// Can a node of `level` open directly inside this frame?
    fn accepts_level(&self, level: usize) -> bool {
        match self {
            Frame::Document => false,
            Frame::Node { level: own, .. } => own + 1 == level,
            Frame::Others { child_level, .. }
            | Frame::All { child_level }
            | Frame::Section { child_level, .. } => *child_level == level,
        }
    }

    fn close_sentinel(&self) -> String {
        match self {
            Frame::Document => SentinelKind::FileClose,
            Frame::Node { .. } => SentinelKind::NodeClose,
            Frame::Others { implicit, .. } => SentinelKind::OthersClose { implicit: *implicit },
            Frame::All { .. } => SentinelKind::AllClose,
            Frame::Section { name, .. } => SentinelKind::SectionRefClose(name.clone()),
        }
        .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Doc,
    Raw,
}

enum Class {
    Content,
    Sentinel(SentinelToken),
}

struct Item<'a> {
    number: usize,
    text: &'a str,
    class: Class,
}

/// Header fields of a `@+node` sentinel
struct NodeStart {
    gnx: Gnx,
    level: usize,
    headline: String,
    line: usize,
    indent: String,
}

enum Misfit {
    /// The sentinel belongs to an enclosing bracket and was pushed back
    Unwind,
    /// Read at the level the bracket expects
    Adopted(ParsedNode),
    Failed(ParsedChild),
}

/// Combined line classifier and bracket-stack parser
pub struct Scanner<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    pending: Option<Item<'a>>,
    delims: SentinelDelims,
    frames: Vec<Frame>,
    state: FormattingState,
    header_state: Option<FormattingState>,
    diagnostics: Vec<Diagnostic>,
    repairs: Vec<Repair>,
    first_lines: Vec<String>,
    first_used: usize,
}

impl<'a> Scanner<'a> {
    fn new(
        lines: Vec<&'a str>,
        header_index: usize,
        delims: SentinelDelims,
        state: FormattingState,
    ) -> Self {
        let first_lines = lines[..header_index].iter().map(|l| l.to_string()).collect();
        Self {
            lines,
            pos: header_index + 1,
            pending: None,
            delims,
            frames: Vec::new(),
            state,
            header_state: None,
            diagnostics: Vec::new(),
            repairs: Vec::new(),
            first_lines,
            first_used: 0,
        }
    }

    fn diagnostic(&mut self, kind: DiagnosticKind, line: usize, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(kind, line, message));
    }

    /// Note a repair against the innermost node being read
    fn repair(&mut self, line: usize, truncated: bool, message: impl Into<String>) {
        let Some(gnx) = self.frames.iter().rev().find_map(|frame| match frame {
            Frame::Node { gnx, .. } => Some(gnx.clone()),
            _ => None,
        }) else {
            return;
        };
        let message = message.into();
        debug!(gnx = %gnx, line, truncated, "{}", message);
        self.repairs.push(Repair {
            gnx,
            line,
            message,
            truncated,
        });
    }

    fn in_bracket(&self) -> bool {
        matches!(
            self.frames.last(),
            Some(Frame::Others { .. } | Frame::All { .. } | Frame::Section { .. })
        )
    }

    /// Does the current frame's own close come before any close of an
    /// enclosing frame? `depth` counts brackets already opened past the
    /// current position.
    fn own_close_ahead(&self, mut depth: usize) -> bool {
        let Some(frame) = self.frames.last() else {
            return false;
        };
        let mut lines = self.rest().iter();
        while let Some(line) = lines.next() {
            let LineClass::Sentinel(token) = classify(line, &self.delims) else {
                continue;
            };
            match token.kind {
                SentinelKind::FileClose => return false,
                SentinelKind::Verbatim => {
                    lines.next();
                }
                SentinelKind::NodeOpen { .. }
                | SentinelKind::OthersOpen { .. }
                | SentinelKind::AllOpen
                | SentinelKind::SectionRefOpen(_) => depth += 1,
                ref kind if is_close(kind) => {
                    if depth == 0 {
                        return frame.closed_by(kind);
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        false
    }

    /// Lines after the current position
    fn rest(&self) -> &[&'a str] {
        self.lines.get(self.pos..).unwrap_or(&[])
    }

    fn next_item(&mut self) -> Option<Item<'a>> {
        if let Some(item) = self.pending.take() {
            return Some(item);
        }
        let text = *self.lines.get(self.pos)?;
        self.pos += 1;
        let number = self.pos;
        let class = match classify(text, &self.delims) {
            LineClass::Content => Class::Content,
            LineClass::Sentinel(token) => Class::Sentinel(token),
            LineClass::Malformed(message) => {
                self.diagnostic(DiagnosticKind::MalformedSentinel, number, message);
                Class::Content
            }
        };
        Some(Item {
            number,
            text,
            class,
        })
    }

    fn next_raw_line(&mut self) -> Option<&'a str> {
        let text = *self.lines.get(self.pos)?;
        self.pos += 1;
        Some(text)
    }

    fn unterminated(&self) -> SentinelError {
        SentinelError::unterminated(self.lines.len())
    }

    /// Consume an `@afterref` sentinel if it is next
    fn take_afterref(&mut self) -> bool {
        if self.pending.is_some() {
            return false;
        }
        let is_afterref = self.lines.get(self.pos).is_some_and(|line| {
            matches!(
                classify(line, &self.delims),
                LineClass::Sentinel(SentinelToken {
                    kind: SentinelKind::AfterRef,
                    ..
                })
            )
        });
        if is_afterref {
            self.pos += 1;
        }
        is_afterref
    }

    fn strip(&self, line: &str, indent: &str) -> String {
        strip_indent(line, indent, self.state.tab_columns())
    }

    fn parse_document(&mut self) -> SentinelResult<ParsedNode> {
        self.frames.push(Frame::Document);
        let mut root: Option<ParsedNode> = None;

        loop {
            let Some(Item {
                number,
                text,
                class,
            }) = self.next_item()
            else {
                return Err(self.unterminated());
            };
            let token = match class {
                Class::Content => {
                    if !text.trim().is_empty() {
                        self.diagnostic(
                            DiagnosticKind::MisplacedSentinel,
                            number,
                            "content outside the root node is ignored",
                        );
                        self.root_cut_short(root.as_ref(), number);
                    }
                    continue;
                }
                Class::Sentinel(token) => token,
            };

            match token.kind {
                SentinelKind::FileClose => break,
                SentinelKind::Pragma { name, value } if root.is_none() => {
                    self.state.apply(&name, &value);
                }
                SentinelKind::NodeOpen {
                    gnx,
                    level,
                    headline,
                } if root.is_none() => {
                    if level != 1 {
                        self.diagnostic(
                            DiagnosticKind::LevelMismatch {
                                expected: 1,
                                found: level,
                            },
                            number,
                            "root node should be at level 1",
                        );
                    }
                    self.header_state = Some(self.state.clone());
                    let start = NodeStart {
                        gnx,
                        level,
                        headline,
                        line: number,
                        indent: token.indent,
                    };
                    root = Some(self.parse_node(start, false, true)?);
                }
                SentinelKind::NodeOpen { .. } => {
                    self.root_cut_short(root.as_ref(), number);
                    self.skip_failed();
                    self.diagnostic(
                        DiagnosticKind::UnbalancedBracket {
                            expected: SentinelKind::FileClose.to_string(),
                            found: "@+node".to_string(),
                        },
                        number,
                        "a second root node is ignored",
                    );
                }
                other => {
                    self.diagnostic(
                        DiagnosticKind::MisplacedSentinel,
                        number,
                        format!("{} outside the root node is ignored", other),
                    );
                    self.root_cut_short(root.as_ref(), number);
                }
            }
        }

        self.frames.pop();
        root.ok_or_else(|| SentinelError::unsupported(self.pos, "no root @+node before @-leo"))
    }

    /// Anything but `@-leo` after the root closed means the root was closed
    /// too early
    fn root_cut_short(&mut self, root: Option<&ParsedNode>, number: usize) {
        if let Some(root) = root {
            self.repairs.push(Repair {
                gnx: root.gnx.clone(),
                line: number,
                message: "text follows the end of the root node".to_string(),
                truncated: true,
            });
        }
    }

    fn parse_node(&mut self, start: NodeStart, all: bool, is_root: bool) -> SentinelResult<ParsedNode> {
        let NodeStart {
            gnx,
            level,
            headline,
            line,
            indent,
        } = start;
        self.frames.push(Frame::Node {
            level,
            gnx: gnx.clone(),
        });
        let mut node = ParsedNode::new(gnx, headline, level, line);
        let saved = self.state.clone();
        self.state = saved.for_child();

        let mut mode = Mode::Code;
        let mut doc: Vec<String> = Vec::new();

        loop {
            let Some(Item {
                number,
                text,
                class,
            }) = self.next_item()
            else {
                return Err(self.unterminated());
            };
            let token = match class {
                Class::Content => {
                    self.push_content(&mut node, &mut doc, mode, text, &indent);
                    continue;
                }
                Class::Sentinel(token) => token,
            };

            if mode == Mode::Doc && token.kind != SentinelKind::Verbatim {
                let lines = self.finish_doc(std::mem::take(&mut doc));
                node.body.extend(lines);
                mode = Mode::Code;
            }

            if all {
                match token.kind {
                    SentinelKind::NodeClose => break,
                    SentinelKind::Verbatim => {
                        if let Some(text) = self.next_raw_line() {
                            self.push_content(&mut node, &mut doc, mode, text, &indent);
                        }
                    }
                    SentinelKind::NodeOpen { .. } => {
                        if self.open_in_node(&mut node, token, number, text, true)? {
                            break;
                        }
                    }
                    ref kind if is_close(kind) => {
                        if self.mismatched_close(token, number, text) {
                            break;
                        }
                    }
                    other => {
                        self.diagnostic(
                            DiagnosticKind::MisplacedSentinel,
                            number,
                            format!("{} inside @all is kept as text", other),
                        );
                        self.push_content(&mut node, &mut doc, mode, text, &indent);
                    }
                }
                continue;
            }

            if mode == Mode::Raw {
                match &token.kind {
                    SentinelKind::Verbatim => {
                        if let Some(text) = self.next_raw_line() {
                            node.body.push(text.to_string());
                        }
                        continue;
                    }
                    SentinelKind::Pragma { name, value } if name == "end_raw" => {
                        node.body.push(format!("@end_raw{}", value));
                        mode = Mode::Code;
                        continue;
                    }
                    _ => mode = Mode::Code,
                }
            }

            let relative = self.strip(&token.indent, &indent);
            match token.kind {
                SentinelKind::NodeClose => break,
                SentinelKind::Verbatim => {
                    if let Some(text) = self.next_raw_line() {
                        self.push_content(&mut node, &mut doc, mode, text, &indent);
                    }
                }
                SentinelKind::OthersOpen { implicit } => {
                    if !implicit {
                        node.body.push(format!("{}@others", relative));
                    }
                    let frame = Frame::Others {
                        implicit,
                        child_level: level + 1,
                    };
                    let children = self.parse_bracket(frame, &token.indent, Placement::Others)?;
                    node.children.extend(children);
                }
                SentinelKind::AllOpen => {
                    node.body.push(format!("{}@all", relative));
                    let frame = Frame::All {
                        child_level: level + 1,
                    };
                    let children = self.parse_bracket(frame, &token.indent, Placement::All)?;
                    node.children.extend(children);
                }
                SentinelKind::SectionRefOpen(name) => {
                    node.body.push(format!("{}<<{}>>", relative, name));
                    let frame = Frame::Section {
                        name: name.clone(),
                        child_level: level + 1,
                    };
                    let children =
                        self.parse_bracket(frame, &token.indent, Placement::SectionRef(name))?;
                    node.children.extend(children);
                    if self.take_afterref() {
                        if let (Some(after), Some(last)) = (self.next_raw_line(), node.body.last_mut()) {
                            last.push_str(after);
                        }
                    }
                }
                SentinelKind::AfterRef => {
                    self.diagnostic(
                        DiagnosticKind::MisplacedSentinel,
                        number,
                        "@afterref without a preceding section reference",
                    );
                }
                SentinelKind::DocStart { kind, follow } => {
                    node.body.push(format!("{}{}", kind.directive(), follow));
                    mode = Mode::Doc;
                }
                SentinelKind::Pragma { name, value } => {
                    let line = if is_root
                        && name == "first"
                        && value.is_empty()
                        && node.body.len() == self.first_used
                        && self.first_used < self.first_lines.len()
                    {
                        let text = directive_line("first", &self.first_lines[self.first_used]);
                        self.first_used += 1;
                        text
                    } else {
                        format!("@{}{}", name, value)
                    };
                    node.body.push(line);
                    self.state.apply(&name, &value);
                    if name == "raw" {
                        mode = Mode::Raw;
                    }
                }
                SentinelKind::NodeOpen { .. } => {
                    if self.open_in_node(&mut node, token, number, text, false)? {
                        break;
                    }
                }
                SentinelKind::VersionMarker(_) => {
                    self.diagnostic(
                        DiagnosticKind::MisplacedSentinel,
                        number,
                        "@+leo header inside a node is ignored",
                    );
                }
                SentinelKind::OthersClose { .. }
                | SentinelKind::AllClose
                | SentinelKind::SectionRefClose(_)
                | SentinelKind::FileClose => {
                    if self.mismatched_close(token, number, text) {
                        break;
                    }
                }
            }
        }

        if mode == Mode::Doc {
            let lines = self.finish_doc(doc);
            node.body.extend(lines);
        }
        self.frames.pop();
        self.state = saved;
        Ok(node)
    }

    fn push_content(
        &self,
        node: &mut ParsedNode,
        doc: &mut Vec<String>,
        mode: Mode,
        text: &str,
        indent: &str,
    ) {
        match mode {
            Mode::Raw => node.body.push(text.to_string()),
            Mode::Doc => doc.push(self.strip(text, indent)),
            Mode::Code => node.body.push(self.strip(text, indent)),
        }
    }

    /// Turn the comment lines of a doc part back into body lines
    fn finish_doc(&self, mut lines: Vec<String>) -> Vec<String> {
        if self.delims.is_block() {
            if lines.first().is_some_and(|l| l.trim() == self.delims.open) {
                lines.remove(0);
            }
            if lines.last().is_some_and(|l| l.trim() == self.delims.close) {
                lines.pop();
            }
            return lines;
        }
        lines
            .into_iter()
            .map(|line| match line.strip_prefix(self.delims.open.as_str()) {
                Some(rest) => rest.strip_prefix(' ').unwrap_or(rest).to_string(),
                None => line,
            })
            .collect()
    }

    /// A `@+node` met directly inside a node body. Returns true if the
    /// sentinel was pushed back for an enclosing bracket.
    fn open_in_node(
        &mut self,
        node: &mut ParsedNode,
        token: SentinelToken,
        number: usize,
        text: &'a str,
        all: bool,
    ) -> SentinelResult<bool> {
        let SentinelKind::NodeOpen {
            gnx,
            level,
            headline,
        } = token.kind
        else {
            return Ok(false);
        };

        if level == node.level + 1 {
            if !all {
                self.diagnostic(
                    DiagnosticKind::MisplacedSentinel,
                    number,
                    format!("node {} outside any @others bracket", gnx),
                );
            }
            let start = NodeStart {
                gnx,
                level,
                headline,
                line: number,
                indent: token.indent,
            };
            let child = self.parse_node(start, all, false)?;
            let via = if all { Placement::All } else { Placement::Others };
            node.children.push(ParsedChild::Node { node: child, via });
            return Ok(false);
        }

        let token = SentinelToken::indented(
            SentinelKind::NodeOpen {
                gnx,
                level,
                headline,
            },
            token.indent,
        );
        match self.misfit_open(token, number, text, node.level + 1)? {
            Misfit::Unwind => Ok(true),
            Misfit::Adopted(child) => {
                let via = if all { Placement::All } else { Placement::Others };
                node.children.push(ParsedChild::Node { node: child, via });
                Ok(false)
            }
            Misfit::Failed(child) => {
                node.children.push(child);
                Ok(false)
            }
        }
    }

    /// Handle a `@+node` whose level does not fit the current frame
    fn misfit_open(
        &mut self,
        token: SentinelToken,
        number: usize,
        text: &'a str,
        expected: usize,
    ) -> SentinelResult<Misfit> {
        let SentinelKind::NodeOpen {
            gnx,
            level,
            headline,
        } = &token.kind
        else {
            return Ok(Misfit::Unwind);
        };
        let (gnx, level, headline) = (gnx.clone(), *level, headline.clone());

        let outer = &self.frames[..self.frames.len().saturating_sub(1)];
        if level < expected && outer.iter().any(|frame| frame.accepts_level(level)) {
            if self.in_bracket() && self.own_close_ahead(1) {
                let message = format!(
                    "node {} declares level {} inside a bracket of level {} nodes",
                    gnx, level, expected
                );
                self.diagnostic(
                    DiagnosticKind::LevelMismatch {
                        expected,
                        found: level,
                    },
                    number,
                    message.clone(),
                );
                let all = matches!(self.frames.last(), Some(Frame::All { .. }));
                let start = NodeStart {
                    gnx: gnx.clone(),
                    level: expected,
                    headline,
                    line: number,
                    indent: token.indent,
                };
                let node = self.parse_node(start, all, false)?;
                self.repairs.push(Repair {
                    gnx,
                    line: number,
                    message,
                    truncated: false,
                });
                return Ok(Misfit::Adopted(node));
            }

            let expected_close = self
                .frames
                .last()
                .map(Frame::close_sentinel)
                .unwrap_or_default();
            self.diagnostic(
                DiagnosticKind::UnbalancedBracket {
                    expected: expected_close.clone(),
                    found: "@+node".to_string(),
                },
                number,
                format!("missing {} before node {}", expected_close, gnx),
            );
            self.repair(
                number,
                true,
                format!("closed by node {} at level {}", gnx, level),
            );
            self.pending = Some(Item {
                number,
                text,
                class: Class::Sentinel(token),
            });
            return Ok(Misfit::Unwind);
        }

        self.skip_failed();
        debug!(gnx = %gnx, expected, found = level, "Skipping node with bad level");
        self.diagnostic(
            DiagnosticKind::LevelMismatch {
                expected,
                found: level,
            },
            number,
            format!("node {} declares level {} where {} was expected", gnx, level, expected),
        );
        Ok(Misfit::Failed(ParsedChild::Failed {
            gnx,
            headline,
            level,
            line: number,
        }))
    }

    /// Skip to the `@-node` matching an already consumed `@+node`
    fn skip_failed(&mut self) {
        let mut depth = 1;
        while let Some(line) = self.lines.get(self.pos) {
            let kind = match classify(line, &self.delims) {
                LineClass::Sentinel(token) => Some(token.kind),
                _ => None,
            };
            match kind {
                Some(SentinelKind::NodeOpen { .. }) => depth += 1,
                Some(SentinelKind::NodeClose) => depth -= 1,
                Some(SentinelKind::FileClose) => return,
                _ => {}
            }
            self.pos += 1;
            if depth == 0 {
                return;
            }
        }
    }

    /// A close sentinel that does not close the current frame. Returns true
    /// if it closes an enclosing frame and was pushed back. Inside a bracket
    /// whose own close is still ahead the sentinel is dropped instead.
    fn mismatched_close(&mut self, token: SentinelToken, number: usize, text: &'a str) -> bool {
        let expected = self
            .frames
            .last()
            .map(Frame::close_sentinel)
            .unwrap_or_default();
        let found = token.kind.to_string();
        let outer = &self.frames[..self.frames.len().saturating_sub(1)];
        let closes_outer = outer.iter().any(|frame| frame.closed_by(&token.kind));
        if closes_outer && !(self.in_bracket() && self.own_close_ahead(0)) {
            let message = format!("{} closes an outer bracket before {}", found, expected);
            self.diagnostic(
                DiagnosticKind::UnbalancedBracket {
                    expected: expected.clone(),
                    found: found.clone(),
                },
                number,
                message.clone(),
            );
            self.repair(number, true, message);
            self.pending = Some(Item {
                number,
                text,
                class: Class::Sentinel(token),
            });
            true
        } else {
            let message = format!("unmatched {} is ignored", found);
            self.diagnostic(
                DiagnosticKind::UnbalancedBracket {
                    expected,
                    found: found.clone(),
                },
                number,
                message.clone(),
            );
            self.repair(number, false, message);
            false
        }
    }

    /// Children of an `@others`, `@all` or section bracket
    fn parse_bracket(
        &mut self,
        frame: Frame,
        indent: &str,
        via: Placement,
    ) -> SentinelResult<Vec<ParsedChild>> {
        let child_level = match &frame {
            Frame::Others { child_level, .. }
            | Frame::All { child_level }
            | Frame::Section { child_level, .. } => *child_level,
            Frame::Document | Frame::Node { .. } => 1,
        };
        let all = via == Placement::All;
        self.frames.push(frame);
        let mut children = Vec::new();

        loop {
            let Some(Item {
                number,
                text,
                class,
            }) = self.next_item()
            else {
                return Err(self.unterminated());
            };
            let token = match class {
                Class::Content => {
                    self.stray_content(&mut children, number, text, indent);
                    continue;
                }
                Class::Sentinel(token) => token,
            };

            if self
                .frames
                .last()
                .is_some_and(|frame| frame.closed_by(&token.kind))
            {
                break;
            }

            match token.kind {
                SentinelKind::NodeOpen {
                    gnx,
                    level,
                    headline,
                } => {
                    if level == child_level {
                        let start = NodeStart {
                            gnx,
                            level,
                            headline,
                            line: number,
                            indent: token.indent,
                        };
                        let node = self.parse_node(start, all, false)?;
                        children.push(ParsedChild::Node {
                            node,
                            via: via.clone(),
                        });
                    } else {
                        let token = SentinelToken::indented(
                            SentinelKind::NodeOpen {
                                gnx,
                                level,
                                headline,
                            },
                            token.indent,
                        );
                        match self.misfit_open(token, number, text, child_level)? {
                            Misfit::Unwind => break,
                            Misfit::Adopted(node) => children.push(ParsedChild::Node {
                                node,
                                via: via.clone(),
                            }),
                            Misfit::Failed(child) => children.push(child),
                        }
                    }
                }
                SentinelKind::Verbatim => {
                    if let Some(text) = self.next_raw_line() {
                        self.stray_content(&mut children, number + 1, text, indent);
                    }
                }
                ref kind if is_close(kind) => {
                    if self.mismatched_close(token, number, text) {
                        break;
                    }
                }
                other => {
                    self.diagnostic(
                        DiagnosticKind::MisplacedSentinel,
                        number,
                        format!("{} between sibling nodes is ignored", other),
                    );
                }
            }
        }

        self.frames.pop();
        Ok(children)
    }

    /// Content between sibling brackets belongs to the preceding sibling
    fn stray_content(&mut self, children: &mut [ParsedChild], number: usize, text: &str, indent: &str) {
        let line = self.strip(text, indent);
        match children.last_mut() {
            Some(ParsedChild::Node { node, .. }) => node.body.push(line),
            _ => self.diagnostic(
                DiagnosticKind::MisplacedSentinel,
                number,
                "content before the first node of a bracket is ignored",
            ),
        }
    }
}

fn is_close(kind: &SentinelKind) -> bool {
    matches!(
        kind,
        SentinelKind::NodeClose
            | SentinelKind::OthersClose { .. }
            | SentinelKind::AllClose
            | SentinelKind::SectionRefClose(_)
            | SentinelKind::FileClose
    )
}
