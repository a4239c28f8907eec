//! # Line Grammar
//!
//! Classifies a single line of a derived file as content or sentinel, and
//! encodes sentinel tokens back into lines.
//!
//! A sentinel line is optional leading whitespace, the sentinel open
//! delimiter, `@`, a payload and (block-comment languages only) the close
//! delimiter at the end of the line. The first token of the payload is lexed
//! with logos; the remainder is parsed by hand per token kind.

use crate::delims::SentinelDelims;
use logos::Logos;
use std::fmt;
use trellis_outline::Gnx;

/// First token of a sentinel payload
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum Head {
    #[token("+leo")]
    LeoOpen,

    #[token("-leo")]
    LeoClose,

    #[token("+node")]
    NodeOpen,

    #[token("-node")]
    NodeClose,

    #[token("+others")]
    OthersOpen,

    #[token("-others")]
    OthersClose,

    #[token("+others-implicit")]
    ImplicitOthersOpen,

    #[token("-others-implicit")]
    ImplicitOthersClose,

    #[token("+all")]
    AllOpen,

    #[token("-all")]
    AllClose,

    #[token("+<<")]
    SectionOpen,

    #[token("-<<")]
    SectionClose,

    #[token("+at")]
    DocAt,

    #[token("+doc")]
    DocDoc,

    #[token("@")]
    Directive,

    #[token("verbatim")]
    Verbatim,

    #[token("afterref")]
    AfterRef,
}

/// Which directive started a doc part: `@` or `@doc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocKind {
    At,
    Doc,
}

impl DocKind {
    pub fn directive(self) -> &'static str {
        match self {
            DocKind::At => "@",
            DocKind::Doc => "@doc",
        }
    }
}

/// Format version carried by the `@+leo` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatVersion {
    pub version: u32,
    pub thin: bool,
    pub encoding: Option<String>,
}

impl FormatVersion {
    pub fn current() -> Self {
        Self {
            version: 5,
            thin: true,
            encoding: None,
        }
    }

    fn payload(&self) -> String {
        let mut out = format!("+leo-ver={}", self.version);
        if self.thin {
            out.push_str("-thin");
        }
        if let Some(encoding) = &self.encoding {
            out.push_str(&format!("-encoding={},.", encoding));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentinelKind {
    VersionMarker(FormatVersion),
    FileClose,
    NodeOpen {
        gnx: Gnx,
        level: usize,
        headline: String,
    },
    NodeClose,
    /// `implicit` brackets are supplied by the writer for bodies without an
    /// `@others` line
    OthersOpen {
        implicit: bool,
    },
    OthersClose {
        implicit: bool,
    },
    AllOpen,
    AllClose,
    SectionRefOpen(String),
    SectionRefClose(String),
    AfterRef,
    Verbatim,
    DocStart {
        kind: DocKind,
        follow: String,
    },
    /// A body directive line `@<name><value>`; `value` keeps its leading
    /// whitespace so the line can be rebuilt exactly
    Pragma {
        name: String,
        value: String,
    },
}

impl SentinelKind {
    pub fn pragma(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Pragma {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Payload text following the `@` of the sentinel
    pub fn payload(&self) -> String {
        match self {
            SentinelKind::VersionMarker(version) => version.payload(),
            SentinelKind::FileClose => "-leo".to_string(),
            SentinelKind::NodeOpen {
                gnx,
                level,
                headline,
            } => format!("+node:{}: {} {}", gnx, "*".repeat(*level), headline),
            SentinelKind::NodeClose => "-node".to_string(),
            SentinelKind::OthersOpen { implicit: false } => "+others".to_string(),
            SentinelKind::OthersOpen { implicit: true } => "+others-implicit".to_string(),
            SentinelKind::OthersClose { implicit: false } => "-others".to_string(),
            SentinelKind::OthersClose { implicit: true } => "-others-implicit".to_string(),
            SentinelKind::AllOpen => "+all".to_string(),
            SentinelKind::AllClose => "-all".to_string(),
            SentinelKind::SectionRefOpen(name) => format!("+<<{}>>", name),
            SentinelKind::SectionRefClose(name) => format!("-<<{}>>", name),
            SentinelKind::AfterRef => "afterref".to_string(),
            SentinelKind::Verbatim => "verbatim".to_string(),
            SentinelKind::DocStart {
                kind: DocKind::At,
                follow,
            } => format!("+at{}", follow),
            SentinelKind::DocStart {
                kind: DocKind::Doc,
                follow,
            } => format!("+doc{}", follow),
            SentinelKind::Pragma { name, value } => format!("@{}{}", name, value),
        }
    }
}

impl fmt::Display for SentinelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.payload())
    }
}

/// One parsed sentinel line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelToken {
    pub kind: SentinelKind,
    /// Leading whitespace of the line
    pub indent: String,
}

impl SentinelToken {
    pub fn new(kind: SentinelKind) -> Self {
        Self {
            kind,
            indent: String::new(),
        }
    }

    pub fn indented(kind: SentinelKind, indent: impl Into<String>) -> Self {
        Self {
            kind,
            indent: indent.into(),
        }
    }

    pub fn encode(&self, delims: &SentinelDelims) -> String {
        format!(
            "{}{}@{}{}",
            self.indent,
            delims.open,
            self.kind.payload(),
            delims.close
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    Content,
    Sentinel(SentinelToken),
    /// Looks like a sentinel but the payload does not parse
    Malformed(String),
}

/// Split a sentinel candidate into (indent, payload)
fn candidate<'a>(line: &'a str, delims: &SentinelDelims) -> Option<(&'a str, &'a str)> {
    let body = line.trim_start_matches([' ', '\t']);
    let indent = &line[..line.len() - body.len()];
    let rest = body.strip_prefix(delims.open.as_str())?.strip_prefix('@')?;
    if delims.is_block() {
        let payload = rest.trim_end().strip_suffix(delims.close.as_str())?;
        Some((indent, payload))
    } else {
        Some((indent, rest))
    }
}

/// Would the reader treat this line as a sentinel (well-formed or not)?
pub fn is_sentinel_candidate(line: &str, delims: &SentinelDelims) -> bool {
    candidate(line, delims).is_some()
}

pub fn classify(line: &str, delims: &SentinelDelims) -> LineClass {
    let Some((indent, payload)) = candidate(line, delims) else {
        return LineClass::Content;
    };
    match parse_payload(payload) {
        Ok(kind) => LineClass::Sentinel(SentinelToken::indented(kind, indent)),
        Err(message) => LineClass::Malformed(message),
    }
}

fn parse_payload(payload: &str) -> Result<SentinelKind, String> {
    let mut lexer = Head::lexer(payload);
    let head = match lexer.next() {
        Some(Ok(head)) => head,
        _ => return Err(format!("unknown sentinel @{}", payload)),
    };
    let rest = lexer.remainder();

    match head {
        Head::LeoOpen => {
            let (version, tail) = parse_version(rest)?;
            expect_end(tail, SentinelKind::VersionMarker(version))
        }
        Head::LeoClose => expect_end(rest, SentinelKind::FileClose),
        Head::NodeOpen => parse_node_open(rest),
        Head::NodeClose => expect_end(rest, SentinelKind::NodeClose),
        Head::OthersOpen => expect_end(rest, SentinelKind::OthersOpen { implicit: false }),
        Head::OthersClose => expect_end(rest, SentinelKind::OthersClose { implicit: false }),
        Head::ImplicitOthersOpen => expect_end(rest, SentinelKind::OthersOpen { implicit: true }),
        Head::ImplicitOthersClose => {
            expect_end(rest, SentinelKind::OthersClose { implicit: true })
        }
        Head::AllOpen => expect_end(rest, SentinelKind::AllOpen),
        Head::AllClose => expect_end(rest, SentinelKind::AllClose),
        Head::SectionOpen => parse_section_name(rest).map(SentinelKind::SectionRefOpen),
        Head::SectionClose => parse_section_name(rest).map(SentinelKind::SectionRefClose),
        Head::DocAt => parse_doc(DocKind::At, rest),
        Head::DocDoc => parse_doc(DocKind::Doc, rest),
        Head::Directive => parse_pragma(rest),
        Head::Verbatim => expect_end(rest, SentinelKind::Verbatim),
        Head::AfterRef => expect_end(rest, SentinelKind::AfterRef),
    }
}

fn expect_end(rest: &str, kind: SentinelKind) -> Result<SentinelKind, String> {
    if rest.trim().is_empty() {
        Ok(kind)
    } else {
        Err(format!("unexpected text after {}: {:?}", kind, rest))
    }
}

/// Parse `-ver=N[-thin][-encoding=E,.]`, returning the unparsed tail
fn parse_version(s: &str) -> Result<(FormatVersion, &str), String> {
    let s = s
        .strip_prefix("-ver=")
        .ok_or_else(|| "header without -ver=".to_string())?;
    let digits = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let version: u32 = s[..digits]
        .parse()
        .map_err(|_| format!("bad version number {:?}", &s[..digits]))?;
    let mut s = &s[digits..];

    let thin = match s.strip_prefix("-thin") {
        Some(rest) => {
            s = rest;
            true
        }
        None => false,
    };

    let mut encoding = None;
    if let Some(rest) = s.strip_prefix("-encoding=") {
        let end = rest
            .find(",.")
            .ok_or_else(|| "unterminated -encoding= in header".to_string())?;
        encoding = Some(rest[..end].to_string());
        s = &rest[end + 2..];
    }

    Ok((
        FormatVersion {
            version,
            thin,
            encoding,
        },
        s,
    ))
}

/// Parse `:<gnx>: <level> <headline>`
fn parse_node_open(rest: &str) -> Result<SentinelKind, String> {
    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| "expected ':' after +node".to_string())?;
    let (gnx, rest) = rest
        .split_once(':')
        .ok_or_else(|| "expected ':' after gnx".to_string())?;
    let gnx = Gnx::new(gnx).map_err(|e| e.to_string())?;
    let rest = rest
        .strip_prefix(' ')
        .ok_or_else(|| "expected ' ' before level".to_string())?;
    let (level, rest) = parse_level(rest)?;
    let headline = if rest.is_empty() {
        rest
    } else {
        rest.strip_prefix(' ')
            .ok_or_else(|| "expected ' ' before headline".to_string())?
    };
    Ok(SentinelKind::NodeOpen {
        gnx,
        level,
        headline: headline.to_string(),
    })
}

/// `***` or `*N*`
fn parse_level(s: &str) -> Result<(usize, &str), String> {
    let Some(after_star) = s.strip_prefix('*') else {
        return Err("missing level marker".to_string());
    };
    if after_star.starts_with(|c: char| c.is_ascii_digit()) {
        let end = after_star
            .find('*')
            .ok_or_else(|| "unterminated *N* level".to_string())?;
        let level: usize = after_star[..end]
            .parse()
            .map_err(|_| format!("bad level {:?}", &after_star[..end]))?;
        if level == 0 {
            return Err("level must be at least 1".to_string());
        }
        return Ok((level, &after_star[end + 1..]));
    }
    let stars = s.len() - s.trim_start_matches('*').len();
    Ok((stars, &s[stars..]))
}

fn parse_section_name(rest: &str) -> Result<String, String> {
    let end = rest
        .find(">>")
        .ok_or_else(|| "section sentinel without >>".to_string())?;
    let name = &rest[..end];
    if name.is_empty() {
        return Err("empty section name".to_string());
    }
    if !rest[end + 2..].trim().is_empty() {
        return Err(format!("unexpected text after <<{}>>", name));
    }
    Ok(name.to_string())
}

fn parse_doc(kind: DocKind, rest: &str) -> Result<SentinelKind, String> {
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return Err(format!("unexpected text after doc sentinel: {:?}", rest));
    }
    Ok(SentinelKind::DocStart {
        kind,
        follow: rest.to_string(),
    })
}

fn parse_pragma(rest: &str) -> Result<SentinelKind, String> {
    let end = rest
        .find(|c: char| c.is_whitespace())
        .unwrap_or(rest.len());
    if end == 0 {
        return Err("empty directive name".to_string());
    }
    Ok(SentinelKind::pragma(&rest[..end], &rest[end..]))
}

/// Header line: `<open>@+leo-ver=5-thin<close>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: FormatVersion,
    pub delims: SentinelDelims,
}

impl Header {
    pub fn new(delims: SentinelDelims) -> Self {
        Self {
            version: FormatVersion::current(),
            delims,
        }
    }

    /// Parse a header line. `None` if the line carries no `@+leo` marker.
    pub fn parse(line: &str) -> Option<Result<Self, String>> {
        let at = line.find("@+leo-ver=")?;
        let open = line[..at].trim_start();
        if open.is_empty() {
            return Some(Err("header has no comment delimiter".to_string()));
        }
        let result = parse_version(&line[at + "@+leo".len()..]).map(|(version, tail)| Self {
            version,
            delims: SentinelDelims::new(open, tail.trim()),
        });
        Some(result)
    }

    pub fn encode(&self) -> String {
        SentinelToken::new(SentinelKind::VersionMarker(self.version.clone())).encode(&self.delims)
    }
}
