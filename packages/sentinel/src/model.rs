use crate::delims::LanguageSpec;
use crate::diagnostics::Diagnostic;
use crate::grammar::Header;
use trellis_outline::{content_checksum, Gnx};

/// How a parsed child was placed inside its parent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placement {
    Others,
    All,
    SectionRef(String),
}

/// A node as recovered from a derived file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNode {
    pub gnx: Gnx,
    pub headline: String,
    pub level: usize,
    /// 1-based line of the `@+node` sentinel
    pub line: usize,
    pub body: Vec<String>,
    pub children: Vec<ParsedChild>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChild {
    Node { node: ParsedNode, via: Placement },
    /// A bracket skipped because its level did not fit
    Failed {
        gnx: Gnx,
        headline: String,
        level: usize,
        line: usize,
    },
}

impl ParsedNode {
    pub fn new(gnx: Gnx, headline: String, level: usize, line: usize) -> Self {
        Self {
            gnx,
            headline,
            level,
            line,
            body: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn checksum(&self) -> u32 {
        content_checksum(&self.headline, &self.body)
    }

    pub fn body_text(&self) -> String {
        self.body.join("\n")
    }

    /// Successfully parsed children with their placement
    pub fn child_nodes(&self) -> impl Iterator<Item = (&ParsedNode, &Placement)> {
        self.children.iter().filter_map(|child| match child {
            ParsedChild::Node { node, via } => Some((node, via)),
            ParsedChild::Failed { .. } => None,
        })
    }

    /// Children expanded from a `<<name>>` reference in this node's body
    pub fn section_definitions(&self) -> Vec<(&str, &ParsedNode)> {
        self.child_nodes()
            .filter_map(|(node, via)| match via {
                Placement::SectionRef(name) => Some((name.as_str(), node)),
                _ => None,
            })
            .collect()
    }

    /// Every parsed node of the subtree in file order, clones included
    pub fn walk(&self) -> Vec<&ParsedNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            let children: Vec<&ParsedNode> = node.child_nodes().map(|(n, _)| n).collect();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    pub fn find(&self, gnx: &Gnx) -> Option<&ParsedNode> {
        self.walk().into_iter().find(|node| &node.gnx == gnx)
    }
}

/// A bracket the scanner repaired inside one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub gnx: Gnx,
    pub line: usize,
    pub message: String,
    /// The node was closed without its own close sentinel, so its body and
    /// children may be cut short
    pub truncated: bool,
}

/// Structural result of parsing one derived file
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFileModel {
    pub header: Header,
    /// Language from the `@@language` header pragma, else the caller's hint
    pub language: LanguageSpec,
    pub tab_width: i32,
    pub page_width: usize,
    pub root: ParsedNode,
    /// Lines before the header
    pub first_lines: Vec<String>,
    /// Lines after `@-leo`
    pub last_lines: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub repairs: Vec<Repair>,
}

impl DerivedFileModel {
    pub fn nodes(&self) -> Vec<&ParsedNode> {
        self.root.walk()
    }

    pub fn find(&self, gnx: &Gnx) -> Option<&ParsedNode> {
        self.root.find(gnx)
    }
}
