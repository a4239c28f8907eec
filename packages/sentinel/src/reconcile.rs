//! # Reconciler
//!
//! Merges a parsed [`DerivedFileModel`] into the live outline by gnx.
//!
//! The whole merge is planned against an immutable view of the outline
//! first. Only a complete plan is applied, so a failed read never leaves the
//! outline half updated.
//!
//! ## Rules
//!
//! - The file's root maps to the known root
//! - A gnx known to the outline gets the file's headline and body
//! - A gnx unknown to the outline becomes a new node
//! - Child order follows the file. Live children the file says nothing about
//!   (orphans, skipped brackets) keep their slot
//! - Orphans are reported, never deleted
//! - A node whose brackets had to be repaired is a conflict. If it was
//!   closed early it keeps its live body and children, and the file may
//!   only add children to it

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::SentinelResult;
use crate::model::{DerivedFileModel, ParsedChild, ParsedNode, Placement, Repair};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use trellis_outline::{Gnx, NodeId, Outline, OutlineError, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The file's root gnx is not the known root's gnx
    RootMismatch,
    /// File and outline both changed a node since the last sync
    BothChanged,
    /// Occurrences of one clone disagree within the file
    CloneMismatch,
    /// A bracket was skipped while parsing
    UnparsedSubtree,
    /// Unbalanced brackets were repaired inside the node
    Repaired,
    /// Applying the file's structure would create a cycle
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralConflict {
    pub kind: ConflictKind,
    pub gnx: Option<Gnx>,
    /// 1-based line in the derived file, 0 when no line applies
    pub line: usize,
    pub message: String,
}

impl StructuralConflict {
    fn new(kind: ConflictKind, gnx: Option<Gnx>, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            gnx,
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub updated_nodes: Vec<Gnx>,
    pub new_nodes: Vec<Gnx>,
    pub orphaned_nodes: Vec<Gnx>,
    pub structural_conflicts: Vec<StructuralConflict>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ReconciliationResult {
    /// No conflicts and no error diagnostics
    pub fn is_clean(&self) -> bool {
        self.structural_conflicts.is_empty() && !self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Did the read change anything in the outline?
    pub fn has_changes(&self) -> bool {
        !self.updated_nodes.is_empty() || !self.new_nodes.is_empty()
    }
}

/// What the caller knows beyond the outline itself
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadContext<'a> {
    /// Checksums from the last sync, for detecting edits on both sides
    pub snapshot: Option<&'a Snapshot>,
    /// The root was not fully loaded; suppresses orphan reporting
    pub partial: bool,
}

/// Merge `model` into the subtree of `known_root`
pub fn reconcile(
    outline: &mut Outline,
    known_root: NodeId,
    model: &DerivedFileModel,
    ctx: &ReadContext<'_>,
) -> SentinelResult<ReconciliationResult> {
    let root_gnx = outline.node(known_root)?.gnx().clone();
    let (first, updates, created, orphans, children, conflicts) = {
        let mut plan = Plan::new(outline, known_root, root_gnx.clone());
        plan.collect(&model.root, &mut Vec::new())?;
        plan.note_repairs(&model.repairs);
        plan.plan_content(ctx)?;
        let orphans = plan.orphans(ctx)?;
        let children = plan.plan_children()?;
        (plan.first, plan.updates, plan.created, orphans, children, plan.conflicts)
    };

    let mut result = ReconciliationResult {
        diagnostics: model.diagnostics.clone(),
        ..Default::default()
    };
    if model.root.gnx != root_gnx {
        result.structural_conflicts.push(StructuralConflict::new(
            ConflictKind::RootMismatch,
            Some(model.root.gnx.clone()),
            model.root.line,
            format!("file root {} is read into {}", model.root.gnx, root_gnx),
        ));
    }
    result.structural_conflicts.extend(conflicts);

    for (id, gnx) in &updates {
        let parsed = first.get(gnx).copied().ok_or_else(|| missing(gnx))?;
        outline.set_headline(*id, parsed.headline.clone())?;
        outline.set_body(*id, parsed.body.clone())?;
        result.updated_nodes.push(gnx.clone());
    }
    for gnx in &created {
        let parsed = first.get(gnx).copied().ok_or_else(|| missing(gnx))?;
        outline.new_node(gnx.clone(), parsed.headline.clone(), parsed.body.clone())?;
        result.new_nodes.push(gnx.clone());
    }

    let conflicts = apply_children(outline, known_root, &children)?;
    result.structural_conflicts.extend(conflicts);

    for (gnx, line) in &orphans {
        result.diagnostics.push(Diagnostic::new(
            DiagnosticKind::OrphanedNode { gnx: gnx.clone() },
            *line,
            format!("{} is not in the file", gnx),
        ));
        result.orphaned_nodes.push(gnx.clone());
    }

    info!(
        root = %model.root.gnx,
        updated = result.updated_nodes.len(),
        new = result.new_nodes.len(),
        orphaned = result.orphaned_nodes.len(),
        conflicts = result.structural_conflicts.len(),
        "Reconciled derived file"
    );
    Ok(result)
}

fn missing(gnx: &Gnx) -> OutlineError {
    OutlineError::InvalidGnx(gnx.to_string())
}

/// Planned child list of one parent, by gnx
struct ChildPlan {
    /// `None` for the known root
    parent: Option<Gnx>,
    children: Vec<Gnx>,
}

struct Plan<'o, 'm> {
    outline: &'o Outline,
    known_root: NodeId,
    root_gnx: Gnx,
    /// First occurrence of every parsed gnx
    first: HashMap<Gnx, &'m ParsedNode>,
    /// Parsed gnx in file order
    order: Vec<Gnx>,
    /// Gnx of skipped brackets
    failed: HashSet<Gnx>,
    /// Gnx of nodes closed before their own `@-node`
    truncated: HashSet<Gnx>,
    /// (parent, child) links the file does not speak for
    kept: HashSet<(Gnx, Gnx)>,
    /// Section definitions expanded under their own parent
    sections: HashSet<(Gnx, Gnx)>,
    file_children: HashMap<Gnx, Vec<Gnx>>,
    updates: Vec<(NodeId, Gnx)>,
    created: Vec<Gnx>,
    conflicts: Vec<StructuralConflict>,
}

impl<'o, 'm> Plan<'o, 'm> {
    fn new(outline: &'o Outline, known_root: NodeId, root_gnx: Gnx) -> Self {
        Self {
            outline,
            known_root,
            root_gnx,
            first: HashMap::new(),
            order: Vec::new(),
            failed: HashSet::new(),
            truncated: HashSet::new(),
            kept: HashSet::new(),
            sections: HashSet::new(),
            file_children: HashMap::new(),
            updates: Vec::new(),
            created: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// Live node for a parsed gnx. The file root is always the known root.
    fn live(&self, gnx: &Gnx, is_root: bool) -> Option<NodeId> {
        if is_root {
            Some(self.known_root)
        } else {
            self.outline.find(gnx)
        }
    }

    /// Live node for a gnx of the file, mapping the file root
    fn live_of(&self, gnx: &Gnx) -> Option<NodeId> {
        self.live(gnx, self.order.first() == Some(gnx))
    }

    fn note_repairs(&mut self, repairs: &[Repair]) {
        let mut reported = HashSet::new();
        for repair in repairs {
            if repair.truncated {
                self.truncated.insert(repair.gnx.clone());
            }
            if reported.insert(repair.gnx.clone()) {
                self.conflicts.push(StructuralConflict::new(
                    ConflictKind::Repaired,
                    Some(repair.gnx.clone()),
                    repair.line,
                    format!("{}: {}", repair.gnx, repair.message),
                ));
            }
        }
    }

    fn collect(&mut self, node: &'m ParsedNode, ancestors: &mut Vec<&'m ParsedNode>) -> SentinelResult<()> {
        if let Some(first) = self.first.get(&node.gnx).copied() {
            if first.headline != node.headline
                || first.body != node.body
                || child_gnxs(first) != child_gnxs(node)
            {
                self.conflicts.push(StructuralConflict::new(
                    ConflictKind::CloneMismatch,
                    Some(node.gnx.clone()),
                    node.line,
                    format!(
                        "clone {} differs from its occurrence at line {}",
                        node.gnx, first.line
                    ),
                ));
            }
            return Ok(());
        }
        self.first.insert(node.gnx.clone(), node);
        self.order.push(node.gnx.clone());

        let mut file_children = Vec::new();
        for child in &node.children {
            match child {
                ParsedChild::Failed {
                    gnx, line, level, ..
                } => {
                    self.failed.insert(gnx.clone());
                    self.conflicts.push(StructuralConflict::new(
                        ConflictKind::UnparsedSubtree,
                        Some(gnx.clone()),
                        *line,
                        format!("node {} at level {} was not read", gnx, level),
                    ));
                }
                ParsedChild::Node {
                    node: child,
                    via: Placement::SectionRef(_),
                } => match self.defining_ancestor(node, child, ancestors)? {
                    Some(owner) => {
                        debug!(section = %child.gnx, owner = %owner, "Section defined by an ancestor");
                        self.kept.insert((owner, child.gnx.clone()));
                    }
                    None => {
                        self.sections.insert((node.gnx.clone(), child.gnx.clone()));
                        file_children.push(child.gnx.clone());
                    }
                },
                ParsedChild::Node { node: child, .. } => file_children.push(child.gnx.clone()),
            }
        }
        self.file_children.insert(node.gnx.clone(), file_children);

        ancestors.push(node);
        for (child, _) in node.child_nodes() {
            self.collect(child, ancestors)?;
        }
        ancestors.pop();
        Ok(())
    }

    /// The file ancestor that owns a section definition expanded under
    /// `parent`, when the live outline keeps it there instead of under
    /// `parent` itself.
    fn defining_ancestor(
        &self,
        parent: &ParsedNode,
        child: &ParsedNode,
        ancestors: &[&'m ParsedNode],
    ) -> SentinelResult<Option<Gnx>> {
        let Some(id) = self.outline.find(&child.gnx) else {
            return Ok(None);
        };
        let live_parents: HashSet<Gnx> = self
            .outline
            .node(id)?
            .parents()
            .iter()
            .map(|p| self.outline.node(*p).map(|n| n.gnx().clone()))
            .collect::<Result<_, _>>()?;
        if live_parents.contains(&self.live_parent_gnx(parent, ancestors)) {
            return Ok(None);
        }
        let owner = ancestors
            .iter()
            .enumerate()
            .rev()
            .find(|(index, ancestor)| {
                let live_gnx = if *index == 0 { &self.root_gnx } else { &ancestor.gnx };
                live_parents.contains(live_gnx)
            })
            .map(|(_, ancestor)| ancestor.gnx.clone());
        Ok(owner)
    }

    fn live_parent_gnx(&self, parent: &ParsedNode, ancestors: &[&'m ParsedNode]) -> Gnx {
        if ancestors.is_empty() {
            self.root_gnx.clone()
        } else {
            parent.gnx.clone()
        }
    }

    fn plan_content(&mut self, ctx: &ReadContext<'_>) -> SentinelResult<()> {
        for (index, gnx) in self.order.iter().enumerate() {
            let Some(parsed) = self.first.get(gnx).copied() else {
                continue;
            };
            let Some(id) = self.live(gnx, index == 0) else {
                self.created.push(gnx.clone());
                continue;
            };
            if self.truncated.contains(gnx) {
                debug!(gnx = %gnx, "Keeping live content of a node cut short");
                continue;
            }
            let live = self.outline.node(id)?;
            if live.headline() == parsed.headline && live.body() == parsed.body.as_slice() {
                continue;
            }
            if let Some(base) = ctx.snapshot.and_then(|s| s.get(live.gnx())) {
                if live.checksum() != base && parsed.checksum() != base {
                    self.conflicts.push(StructuralConflict::new(
                        ConflictKind::BothChanged,
                        Some(gnx.clone()),
                        parsed.line,
                        format!("{} changed in both the file and the outline", gnx),
                    ));
                    continue;
                }
            }
            self.updates.push((id, gnx.clone()));
        }
        Ok(())
    }

    /// Live nodes under the known root that the file does not mention, with
    /// the line of their nearest parsed ancestor
    fn orphans(&self, ctx: &ReadContext<'_>) -> SentinelResult<Vec<(Gnx, usize)>> {
        if ctx.partial {
            return Ok(Vec::new());
        }
        let mut shielded = HashSet::new();
        for gnx in self.failed.iter().chain(&self.truncated) {
            if let Some(id) = self.live_of(gnx) {
                shielded.extend(self.outline.subtree(id)?);
            }
        }

        let mut orphans = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![(self.known_root, 0)];
        while let Some((id, line)) = stack.pop() {
            if !seen.insert(id) || shielded.contains(&id) {
                continue;
            }
            let node = self.outline.node(id)?;
            let line = match self.first.get(node.gnx()) {
                Some(parsed) => parsed.line,
                None if id == self.known_root => line,
                None => {
                    orphans.push((node.gnx().clone(), line));
                    line
                }
            };
            stack.extend(node.children().iter().rev().map(|child| (*child, line)));
        }
        Ok(orphans)
    }

    /// Final child lists of every parsed node
    fn plan_children(&self) -> SentinelResult<Vec<ChildPlan>> {
        let mut plans = Vec::new();

        for (index, gnx) in self.order.iter().enumerate() {
            let parent = (index > 0).then(|| gnx.clone());
            let file_children = self.file_children.get(gnx).cloned().unwrap_or_default();
            let live_children: Vec<Gnx> = match self.live(gnx, index == 0) {
                Some(id) => self
                    .outline
                    .children(id)?
                    .iter()
                    .map(|c| self.outline.node(*c).map(|n| n.gnx().clone()))
                    .collect::<Result<_, _>>()?,
                None => Vec::new(),
            };

            if self.truncated.contains(gnx) {
                let mut children = live_children.clone();
                children.extend(
                    file_children
                        .iter()
                        .filter(|c| !live_children.contains(c))
                        .cloned(),
                );
                plans.push(ChildPlan { parent, children });
                continue;
            }

            // Children the file does not place here keep their live slot
            let pinned = |child: &Gnx| {
                let link = (gnx.clone(), child.clone());
                !self.first.contains_key(child)
                    || self.failed.contains(child)
                    || self.kept.contains(&link)
                    || (self.sections.contains(&link) && live_children.contains(child))
            };

            let mut queue = file_children.iter().filter(|c| !pinned(c)).cloned();
            let mut children = Vec::new();
            for child in &live_children {
                if pinned(child) {
                    children.push(child.clone());
                } else if let Some(next) = queue.next() {
                    children.push(next);
                }
            }
            children.extend(queue);
            plans.push(ChildPlan { parent, children });
        }
        Ok(plans)
    }
}

fn child_gnxs(node: &ParsedNode) -> Vec<&Gnx> {
    node.children
        .iter()
        .map(|child| match child {
            ParsedChild::Node { node, .. } => &node.gnx,
            ParsedChild::Failed { gnx, .. } => gnx,
        })
        .collect()
}

/// Apply planned child lists in two passes: first attach every new link,
/// then drop the stale ones, so a node moved between parents is never
/// without a parent in between.
fn apply_children(
    outline: &mut Outline,
    known_root: NodeId,
    plans: &[ChildPlan],
) -> SentinelResult<Vec<StructuralConflict>> {
    let mut conflicts = Vec::new();
    let mut resolved: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
    let mut unattached: HashSet<NodeId> = HashSet::new();

    for plan in plans {
        let parent = match &plan.parent {
            Some(gnx) => outline.find(gnx).ok_or_else(|| missing(gnx))?,
            None => known_root,
        };
        let mut wanted = Vec::with_capacity(plan.children.len());
        for gnx in &plan.children {
            wanted.push(outline.find(gnx).ok_or_else(|| missing(gnx))?);
        }

        let mut current = outline.children(parent)?.to_vec();
        let mut accepted = Vec::with_capacity(wanted.len());
        for child in wanted {
            if let Some(pos) = current.iter().position(|c| *c == child) {
                current.remove(pos);
                accepted.push(child);
                continue;
            }
            match outline.append_child(parent, child) {
                Ok(()) => accepted.push(child),
                Err(OutlineError::Cycle { .. }) => {
                    let gnx = outline.node(child)?.gnx().clone();
                    conflicts.push(StructuralConflict::new(
                        ConflictKind::Rejected,
                        Some(gnx.clone()),
                        0,
                        format!("{} cannot become a child of its own descendant", gnx),
                    ));
                    unattached.insert(child);
                }
                Err(e) => return Err(e.into()),
            }
        }
        resolved.push((parent, accepted));
    }

    for (parent, mut children) in resolved {
        for old in outline.children(parent)?.to_vec() {
            if unattached.contains(&old) && !children.contains(&old) {
                children.push(old);
            }
        }
        if outline.children(parent)? != children.as_slice() {
            outline.set_children(parent, children)?;
        }
    }
    Ok(conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delims::LanguageSpec;
    use crate::options::CodecOptions;
    use crate::reader::Reader;
    use crate::writer::Writer;

    fn gnx(s: &str) -> Gnx {
        Gnx::new(s).unwrap()
    }

    fn sample() -> (Outline, NodeId) {
        let mut outline = Outline::new();
        let root = outline
            .add_root(gnx("root"), "@file a.py", vec!["@others".to_string()])
            .unwrap();
        for name in ["a", "b", "c"] {
            let id = outline
                .new_node(gnx(name), name, vec![format!("{} = 1", name)])
                .unwrap();
            outline.append_child(root, id).unwrap();
        }
        (outline, root)
    }

    fn written(outline: &Outline, root: NodeId) -> String {
        let options = CodecOptions::default();
        let python = LanguageSpec::named("python").unwrap();
        Writer::new(outline, &options).write(root, &python).unwrap().text
    }

    fn merge(outline: &mut Outline, root: NodeId, text: &str, ctx: &ReadContext<'_>) -> ReconciliationResult {
        let options = CodecOptions::default();
        let model = Reader::new(&options).parse(text.as_bytes(), None).unwrap();
        reconcile(outline, root, &model, ctx).unwrap()
    }

    fn child_names(outline: &Outline, id: NodeId) -> Vec<String> {
        outline
            .children(id)
            .unwrap()
            .iter()
            .map(|c| outline.node(*c).unwrap().gnx().to_string())
            .collect()
    }

    #[test]
    fn test_round_trip_is_clean() {
        let (mut outline, root) = sample();
        let text = written(&outline, root);
        let result = merge(&mut outline, root, &text, &ReadContext::default());
        assert!(result.is_clean());
        assert!(!result.has_changes());
        assert!(result.orphaned_nodes.is_empty());
    }

    #[test]
    fn test_reorder_follows_file() {
        let (mut outline, root) = sample();
        let text = written(&outline, root);
        let a = "#@+node:a: ** a\na = 1\n#@-node\n";
        let c = "#@+node:c: ** c\nc = 1\n#@-node\n";
        let swapped = text.replace(a, "\u{0}").replace(c, a).replace('\u{0}', c);
        let result = merge(&mut outline, root, &swapped, &ReadContext::default());
        assert!(result.is_clean());
        assert_eq!(child_names(&outline, root), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_both_changed_is_a_conflict() {
        let (mut outline, root) = sample();
        let snapshot = Snapshot::capture(&outline, root).unwrap();
        let text = written(&outline, root).replace("b = 1", "b = 2");
        let b = outline.find(&gnx("b")).unwrap();
        outline.set_body(b, vec!["b = 3".to_string()]).unwrap();

        let ctx = ReadContext {
            snapshot: Some(&snapshot),
            partial: false,
        };
        let result = merge(&mut outline, root, &text, &ctx);
        assert_eq!(result.structural_conflicts.len(), 1);
        assert_eq!(result.structural_conflicts[0].kind, ConflictKind::BothChanged);
        assert!(result.updated_nodes.is_empty());
        assert_eq!(outline.node(b).unwrap().body(), ["b = 3"]);
    }

    #[test]
    fn test_partial_root_has_no_orphans() {
        let (mut outline, root) = sample();
        let text = written(&outline, root).replace("#@+node:b: ** b\nb = 1\n#@-node\n", "");
        let ctx = ReadContext {
            snapshot: None,
            partial: true,
        };
        let result = merge(&mut outline, root, &text, &ctx);
        assert!(result.orphaned_nodes.is_empty());
        assert_eq!(child_names(&outline, root), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_root_mismatch() {
        let (mut outline, root) = sample();
        let text = written(&outline, root).replace("#@+node:root:", "#@+node:other:");
        let result = merge(&mut outline, root, &text, &ReadContext::default());
        assert_eq!(result.structural_conflicts[0].kind, ConflictKind::RootMismatch);
        assert!(result.new_nodes.is_empty());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = ReconciliationResult {
            orphaned_nodes: vec![gnx("x")],
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["orphanedNodes"][0], "x");
        assert!(json["structuralConflicts"].as_array().unwrap().is_empty());
    }
}
