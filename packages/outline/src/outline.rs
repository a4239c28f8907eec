//! # Outline Arena
//!
//! Nodes live in a flat arena and are addressed by [`NodeId`]. A node may be
//! referenced from several parents at once (a clone): every reference points
//! at the same arena slot, so headline and body edits are visible from every
//! position.
//!
//! ## Ownership
//!
//! - Top-level roots are owned by the outline itself
//! - Every other node is kept alive by its parent references
//! - Removing the last parent reference destroys the node, and recursively
//!   any descendant that thereby loses its last reference

use crate::error::{OutlineError, OutlineResult};
use crate::gnx::Gnx;
use crate::snapshot::content_checksum;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Index of a node in the outline arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Shared node data (one per gnx)
#[derive(Debug, Clone, PartialEq)]
pub struct VNode {
    gnx: Gnx,
    headline: String,
    body: Vec<String>,
    children: Vec<NodeId>,
    /// One entry per child reference pointing at this node
    parents: Vec<NodeId>,
    is_root: bool,
}

impl VNode {
    pub fn gnx(&self) -> &Gnx {
        &self.gnx
    }

    pub fn headline(&self) -> &str {
        &self.headline
    }

    pub fn body(&self) -> &[String] {
        &self.body
    }

    pub fn body_text(&self) -> String {
        self.body.join("\n")
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// True if more than one position shows this node
    pub fn is_cloned(&self) -> bool {
        self.parents.len() + usize::from(self.is_root) > 1
    }

    pub fn checksum(&self) -> u32 {
        content_checksum(&self.headline, &self.body)
    }
}

/// Split body text into lines.
///
/// A single trailing newline does not produce a trailing empty line and a
/// `\r` before `\n` is dropped.
pub fn split_body(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Outline {
    nodes: Vec<Option<VNode>>,
    by_gnx: HashMap<Gnx, NodeId>,
    roots: Vec<NodeId>,
}

impl Outline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.by_gnx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gnx.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Create a detached node. It must be attached with [`Outline::insert_child`]
    /// before its first removal can destroy it.
    pub fn new_node(
        &mut self,
        gnx: Gnx,
        headline: impl Into<String>,
        body: Vec<String>,
    ) -> OutlineResult<NodeId> {
        if self.by_gnx.contains_key(&gnx) {
            return Err(OutlineError::DuplicateGnx(gnx.to_string()));
        }
        let id = NodeId(self.nodes.len());
        trace!(gnx = %gnx, id = id.0, "Creating node");
        self.by_gnx.insert(gnx.clone(), id);
        self.nodes.push(Some(VNode {
            gnx,
            headline: single_line(headline.into()),
            body,
            children: Vec::new(),
            parents: Vec::new(),
            is_root: false,
        }));
        Ok(id)
    }

    /// Create a top-level node owned by the outline
    pub fn add_root(
        &mut self,
        gnx: Gnx,
        headline: impl Into<String>,
        body: Vec<String>,
    ) -> OutlineResult<NodeId> {
        let id = self.new_node(gnx, headline, body)?;
        self.vnode_mut(id)?.is_root = true;
        self.roots.push(id);
        Ok(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0), Some(Some(_)))
    }

    pub fn node(&self, id: NodeId) -> OutlineResult<&VNode> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(OutlineError::NodeNotFound(id))
    }

    fn vnode_mut(&mut self, id: NodeId) -> OutlineResult<&mut VNode> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(OutlineError::NodeNotFound(id))
    }

    pub fn find(&self, gnx: &Gnx) -> Option<NodeId> {
        self.by_gnx.get(gnx).copied()
    }

    pub fn children(&self, id: NodeId) -> OutlineResult<&[NodeId]> {
        Ok(&self.node(id)?.children)
    }

    pub fn set_headline(&mut self, id: NodeId, headline: impl Into<String>) -> OutlineResult<()> {
        self.vnode_mut(id)?.headline = single_line(headline.into());
        Ok(())
    }

    pub fn set_body(&mut self, id: NodeId, body: Vec<String>) -> OutlineResult<()> {
        self.vnode_mut(id)?.body = body;
        Ok(())
    }

    pub fn set_body_text(&mut self, id: NodeId, text: &str) -> OutlineResult<()> {
        self.set_body(id, split_body(text))
    }

    /// Is `ancestor` above `id` through any chain of parent references?
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = match self.node(id) {
            Ok(node) => node.parents.clone(),
            Err(_) => return false,
        };
        while let Some(parent) = stack.pop() {
            if parent == ancestor {
                return true;
            }
            if seen.insert(parent) {
                if let Ok(node) = self.node(parent) {
                    stack.extend(node.parents.iter().copied());
                }
            }
        }
        false
    }

    fn check_link(&self, parent: NodeId, child: NodeId) -> OutlineResult<()> {
        self.node(parent)?;
        self.node(child)?;
        if parent == child || self.is_ancestor(child, parent) {
            return Err(OutlineError::Cycle { parent, child });
        }
        Ok(())
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> OutlineResult<()> {
        self.check_link(parent, child)?;
        let len = self.node(parent)?.children.len();
        if index > len {
            return Err(OutlineError::BadChildIndex { parent, index });
        }
        self.vnode_mut(parent)?.children.insert(index, child);
        self.vnode_mut(child)?.parents.push(parent);
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> OutlineResult<()> {
        let len = self.node(parent)?.children.len();
        self.insert_child(parent, len, child)
    }

    /// Remove the child reference at `index`, destroying the child if that
    /// was its last reference.
    pub fn remove_child(&mut self, parent: NodeId, index: usize) -> OutlineResult<NodeId> {
        let children = &mut self.vnode_mut(parent)?.children;
        if index >= children.len() {
            return Err(OutlineError::BadChildIndex { parent, index });
        }
        let child = children.remove(index);
        self.unlink_parent(child, parent)?;
        self.destroy_if_unreferenced(child)?;
        Ok(child)
    }

    /// Replace the whole child list of `parent`.
    ///
    /// Parent references are adjusted for the difference; children that lose
    /// their last reference are destroyed.
    pub fn set_children(&mut self, parent: NodeId, children: Vec<NodeId>) -> OutlineResult<()> {
        let old = self.node(parent)?.children.clone();
        let mut old_counts: HashMap<NodeId, usize> = HashMap::new();
        for id in &old {
            *old_counts.entry(*id).or_default() += 1;
        }
        let mut new_counts: HashMap<NodeId, usize> = HashMap::new();
        for id in &children {
            if !old_counts.contains_key(id) {
                self.check_link(parent, *id)?;
            }
            *new_counts.entry(*id).or_default() += 1;
        }

        self.vnode_mut(parent)?.children = children;

        for (id, count) in &new_counts {
            let before = old_counts.get(id).copied().unwrap_or(0);
            for _ in before..*count {
                self.vnode_mut(*id)?.parents.push(parent);
            }
        }
        let mut released = Vec::new();
        for (id, count) in &old_counts {
            let after = new_counts.get(id).copied().unwrap_or(0);
            for _ in after..*count {
                self.unlink_parent(*id, parent)?;
            }
            if after == 0 {
                released.push(*id);
            }
        }
        released.sort();
        for id in released {
            self.destroy_if_unreferenced(id)?;
        }
        Ok(())
    }

    fn unlink_parent(&mut self, child: NodeId, parent: NodeId) -> OutlineResult<()> {
        let parents = &mut self.vnode_mut(child)?.parents;
        if let Some(pos) = parents.iter().position(|p| *p == parent) {
            parents.remove(pos);
        }
        Ok(())
    }

    fn destroy_if_unreferenced(&mut self, id: NodeId) -> OutlineResult<()> {
        let node = self.node(id)?;
        if !node.parents.is_empty() || node.is_root {
            return Ok(());
        }
        let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) else {
            return Ok(());
        };
        trace!(gnx = %node.gnx, id = id.0, "Destroying node");
        self.by_gnx.remove(&node.gnx);
        for child in node.children {
            if self.contains(child) {
                self.unlink_parent(child, id)?;
                self.destroy_if_unreferenced(child)?;
            }
        }
        Ok(())
    }

    /// All distinct nodes of the subtree rooted at `root`, in pre-order
    pub fn subtree(&self, root: NodeId) -> OutlineResult<Vec<NodeId>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            let node = self.node(id)?;
            stack.extend(node.children.iter().rev().copied());
        }
        Ok(order)
    }
}

fn single_line(text: String) -> String {
    if text.contains(['\n', '\r']) {
        text.replace("\r\n", " ").replace(['\n', '\r'], " ")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gnx(s: &str) -> Gnx {
        Gnx::new(s).unwrap()
    }

    #[test]
    fn test_split_body() {
        assert!(split_body("").is_empty());
        assert_eq!(split_body("a\nb"), vec!["a", "b"]);
        assert_eq!(split_body("a\nb\n"), vec!["a", "b"]);
        assert_eq!(split_body("a\r\n\nb"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_clone_shares_content() {
        let mut outline = Outline::new();
        let root = outline.add_root(gnx("r"), "root", vec![]).unwrap();
        let a = outline.new_node(gnx("a"), "a", vec![]).unwrap();
        let b = outline.new_node(gnx("b"), "b", vec![]).unwrap();
        let shared = outline.new_node(gnx("s"), "shared", vec![]).unwrap();
        outline.append_child(root, a).unwrap();
        outline.append_child(root, b).unwrap();
        outline.append_child(a, shared).unwrap();
        outline.append_child(b, shared).unwrap();

        outline.set_body_text(shared, "x = 1").unwrap();
        let via_b = outline.children(b).unwrap()[0];
        assert_eq!(outline.node(via_b).unwrap().body(), ["x = 1"]);
        assert!(outline.node(shared).unwrap().is_cloned());
    }

    #[test]
    fn test_cycle_rejected() {
        let mut outline = Outline::new();
        let root = outline.add_root(gnx("r"), "root", vec![]).unwrap();
        let a = outline.new_node(gnx("a"), "a", vec![]).unwrap();
        outline.append_child(root, a).unwrap();

        let err = outline.append_child(a, root).unwrap_err();
        assert!(matches!(err, OutlineError::Cycle { .. }));
        assert!(outline.append_child(a, a).is_err());
    }

    #[test]
    fn test_remove_last_reference_destroys_subtree() {
        let mut outline = Outline::new();
        let root = outline.add_root(gnx("r"), "root", vec![]).unwrap();
        let a = outline.new_node(gnx("a"), "a", vec![]).unwrap();
        let b = outline.new_node(gnx("b"), "b", vec![]).unwrap();
        outline.append_child(root, a).unwrap();
        outline.append_child(a, b).unwrap();

        outline.remove_child(root, 0).unwrap();
        assert!(outline.find(&gnx("a")).is_none());
        assert!(outline.find(&gnx("b")).is_none());
        assert_eq!(outline.len(), 1);
    }

    #[test]
    fn test_remove_one_clone_keeps_node() {
        let mut outline = Outline::new();
        let root = outline.add_root(gnx("r"), "root", vec![]).unwrap();
        let a = outline.new_node(gnx("a"), "a", vec![]).unwrap();
        outline.append_child(root, a).unwrap();
        outline.append_child(root, a).unwrap();

        outline.remove_child(root, 1).unwrap();
        assert_eq!(outline.find(&gnx("a")), Some(a));
        assert_eq!(outline.node(a).unwrap().parents(), [root]);
    }

    #[test]
    fn test_set_children_reorders_and_releases() {
        let mut outline = Outline::new();
        let root = outline.add_root(gnx("r"), "root", vec![]).unwrap();
        let ids: Vec<NodeId> = ["a", "b", "c"]
            .iter()
            .map(|g| {
                let id = outline.new_node(gnx(g), *g, vec![]).unwrap();
                outline.append_child(root, id).unwrap();
                id
            })
            .collect();

        outline.set_children(root, vec![ids[2], ids[0]]).unwrap();
        assert_eq!(outline.children(root).unwrap(), [ids[2], ids[0]]);
        assert!(!outline.contains(ids[1]));
        assert_eq!(outline.node(ids[0]).unwrap().parents(), [root]);
    }

    #[test]
    fn test_subtree_visits_clones_once() {
        let mut outline = Outline::new();
        let root = outline.add_root(gnx("r"), "root", vec![]).unwrap();
        let a = outline.new_node(gnx("a"), "a", vec![]).unwrap();
        outline.append_child(root, a).unwrap();
        outline.append_child(root, a).unwrap();
        assert_eq!(outline.subtree(root).unwrap(), vec![root, a]);
    }

    #[test]
    fn test_headline_kept_single_line() {
        let mut outline = Outline::new();
        let root = outline.add_root(gnx("r"), "one\ntwo", vec![]).unwrap();
        assert_eq!(outline.node(root).unwrap().headline(), "one two");
    }
}
