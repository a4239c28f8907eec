use crate::outline::NodeId;

/// A path from a top-level node down to one occurrence of a node.
///
/// The same node can appear at several positions when it is cloned; a
/// position names exactly one of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    path: Vec<NodeId>,
}

impl Position {
    pub fn root(id: NodeId) -> Self {
        Self { path: vec![id] }
    }

    pub fn from_path(path: Vec<NodeId>) -> Option<Self> {
        if path.is_empty() {
            None
        } else {
            Some(Self { path })
        }
    }

    pub fn node(&self) -> NodeId {
        self.path[self.path.len() - 1]
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.path.len().checked_sub(2).map(|i| self.path[i])
    }

    /// Ancestors, nearest first, excluding the node itself
    pub fn ancestors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.path.iter().rev().skip(1).copied()
    }

    /// Depth of the position, 1 for the starting node
    pub fn level(&self) -> usize {
        self.path.len()
    }

    pub fn child(&self, id: NodeId) -> Self {
        let mut path = self.path.clone();
        path.push(id);
        Self { path }
    }

    /// Is `id` already on the path (including the node itself)?
    pub fn contains(&self, id: NodeId) -> bool {
        self.path.contains(&id)
    }

    pub fn path(&self) -> &[NodeId] {
        &self.path
    }
}
