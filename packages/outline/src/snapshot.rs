use crate::error::OutlineResult;
use crate::gnx::Gnx;
use crate::outline::{NodeId, Outline};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content checksum of a node: crc32 over headline, a NUL separator, and the
/// body lines joined with `\n`.
pub fn content_checksum(headline: &str, body: &[String]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(headline.as_bytes());
    hasher.update(&[0]);
    for (i, line) in body.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(line.as_bytes());
    }
    hasher.finalize()
}

/// Per-node checksums and child order of a subtree, taken at a sync point.
///
/// Comparing a snapshot against the live outline (and against freshly read
/// file content) tells which side changed since the last sync. Child order
/// is kept so moving a node counts as a change even when no content did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    checksums: BTreeMap<Gnx, u32>,
    #[serde(default)]
    children: BTreeMap<Gnx, Vec<Gnx>>,
}

impl Snapshot {
    pub fn capture(outline: &Outline, root: NodeId) -> OutlineResult<Self> {
        let mut checksums = BTreeMap::new();
        let mut children = BTreeMap::new();
        for id in outline.subtree(root)? {
            let node = outline.node(id)?;
            let order = node
                .children()
                .iter()
                .map(|child| outline.node(*child).map(|c| c.gnx().clone()))
                .collect::<OutlineResult<Vec<_>>>()?;
            checksums.insert(node.gnx().clone(), node.checksum());
            if !order.is_empty() {
                children.insert(node.gnx().clone(), order);
            }
        }
        Ok(Self {
            checksums,
            children,
        })
    }

    pub fn insert(&mut self, gnx: Gnx, checksum: u32) {
        self.checksums.insert(gnx, checksum);
    }

    pub fn get(&self, gnx: &Gnx) -> Option<u32> {
        self.checksums.get(gnx).copied()
    }

    /// Child gnxs of a node in outline order
    pub fn children(&self, gnx: &Gnx) -> &[Gnx] {
        self.children.get(gnx).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.checksums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checksums.is_empty()
    }

    /// Did the node's content change since the snapshot? Unknown nodes count
    /// as changed.
    pub fn changed(&self, gnx: &Gnx, checksum: u32) -> bool {
        self.get(gnx) != Some(checksum)
    }

    /// Has any content or child order in the subtree changed since the
    /// snapshot was taken?
    pub fn outline_changed(&self, outline: &Outline, root: NodeId) -> OutlineResult<bool> {
        Ok(Self::capture(outline, root)? != *self)
    }
}
