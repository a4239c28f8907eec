use crate::outline::NodeId;
use thiserror::Error;

pub type OutlineResult<T> = Result<T, OutlineError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutlineError {
    #[error("Invalid gnx: {0:?}")]
    InvalidGnx(String),

    #[error("Duplicate gnx: {0}")]
    DuplicateGnx(String),

    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    #[error("Child index {index} out of range for node {parent:?}")]
    BadChildIndex { parent: NodeId, index: usize },

    #[error("Inserting {child:?} under {parent:?} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
}
