use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Index is full at {max_item_count} items, resize before inserting")]
    CapacityExceeded { max_item_count: usize },
    #[error("Index dimension is [{expected}], input dimension of [{found}] was specified")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Item already exists with a different vector and updates are disabled")]
    UpdateDisabled,
    #[error("Cannot resize to {requested} items, {node_count} nodes are already allocated")]
    InvalidCapacity { requested: usize, node_count: usize },
    #[error("Invalid index configuration: {0}")]
    InvalidConfig(String),
    #[error("Could not spawn indexing worker: {0}")]
    ThreadSpawn(String),
    #[error("An indexing worker panicked")]
    WorkerPanicked,
}
