use thiserror::Error;

/// Error kinds surfaced by kernel operations. Every stage returns a status
/// instead of panicking; a failed call leaves previously-valid state intact.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("unsupported geometry: {0}")]
    Shape(String),
    #[error("allocation failed: {0}")]
    Allocation(String),
    #[error("arithmetic precondition violated: {0}")]
    Precondition(String),
    #[error("parallel task {task_id} failed: {source}")]
    Task {
        task_id: usize,
        #[source]
        source: Box<KernelError>,
    },
}

impl KernelError {
    pub fn shape(msg: impl Into<String>) -> Self {
        KernelError::Shape(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        KernelError::Precondition(msg.into())
    }
}
