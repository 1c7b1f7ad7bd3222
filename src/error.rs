use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridflowError {
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("Solve error: {0}")]
    Solve(String),

    #[error("Linear solver breakdown at iteration {iteration}: {detail}")]
    Breakdown { iteration: usize, detail: String },

    #[error("Singular block {block} ({size}x{size}) in block-Jacobi preconditioner")]
    SingularBlock { block: usize, size: usize },
}

pub type Result<T> = std::result::Result<T, GridflowError>;
