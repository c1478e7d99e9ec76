/// Failures of a perspective-n-point solve.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PnpError {
    #[error("need at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences { required: usize, actual: usize },
    #[error("object/image length mismatch: {object} vs {image}")]
    MismatchedLengths { object: usize, image: usize },
    #[error("non-finite coordinate at correspondence {index}")]
    NonFinite { index: usize },
    #[error("degenerate configuration: {0}")]
    Degenerate(&'static str),
    #[error("numerical routine did not converge: {0}")]
    NonConvergent(&'static str),
}
