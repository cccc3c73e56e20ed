use thiserror::Error;

/// Errors raised by the numerical parts of the crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Polynomial degree {0} is not within 1..=9")]
    UnsupportedDegree(usize),

    #[error("Need at least {needed} points, got {got}")]
    TooFewPoints { needed: usize, got: usize },

    #[error("Singular system while solving {0}")]
    Singular(&'static str),

    #[error("Velocity {0} m/s is not below the speed of light")]
    Superluminal(f64),

    #[error("chi2 minimum at the edge of the velocity grid ({0} m/s)")]
    VelocityAtGridEdge(f64),

    #[error("No usable orders: {0}")]
    NoUsableOrders(String),
}

pub type Result<T> = std::result::Result<T, CalibError>;
