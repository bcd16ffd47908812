//! Error types for the intersection engine.

use std::fmt;

use thiserror::Error;

/// Pipeline stage after which a cancellation was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Both surface meshes have been built.
    MeshBuild,
    /// Candidate triangle pairs have been collected.
    CouplingSearch,
    /// A section line has been refined into a walking line.
    SectionRefinement,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::MeshBuild => write!(f, "mesh build"),
            Stage::CouplingSearch => write!(f, "coupling search"),
            Stage::SectionRefinement => write!(f, "section refinement"),
        }
    }
}

/// Errors that abort an intersection query.
///
/// Recoverable conditions (degenerate cells, non-convergent points) are never
/// errors; they are counted in [`crate::IntersectionStatus`].
#[derive(Error, Debug)]
pub enum SsiError {
    /// Parameter bounds are inverted or not numbers.
    #[error("invalid bounds on surface {surface}: u [{u_min}, {u_max}], v [{v_min}, {v_max}]")]
    InvalidBounds {
        /// 1 or 2.
        surface: usize,
        /// Lower u bound.
        u_min: f64,
        /// Upper u bound.
        u_max: f64,
        /// Lower v bound.
        v_min: f64,
        /// Upper v bound.
        v_max: f64,
    },

    /// Tolerance is not a positive finite number.
    #[error("invalid tolerance: {0}")]
    InvalidTolerance(f64),

    /// Invalid intersection settings.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// Settings could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// The caller raised the cancellation flag.
    #[error("cancelled after {stage}")]
    Cancelled {
        /// Last completed stage.
        stage: Stage,
    },
}

/// Result type for intersection operations.
pub type Result<T> = std::result::Result<T, SsiError>;
