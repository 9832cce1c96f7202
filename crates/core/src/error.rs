//! Error types for geometry construction.

use thiserror::Error;

use crate::field::Scalar;

/// Fatal geometry construction errors. The system stays uninitialized when
/// any of these is returned; nothing is retried internally.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error(
        "unable to initialize the spin system: basis atoms {i} and {j} occupy the same space \
         within a margin of {epsilon} under translation ({da}, {db}, {dc}), at absolute position \
         ({x}, {y}, {z}); check the lattice specification"
    )]
    CoincidentSites {
        i: usize,
        j: usize,
        da: i64,
        db: i64,
        dc: i64,
        x: Scalar,
        y: Scalar,
        z: Scalar,
        epsilon: Scalar,
    },

    #[error("invalid geometry specification: {0}")]
    InvalidInput(String),
}
