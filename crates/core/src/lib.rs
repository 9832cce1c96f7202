//! Core primitives for atomistic spin lattices: field containers, the
//! backend-agnostic vector-math surface, and lattice geometry with its
//! derived simplex structures.
//!
//! Numeric precision is selected at compile time: [`field::Scalar`] is
//! `f64` by default and `f32` under the `single-precision` feature.

pub mod backend;
pub mod delaunay;
pub mod error;
pub mod field;
pub mod geometry;
pub mod lattice;

pub use backend::{cayley_transform, random_unit_vector, FieldBackend};
pub use error::GeometryError;
pub use field::{IntField, Scalar, ScalarField, Vector3, VectorField};
pub use geometry::{CellComposition, CompositionEntry, Defects, Geometry, Pinning, Site};
pub use lattice::{BravaisLatticeType, BravaisVectors};

#[cfg(test)]
mod _tests_backend;
#[cfg(test)]
mod _tests_geometry;
#[cfg(test)]
mod _tests_lattice;
