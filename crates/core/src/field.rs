//! Contiguous per-site field storage for the spin lattice.
//!
//! Every field is an ordered sequence indexed 1:1 with lattice sites; the
//! index contract is shared across all field types, so any two fields passed
//! to the same operation must have equal length. Length mismatches are
//! programmer errors and fail fast.
//!
//! # Precision
//!
//! With the `single-precision` feature enabled, fields store `f32` instead of
//! `f64`. This halves memory bandwidth, which is the dominant cost of the
//! elementwise kernel passes. All code is written against the `Scalar` alias.

use std::ops::{Index, IndexMut};

/// The real scalar type used for field storage.
#[cfg(not(feature = "single-precision"))]
pub type Scalar = f64;

#[cfg(feature = "single-precision")]
pub type Scalar = f32;

/// Per-site 3-vector type (spin direction, position, effective field, ...).
pub type Vector3 = nalgebra::Vector3<Scalar>;

/// Sequence of per-site real values (moment magnitudes, energies, norms).
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    data: Vec<Scalar>,
}

impl ScalarField {
    pub fn zeros(n: usize) -> Self {
        Self { data: vec![0.0; n] }
    }

    pub fn filled(n: usize, value: Scalar) -> Self {
        Self {
            data: vec![value; n],
        }
    }

    pub fn from_vec(data: Vec<Scalar>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Scalar] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Scalar] {
        &mut self.data
    }
}

impl Index<usize> for ScalarField {
    type Output = Scalar;

    fn index(&self, i: usize) -> &Scalar {
        &self.data[i]
    }
}

impl IndexMut<usize> for ScalarField {
    fn index_mut(&mut self, i: usize) -> &mut Scalar {
        &mut self.data[i]
    }
}

impl From<ScalarField> for Vec<Scalar> {
    fn from(field: ScalarField) -> Self {
        field.data
    }
}

/// Sequence of per-site 3-vectors with the same indexing contract as
/// [`ScalarField`].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    data: Vec<Vector3>,
}

impl VectorField {
    pub fn zeros(n: usize) -> Self {
        Self {
            data: vec![Vector3::zeros(); n],
        }
    }

    pub fn filled(n: usize, value: Vector3) -> Self {
        Self {
            data: vec![value; n],
        }
    }

    pub fn from_vec(data: Vec<Vector3>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Vector3] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Vector3] {
        &mut self.data
    }
}

impl Index<usize> for VectorField {
    type Output = Vector3;

    fn index(&self, i: usize) -> &Vector3 {
        &self.data[i]
    }
}

impl IndexMut<usize> for VectorField {
    fn index_mut(&mut self, i: usize) -> &mut Vector3 {
        &mut self.data[i]
    }
}

impl From<VectorField> for Vec<Vector3> {
    fn from(field: VectorField) -> Self {
        field.data
    }
}

/// Sequence of per-site integers. Used both for categorical labels
/// (atom type, with -1 marking a vacancy) and for 0/1 masks gating
/// whether an operation applies at a site.
#[derive(Debug, Clone, PartialEq)]
pub struct IntField {
    data: Vec<i32>,
}

impl IntField {
    pub fn filled(n: usize, value: i32) -> Self {
        Self {
            data: vec![value; n],
        }
    }

    pub fn from_vec(data: Vec<i32>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [i32] {
        &mut self.data
    }
}

impl Index<usize> for IntField {
    type Output = i32;

    fn index(&self, i: usize) -> &i32 {
        &self.data[i]
    }
}

impl IndexMut<usize> for IntField {
    fn index_mut(&mut self, i: usize) -> &mut i32 {
        &mut self.data[i]
    }
}
