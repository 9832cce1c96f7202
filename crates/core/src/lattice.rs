//! Bravais lattice primitives.

use serde::{Deserialize, Serialize};

use crate::field::{Scalar, Vector3};

/// Coarse classification of the constructed lattice, inferred from the
/// Bravais vectors and the basis.
///
/// Classification of regular multi-atom cells (bcc, fcc, hex stackings) is
/// deliberately left open; those currently classify as `Irregular`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BravaisLatticeType {
    SimpleCubic,
    Rectilinear,
    Hexagonal2D,
    Fcc,
    Bcc,
    Irregular,
}

/// The three primitive translation vectors defining lattice periodicity.
pub type BravaisVectors = [Vector3; 3];

pub fn bravais_sc() -> BravaisVectors {
    [
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ]
}

pub fn bravais_fcc() -> BravaisVectors {
    [
        Vector3::new(0.5, 0.0, 0.5),
        Vector3::new(0.5, 0.5, 0.0),
        Vector3::new(0.0, 0.5, 0.5),
    ]
}

pub fn bravais_bcc() -> BravaisVectors {
    [
        Vector3::new(0.5, 0.5, -0.5),
        Vector3::new(-0.5, 0.5, -0.5),
        Vector3::new(0.5, -0.5, -0.5),
    ]
}

/// Hexagonal lattice with a 60 degree angle between the in-plane vectors.
pub fn bravais_hex_2d_60() -> BravaisVectors {
    let h = 0.5 * (3.0 as Scalar).sqrt();
    [
        Vector3::new(h, -0.5, 0.0),
        Vector3::new(h, 0.5, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ]
}

/// Hexagonal lattice with a 120 degree angle between the in-plane vectors.
pub fn bravais_hex_2d_120() -> BravaisVectors {
    let h = 0.5 * (3.0 as Scalar).sqrt();
    [
        Vector3::new(0.5, -h, 0.0),
        Vector3::new(0.5, h, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ]
}

/// Classify a lattice from its Bravais vectors and basis size.
///
/// A single-atom basis with mutually orthogonal vectors is simple cubic if
/// the vectors are also equal in length, otherwise rectilinear. Everything
/// else is irregular.
pub fn classify(bravais: &BravaisVectors, n_cell_atoms: usize) -> BravaisLatticeType {
    const EPSILON: Scalar = 1e-6;

    if n_cell_atoms != 1 {
        return BravaisLatticeType::Irregular;
    }

    let unit: Vec<Vector3> = bravais.iter().map(|v| v.normalize()).collect();
    let orthogonal = unit[0].dot(&unit[1]).abs() < EPSILON
        && unit[0].dot(&unit[2]).abs() < EPSILON
        && unit[1].dot(&unit[2]).abs() < EPSILON;
    if !orthogonal {
        return BravaisLatticeType::Irregular;
    }

    let norms = [bravais[0].norm(), bravais[1].norm(), bravais[2].norm()];
    let equal = (norms[0] - norms[1]).abs() < EPSILON && (norms[1] - norms[2]).abs() < EPSILON;
    if equal {
        BravaisLatticeType::SimpleCubic
    } else {
        BravaisLatticeType::Rectilinear
    }
}
