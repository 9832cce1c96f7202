#![cfg(test)]

use super::field::Vector3;
use super::lattice::{
    bravais_bcc, bravais_fcc, bravais_hex_2d_60, bravais_hex_2d_120, bravais_sc, classify,
    BravaisLatticeType,
};

#[test]
fn simple_cubic_classifies_as_simple_cubic() {
    assert_eq!(
        classify(&bravais_sc(), 1),
        BravaisLatticeType::SimpleCubic
    );
}

#[test]
fn stretched_orthogonal_vectors_classify_as_rectilinear() {
    let bravais = [
        Vector3::new(2.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ];
    assert_eq!(classify(&bravais, 1), BravaisLatticeType::Rectilinear);
}

#[test]
fn non_orthogonal_vectors_classify_as_irregular() {
    assert_eq!(classify(&bravais_fcc(), 1), BravaisLatticeType::Irregular);
    assert_eq!(classify(&bravais_bcc(), 1), BravaisLatticeType::Irregular);
    assert_eq!(
        classify(&bravais_hex_2d_60(), 1),
        BravaisLatticeType::Irregular
    );
}

#[test]
fn multi_atom_bases_classify_as_irregular() {
    assert_eq!(classify(&bravais_sc(), 2), BravaisLatticeType::Irregular);
}

#[test]
fn hexagonal_vectors_have_unit_length_and_expected_angle() {
    for bravais in [bravais_hex_2d_60(), bravais_hex_2d_120()] {
        assert!((bravais[0].norm() - 1.0).abs() < 1e-6);
        assert!((bravais[1].norm() - 1.0).abs() < 1e-6);
    }
    // 60 degrees: cos = 1/2; 120 degrees: cos = -1/2.
    let hex60 = bravais_hex_2d_60();
    assert!((hex60[0].dot(&hex60[1]) - 0.5).abs() < 1e-6);
    let hex120 = bravais_hex_2d_120();
    assert!((hex120[0].dot(&hex120[1]) + 0.5).abs() < 1e-6);
}
