#![cfg(test)]

use std::sync::Arc;

use super::error::GeometryError;
use super::field::{Scalar, Vector3, VectorField};
use super::geometry::{
    CellComposition, CompositionEntry, Defects, Geometry, Pinning, Site, VACANCY,
};
use super::lattice::{bravais_sc, BravaisLatticeType};

const TOL: Scalar = 1e-5;

fn sc_geometry(n_cells: [usize; 3]) -> Geometry {
    Geometry::new(
        bravais_sc(),
        n_cells,
        vec![Vector3::zeros()],
        CellComposition::default(),
        1.0,
        Pinning::default(),
        Defects::default(),
    )
    .unwrap()
}

fn two_atom_geometry(n_cells: [usize; 3], second: Vector3) -> Geometry {
    Geometry::new(
        bravais_sc(),
        n_cells,
        vec![Vector3::zeros(), second],
        CellComposition::default(),
        1.0,
        Pinning::default(),
        Defects::default(),
    )
    .unwrap()
}

#[test]
fn site_index_orders_basis_atom_fastest_then_a_b_c() {
    let geometry = two_atom_geometry([3, 4, 5], Vector3::new(0.5, 0.5, 0.5));
    assert_eq!(geometry.nos(), 2 * 3 * 4 * 5);
    assert_eq!(geometry.site_index(0, [0, 0, 0]), 0);
    assert_eq!(geometry.site_index(1, [0, 0, 0]), 1);
    assert_eq!(geometry.site_index(0, [1, 0, 0]), 2);
    assert_eq!(geometry.site_index(0, [0, 1, 0]), 2 * 3);
    assert_eq!(geometry.site_index(0, [0, 0, 1]), 2 * 3 * 4);
    assert_eq!(
        geometry.site_index(1, [2, 3, 4]),
        geometry.nos() - 1
    );
}

#[test]
fn positions_combine_translations_basis_and_lattice_constant() {
    let geometry = Geometry::new(
        bravais_sc(),
        [2, 2, 2],
        vec![Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0)],
        CellComposition::default(),
        2.0,
        Pinning::default(),
        Defects::default(),
    )
    .unwrap();

    let p = geometry.positions();
    assert!((p[geometry.site_index(0, [0, 0, 0])] - Vector3::zeros()).norm() < TOL);
    assert!((p[geometry.site_index(1, [0, 0, 0])] - Vector3::new(1.0, 0.0, 0.0)).norm() < TOL);
    assert!((p[geometry.site_index(0, [1, 1, 0])] - Vector3::new(2.0, 2.0, 0.0)).norm() < TOL);
    assert!((p[geometry.site_index(1, [0, 0, 1])] - Vector3::new(1.0, 0.0, 2.0)).norm() < TOL);
}

#[test]
fn bounds_and_center_span_the_constructed_lattice() {
    let geometry = sc_geometry([4, 3, 2]);
    let (min, max) = geometry.bounds();
    assert!((min - Vector3::zeros()).norm() < TOL);
    assert!((max - Vector3::new(3.0, 2.0, 1.0)).norm() < TOL);
    assert!((geometry.center() - Vector3::new(1.5, 1.0, 0.5)).norm() < TOL);
}

#[test]
fn unit_cell_bounds_halve_the_neighbour_translations() {
    let geometry = sc_geometry([4, 4, 4]);
    let (min, max) = geometry.cell_bounds();
    assert!((min - Vector3::new(-0.5, -0.5, -0.5)).norm() < TOL);
    assert!((max - Vector3::new(0.5, 0.5, 0.5)).norm() < TOL);
}

#[test]
fn dimensionality_follows_the_periodic_extent() {
    assert_eq!(sc_geometry([1, 1, 1]).dimensionality(), 0);
    assert_eq!(sc_geometry([10, 1, 1]).dimensionality(), 1);
    assert_eq!(sc_geometry([1, 6, 1]).dimensionality(), 1);
    assert_eq!(sc_geometry([10, 10, 1]).dimensionality(), 2);
    assert_eq!(sc_geometry([4, 4, 4]).dimensionality(), 3);
}

#[test]
fn basis_atoms_can_raise_the_dimensionality() {
    // A lone cell with two atoms is a line.
    let pair = two_atom_geometry([1, 1, 1], Vector3::new(0.5, 0.0, 0.0));
    assert_eq!(pair.dimensionality(), 1);

    // Basis offset along the chain keeps a chain one-dimensional.
    let chain = two_atom_geometry([5, 1, 1], Vector3::new(0.5, 0.0, 0.0));
    assert_eq!(chain.dimensionality(), 1);

    // Basis offset perpendicular to the chain makes it planar.
    let ladder = two_atom_geometry([5, 1, 1], Vector3::new(0.0, 0.5, 0.0));
    assert_eq!(ladder.dimensionality(), 2);

    // An out-of-plane basis offset turns a monolayer into a slab.
    let slab = two_atom_geometry([5, 5, 1], Vector3::new(0.0, 0.0, 0.5));
    assert_eq!(slab.dimensionality(), 3);

    // An in-plane offset leaves the monolayer two-dimensional.
    let monolayer = two_atom_geometry([5, 5, 1], Vector3::new(0.5, 0.5, 0.0));
    assert_eq!(monolayer.dimensionality(), 2);
}

#[test]
fn simple_cubic_lattice_is_classified_as_such() {
    assert_eq!(
        sc_geometry([2, 2, 2]).classifier(),
        BravaisLatticeType::SimpleCubic
    );
    assert_eq!(
        two_atom_geometry([2, 2, 2], Vector3::new(0.5, 0.5, 0.5)).classifier(),
        BravaisLatticeType::Irregular
    );
}

#[test]
fn coincident_basis_atoms_are_rejected() {
    let result = Geometry::new(
        bravais_sc(),
        [2, 2, 2],
        vec![Vector3::zeros(), Vector3::zeros()],
        CellComposition::default(),
        1.0,
        Pinning::default(),
        Defects::default(),
    );
    assert!(matches!(
        result,
        Err(GeometryError::CoincidentSites { i: 0, j: 1, .. })
    ));
}

#[test]
fn basis_atoms_coinciding_under_translation_are_rejected() {
    // The second atom sits exactly one lattice vector away from the first.
    let result = Geometry::new(
        bravais_sc(),
        [4, 4, 4],
        vec![Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0)],
        CellComposition::default(),
        1.0,
        Pinning::default(),
        Defects::default(),
    );
    assert!(result.is_err());
}

#[test]
fn invalid_specifications_are_rejected_up_front() {
    let zero_cells = Geometry::new(
        bravais_sc(),
        [0, 2, 2],
        vec![Vector3::zeros()],
        CellComposition::default(),
        1.0,
        Pinning::default(),
        Defects::default(),
    );
    assert!(matches!(zero_cells, Err(GeometryError::InvalidInput(_))));

    let out_of_range_defect = Geometry::new(
        bravais_sc(),
        [2, 2, 2],
        vec![Vector3::zeros()],
        CellComposition::default(),
        1.0,
        Pinning::default(),
        Defects {
            sites: vec![Site {
                basis: 0,
                translations: [2, 0, 0],
            }],
            types: vec![VACANCY],
        },
    );
    assert!(matches!(
        out_of_range_defect,
        Err(GeometryError::InvalidInput(_))
    ));
}

#[test]
fn ordered_composition_assigns_types_and_moments() {
    let composition = CellComposition::ordered(vec![
        CompositionEntry {
            iatom: 0,
            atom_type: 0,
            mu_s: 2.0,
            concentration: 0.0,
        },
        CompositionEntry {
            iatom: 1,
            atom_type: 1,
            mu_s: 0.5,
            concentration: 0.0,
        },
    ]);
    let geometry = Geometry::new(
        bravais_sc(),
        [2, 2, 1],
        vec![Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0)],
        composition,
        1.0,
        Pinning::default(),
        Defects::default(),
    )
    .unwrap();

    for na in 0..2 {
        for nb in 0..2 {
            assert_eq!(geometry.atom_types()[geometry.site_index(0, [na, nb, 0])], 0);
            assert_eq!(geometry.atom_types()[geometry.site_index(1, [na, nb, 0])], 1);
            assert!((geometry.mu_s()[geometry.site_index(0, [na, nb, 0])] - 2.0).abs() < TOL);
            assert!((geometry.mu_s()[geometry.site_index(1, [na, nb, 0])] - 0.5).abs() < TOL);
        }
    }
    assert_eq!(geometry.nos_nonvacant(), geometry.nos());
}

#[test]
fn ordered_vacancy_entries_reduce_the_nonvacant_count() {
    let composition = CellComposition::ordered(vec![CompositionEntry {
        iatom: 1,
        atom_type: VACANCY,
        mu_s: 0.0,
        concentration: 0.0,
    }]);
    let geometry = Geometry::new(
        bravais_sc(),
        [3, 1, 1],
        vec![Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0)],
        composition,
        1.0,
        Pinning::default(),
        Defects::default(),
    )
    .unwrap();
    assert_eq!(geometry.nos(), 6);
    assert_eq!(geometry.nos_nonvacant(), 3);
    for na in 0..3 {
        assert_eq!(
            geometry.atom_types()[geometry.site_index(1, [na, 0, 0])],
            VACANCY
        );
    }
}

#[test]
fn full_concentration_disorder_matches_the_ordered_assignment() {
    let entries = vec![CompositionEntry {
        iatom: 0,
        atom_type: 3,
        mu_s: 1.5,
        concentration: 1.0,
    }];
    let ordered = Geometry::new(
        bravais_sc(),
        [4, 4, 1],
        vec![Vector3::zeros()],
        CellComposition::ordered(entries.clone()),
        1.0,
        Pinning::default(),
        Defects::default(),
    )
    .unwrap();
    let disordered = Geometry::new(
        bravais_sc(),
        [4, 4, 1],
        vec![Vector3::zeros()],
        CellComposition::disordered(entries, 2006),
        1.0,
        Pinning::default(),
        Defects::default(),
    )
    .unwrap();

    assert_eq!(ordered.atom_types(), disordered.atom_types());
    assert_eq!(ordered.mu_s(), disordered.mu_s());
    assert_eq!(ordered.nos_nonvacant(), disordered.nos_nonvacant());
}

#[test]
fn disordered_composition_is_reproducible_for_a_fixed_seed() {
    let entries = vec![CompositionEntry {
        iatom: 0,
        atom_type: 1,
        mu_s: 1.0,
        concentration: 0.5,
    }];
    let build = |seed| {
        Geometry::new(
            bravais_sc(),
            [8, 8, 1],
            vec![Vector3::zeros()],
            CellComposition::disordered(entries.clone(), seed),
            1.0,
            Pinning::default(),
            Defects::default(),
        )
        .unwrap()
    };
    let first = build(2006);
    let second = build(2006);
    let other = build(7);

    assert_eq!(first.atom_types(), second.atom_types());
    assert_ne!(first.atom_types(), other.atom_types());

    // Half concentration should leave plenty of both kinds.
    let vacancies = first
        .atom_types()
        .as_slice()
        .iter()
        .filter(|&&t| t == VACANCY)
        .count();
    assert!(vacancies > 0 && vacancies < first.nos());
    assert_eq!(first.nos_nonvacant(), first.nos() - vacancies);
}

#[test]
fn boundary_pinning_masks_the_requested_layers() {
    let pinning = Pinning {
        na_left: 1,
        pinned_cell: vec![Vector3::new(0.0, 0.0, 1.0)],
        ..Pinning::default()
    };
    let geometry = Geometry::new(
        bravais_sc(),
        [4, 2, 1],
        vec![Vector3::zeros()],
        CellComposition::default(),
        1.0,
        pinning,
        Defects::default(),
    )
    .unwrap();

    for nb in 0..2 {
        assert_eq!(geometry.mask_unpinned()[geometry.site_index(0, [0, nb, 0])], 0);
        for na in 1..4 {
            assert_eq!(
                geometry.mask_unpinned()[geometry.site_index(0, [na, nb, 0])],
                1
            );
        }
    }
}

#[test]
fn apply_pinning_overwrites_only_pinned_sites() {
    let pinning = Pinning {
        sites: vec![Site {
            basis: 0,
            translations: [1, 0, 0],
        }],
        spins: vec![Vector3::new(0.0, 1.0, 0.0)],
        ..Pinning::default()
    };
    let geometry = Geometry::new(
        bravais_sc(),
        [3, 1, 1],
        vec![Vector3::zeros()],
        CellComposition::default(),
        1.0,
        pinning,
        Defects::default(),
    )
    .unwrap();

    let mut spins = VectorField::filled(geometry.nos(), Vector3::new(1.0, 0.0, 0.0));
    geometry.apply_pinning(&mut spins);
    assert_eq!(spins[0], Vector3::new(1.0, 0.0, 0.0));
    assert_eq!(spins[1], Vector3::new(0.0, 1.0, 0.0));
    assert_eq!(spins[2], Vector3::new(1.0, 0.0, 0.0));
}

#[test]
fn defects_override_type_and_zero_the_moment() {
    let defects = Defects {
        sites: vec![Site {
            basis: 0,
            translations: [0, 0, 0],
        }],
        types: vec![VACANCY],
    };
    let geometry = Geometry::new(
        bravais_sc(),
        [2, 1, 1],
        vec![Vector3::zeros()],
        CellComposition::default(),
        1.0,
        Pinning::default(),
        defects,
    )
    .unwrap();

    assert_eq!(geometry.atom_types()[0], VACANCY);
    assert_eq!(geometry.mu_s()[0], 0.0);
    assert_eq!(geometry.atom_types()[1], 0);
    assert_eq!(geometry.nos_nonvacant(), geometry.nos() - 1);
}

#[test]
fn monolayer_triangulation_splits_each_cell_in_two() {
    let geometry = sc_geometry([3, 3, 1]);
    let triangles = geometry.triangulation(1);
    assert_eq!(triangles.len(), 8);
}

#[test]
fn triangulation_is_cached_until_the_step_changes() {
    let geometry = sc_geometry([6, 6, 1]);
    let first = geometry.triangulation(1);
    let second = geometry.triangulation(1);
    assert!(Arc::ptr_eq(&first, &second));

    let coarse = geometry.triangulation(2);
    assert!(!Arc::ptr_eq(&first, &coarse));
    assert!(coarse.len() < first.len());

    // Recomputing for the original step gives fresh (not stale) data.
    let again = geometry.triangulation(1);
    assert_eq!(again.len(), first.len());
}

#[test]
fn triangulation_guards_against_oversized_steps() {
    let geometry = sc_geometry([6, 6, 1]);
    // 6 / 4 < 2 along a periodic axis: too coarse to triangulate.
    assert!(geometry.triangulation(4).is_empty());
}

#[test]
fn triangulation_of_non_planar_geometries_is_empty() {
    assert!(sc_geometry([4, 4, 4]).triangulation(1).is_empty());
    assert!(sc_geometry([8, 1, 1]).triangulation(1).is_empty());
}

#[test]
fn single_atom_cubes_decompose_into_six_tetrahedra_each() {
    let geometry = sc_geometry([3, 3, 3]);
    let tetrahedra = geometry.tetrahedra(1);
    // 2 x 2 x 2 cubes, six tetrahedra per cube.
    assert_eq!(tetrahedra.len(), 48);
    let n_points = 27;
    for tet in tetrahedra.iter() {
        assert!(tet.iter().all(|&v| v < n_points));
    }
}

#[test]
fn tetrahedra_are_cached_like_triangulations() {
    let geometry = sc_geometry([4, 4, 4]);
    let first = geometry.tetrahedra(1);
    let second = geometry.tetrahedra(1);
    assert!(Arc::ptr_eq(&first, &second));
    let coarse = geometry.tetrahedra(2);
    assert!(!Arc::ptr_eq(&first, &coarse));
    assert_eq!(coarse.len(), 6);
}

#[test]
fn multi_atom_bases_tetrahedralize_through_the_delaunay_seam() {
    let geometry = two_atom_geometry([2, 2, 2], Vector3::new(0.5, 0.5, 0.5));
    let tetrahedra = geometry.tetrahedra(1);
    assert!(!tetrahedra.is_empty());
    for tet in tetrahedra.iter() {
        assert!(tet.iter().all(|&v| v < geometry.nos()));
    }
}

#[test]
fn tetrahedra_of_planar_geometries_are_empty() {
    assert!(sc_geometry([6, 6, 1]).tetrahedra(1).is_empty());
    // Subsampling below two cells per axis also degrades to empty.
    assert!(sc_geometry([3, 3, 3]).tetrahedra(2).is_empty());
}
