#![cfg(test)]

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::backend::{cayley_transform, FieldBackend};
use super::field::{IntField, Scalar, ScalarField, Vector3, VectorField};

const TOL: Scalar = 1e-5;

/// Exercises the sequential default bodies directly.
#[derive(Clone)]
struct ReferenceBackend;

impl FieldBackend for ReferenceBackend {
    type ScalarBuffer = ScalarField;
    type VectorBuffer = VectorField;

    fn alloc_scalar_field(&self, n: usize) -> ScalarField {
        ScalarField::zeros(n)
    }

    fn alloc_vector_field(&self, n: usize) -> VectorField {
        VectorField::zeros(n)
    }
}

fn arbitrary_vectorfield(n: usize, seed: u64) -> VectorField {
    let backend = ReferenceBackend;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut field = backend.alloc_vector_field(n);
    backend.random_vectorfield(&mut rng, &mut field);
    field
}

#[test]
fn fill_scale_add_compose_elementwise() {
    let backend = ReferenceBackend;
    let mut field = backend.alloc_scalar_field(5);
    backend.fill(&mut field, 2.0);
    backend.scale(&mut field, 3.0);
    backend.add(&mut field, -1.0);
    assert!(field.as_slice().iter().all(|v| (*v - 5.0).abs() < TOL));
}

#[test]
fn masked_fill_leaves_unmasked_sites_untouched() {
    let backend = ReferenceBackend;
    let mut field = backend.alloc_scalar_field(4);
    backend.fill(&mut field, 1.0);
    let mask = IntField::from_vec(vec![1, 0, 1, 0]);
    backend.fill_masked(&mut field, 7.0, &mask);
    assert_eq!(field.as_slice(), &[7.0, 1.0, 7.0, 1.0]);

    let mut spins = backend.alloc_vector_field(4);
    backend.fill_vector_masked(&mut spins, Vector3::new(0.0, 0.0, 1.0), &mask);
    assert_eq!(spins[0], Vector3::new(0.0, 0.0, 1.0));
    assert_eq!(spins[1], Vector3::zeros());
}

#[test]
fn sum_and_mean_handle_awkward_sizes() {
    let backend = ReferenceBackend;
    // Sizes chosen to exercise partial blocks on parallel backends sharing
    // this contract: empty, single, one past a power of two, and a larger
    // non-round count.
    for n in [0usize, 1, 513, 4103] {
        let mut field = backend.alloc_scalar_field(n);
        backend.fill(&mut field, 0.5);
        let total = backend.sum(&field);
        assert!(
            (total - 0.5 * n as Scalar).abs() < TOL * (n.max(1) as Scalar),
            "sum over {n} sites"
        );
        if n > 0 {
            assert!((backend.mean(&field) - 0.5).abs() < TOL);
        }
    }
}

#[test]
fn vector_sum_matches_componentwise_sums() {
    let backend = ReferenceBackend;
    let field = arbitrary_vectorfield(513, 11);
    let total = backend.sum_vector(&field);
    let expect = field
        .as_slice()
        .iter()
        .fold(Vector3::zeros(), |acc, v| acc + v);
    assert!((total - expect).norm() < TOL);
}

#[test]
fn minmax_component_scans_all_three_components() {
    let backend = ReferenceBackend;
    let field = VectorField::from_vec(vec![
        Vector3::new(0.0, -3.0, 1.0),
        Vector3::new(2.0, 0.5, -0.5),
    ]);
    let (lo, hi) = backend.minmax_component(&field);
    assert_eq!((lo, hi), (-3.0, 2.0));
    assert_eq!(backend.max_abs_component(&field), 3.0);
}

#[test]
fn minmax_component_of_empty_field_is_zero() {
    let backend = ReferenceBackend;
    let field = backend.alloc_vector_field(0);
    assert_eq!(backend.minmax_component(&field), (0.0, 0.0));
}

#[test]
fn dot_reduction_equals_summed_elementwise_dots() {
    let backend = ReferenceBackend;
    let a = arbitrary_vectorfield(201, 3);
    let b = arbitrary_vectorfield(201, 4);
    let mut per_site = backend.alloc_scalar_field(201);
    backend.dot_per_site(&a, &b, &mut per_site);
    let reduced = backend.dot(&a, &b);
    assert!((reduced - backend.sum(&per_site)).abs() < TOL);
}

#[test]
fn cross_is_antisymmetric_and_orthogonal() {
    let backend = ReferenceBackend;
    let a = arbitrary_vectorfield(64, 5);
    let b = arbitrary_vectorfield(64, 6);
    let mut ab = backend.alloc_vector_field(64);
    let mut ba = backend.alloc_vector_field(64);
    backend.cross(&a, &b, &mut ab);
    backend.cross(&b, &a, &mut ba);
    for i in 0..64 {
        assert!((ab[i] + ba[i]).norm() < TOL);
        assert!(ab[i].dot(&a[i]).abs() < TOL);
        assert!(ab[i].dot(&b[i]).abs() < TOL);
    }
}

#[test]
fn normalize_vectors_leaves_zero_vectors_at_zero() {
    let backend = ReferenceBackend;
    let mut field = VectorField::from_vec(vec![
        Vector3::new(3.0, 4.0, 0.0),
        Vector3::zeros(),
        Vector3::new(0.0, 0.0, -2.0),
    ]);
    backend.normalize_vectors(&mut field);
    assert!((field[0].norm() - 1.0).abs() < TOL);
    assert_eq!(field[1], Vector3::zeros());
    assert!((field[2] - Vector3::new(0.0, 0.0, -1.0)).norm() < TOL);
}

#[test]
fn norm_writes_per_site_magnitudes() {
    let backend = ReferenceBackend;
    let field = VectorField::from_vec(vec![Vector3::new(3.0, 4.0, 0.0), Vector3::zeros()]);
    let mut norms = backend.alloc_scalar_field(2);
    backend.norm(&field, &mut norms);
    assert!((norms[0] - 5.0).abs() < TOL);
    assert_eq!(norms[1], 0.0);
}

#[test]
fn add_c_a_accumulates_what_set_c_a_overwrites() {
    let backend = ReferenceBackend;
    let a = arbitrary_vectorfield(33, 7);
    let mut set = backend.alloc_vector_field(33);
    let mut add = backend.alloc_vector_field(33);
    backend.fill_vector(&mut add, Vector3::new(1.0, 0.0, 0.0));
    backend.set_c_a(2.5, &a, &mut set);
    backend.add_c_a(2.5, &a, &mut add);
    for i in 0..33 {
        assert!((add[i] - set[i] - Vector3::new(1.0, 0.0, 0.0)).norm() < TOL);
    }
}

#[test]
fn masked_fma_variants_skip_unmasked_sites() {
    let backend = ReferenceBackend;
    let a = VectorField::filled(4, Vector3::new(0.0, 1.0, 0.0));
    let mask = IntField::from_vec(vec![0, 1, 0, 1]);

    let mut out = backend.alloc_vector_field(4);
    backend.set_c_a_masked(3.0, &a, &mut out, &mask);
    assert_eq!(out[0], Vector3::zeros());
    assert_eq!(out[1], Vector3::new(0.0, 3.0, 0.0));

    backend.add_c_a_vec_masked(1.0, Vector3::new(1.0, 0.0, 0.0), &mut out, &mask);
    assert_eq!(out[0], Vector3::zeros());
    assert_eq!(out[3], Vector3::new(1.0, 3.0, 0.0));
}

#[test]
fn per_site_coefficients_weight_each_site_independently() {
    let backend = ReferenceBackend;
    let c = ScalarField::from_vec(vec![1.0, 2.0, -1.0]);
    let a = VectorField::filled(3, Vector3::new(0.0, 0.0, 1.0));
    let mut out = backend.alloc_vector_field(3);
    backend.set_c_a_site(&c, &a, &mut out);
    assert_eq!(out[0], Vector3::new(0.0, 0.0, 1.0));
    assert_eq!(out[1], Vector3::new(0.0, 0.0, 2.0));
    assert_eq!(out[2], Vector3::new(0.0, 0.0, -1.0));

    backend.add_c_a_site(&c, &a, &mut out);
    assert_eq!(out[1], Vector3::new(0.0, 0.0, 4.0));
}

#[test]
fn dot_and_cross_fma_match_their_scalar_expansions() {
    let backend = ReferenceBackend;
    let a = arbitrary_vectorfield(17, 8);
    let b = arbitrary_vectorfield(17, 9);
    let c = 0.75;

    let mut dots = backend.alloc_scalar_field(17);
    backend.set_c_dot(c, &a, &b, &mut dots);
    backend.add_c_dot(c, &a, &b, &mut dots);
    for i in 0..17 {
        assert!((dots[i] - 2.0 * c * a[i].dot(&b[i])).abs() < TOL);
    }

    let broadcast = Vector3::new(0.0, 1.0, 0.0);
    let mut crosses = backend.alloc_vector_field(17);
    backend.set_c_cross_vec(c, broadcast, &b, &mut crosses);
    for i in 0..17 {
        assert!((crosses[i] - broadcast.cross(&b[i]) * c).norm() < TOL);
    }

    backend.add_c_cross(c, &a, &b, &mut crosses);
    for i in 0..17 {
        let expect = broadcast.cross(&b[i]) * c + a[i].cross(&b[i]) * c;
        assert!((crosses[i] - expect).norm() < TOL);
    }
}

#[test]
fn transform_with_zero_force_is_the_identity() {
    let backend = ReferenceBackend;
    let mut spins = arbitrary_vectorfield(50, 10);
    backend.normalize_vectors(&mut spins);
    let force = backend.alloc_vector_field(50);
    let mut out = backend.alloc_vector_field(50);
    backend.transform(&spins, &force, &mut out);
    for i in 0..50 {
        assert!((out[i] - spins[i]).norm() < TOL);
    }
}

#[test]
fn transform_preserves_spin_norms() {
    let backend = ReferenceBackend;
    let mut spins = arbitrary_vectorfield(50, 12);
    backend.normalize_vectors(&mut spins);
    let force = arbitrary_vectorfield(50, 13);
    let mut out = backend.alloc_vector_field(50);
    backend.transform(&spins, &force, &mut out);
    for i in 0..50 {
        assert!((out[i].norm() - 1.0).abs() < TOL);
    }
}

#[test]
fn transform_rotates_by_twice_the_half_angle() {
    // A = force/2 = z means a rotation by 2*atan(1) = 90 degrees about z.
    let spin = Vector3::new(1.0, 0.0, 0.0);
    let force = Vector3::new(0.0, 0.0, 2.0);
    let out = cayley_transform(&spin, &force);
    assert!((out - Vector3::new(0.0, 1.0, 0.0)).norm() < TOL);
}

#[test]
fn random_vectorfield_stays_in_the_unit_cube_and_reproduces() {
    let backend = ReferenceBackend;
    let mut first = backend.alloc_vector_field(200);
    let mut second = backend.alloc_vector_field(200);
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    backend.random_vectorfield(&mut rng, &mut first);
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    backend.random_vectorfield(&mut rng, &mut second);

    assert_eq!(first, second);
    for v in first.as_slice() {
        for component in [v.x, v.y, v.z] {
            assert!((-1.0..1.0).contains(&component));
        }
    }
}

#[test]
fn random_unitsphere_yields_unit_vectors() {
    let backend = ReferenceBackend;
    let mut field = backend.alloc_vector_field(500);
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    backend.random_unitsphere(&mut rng, &mut field);
    for v in field.as_slice() {
        assert!((v.norm() - 1.0).abs() < TOL);
    }
    // No hemisphere bias: the mean should be near the origin.
    let mean = backend.mean_vector(&field);
    assert!(mean.norm() < 0.15);
}

#[test]
#[should_panic(expected = "field lengths must match")]
fn mismatched_field_lengths_fail_fast() {
    let backend = ReferenceBackend;
    let a = backend.alloc_vector_field(4);
    let b = backend.alloc_vector_field(5);
    let mut out = backend.alloc_vector_field(4);
    backend.cross(&a, &b, &mut out);
}

#[test]
fn upload_download_round_trips_host_fields() {
    let backend = ReferenceBackend;
    let host = arbitrary_vectorfield(10, 21);
    let buffer = backend.upload_vector(&host);
    assert_eq!(backend.download_vector(&buffer), host);

    let scalars = ScalarField::from_vec(vec![1.0, 2.0, 3.0]);
    let buffer = backend.upload_scalar(&scalars);
    assert_eq!(backend.download_scalar(&buffer), scalars);
}
