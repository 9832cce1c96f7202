//! Multithreaded CPU vector-math backend built on rayon.
//!
//! Elementwise passes split the site range into contiguous work units;
//! reductions compute one partial per work unit and combine the partials
//! sequentially, so results are deterministic for a given site count even
//! though they may differ from the sequential reference in the last bits.

use rayon::prelude::*;

use spinlat_core::backend::{cayley_transform, FieldBackend};
use spinlat_core::field::{IntField, Scalar, ScalarField, Vector3, VectorField};

/// Sites per work unit. Large enough that per-task overhead is negligible
/// against the memory traffic of one pass.
const CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

fn check_len(a: usize, b: usize) {
    assert_eq!(a, b, "field lengths must match");
}

impl FieldBackend for CpuBackend {
    type ScalarBuffer = ScalarField;
    type VectorBuffer = VectorField;

    fn alloc_scalar_field(&self, n: usize) -> ScalarField {
        ScalarField::zeros(n)
    }

    fn alloc_vector_field(&self, n: usize) -> VectorField {
        VectorField::zeros(n)
    }

    fn fill(&self, out: &mut ScalarField, value: Scalar) {
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .for_each(|dst| *dst = value);
    }

    fn fill_masked(&self, out: &mut ScalarField, value: Scalar, mask: &IntField) {
        check_len(out.len(), mask.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(mask.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|(dst, m)| {
                if *m != 0 {
                    *dst = value;
                }
            });
    }

    fn fill_vector(&self, out: &mut VectorField, value: Vector3) {
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .for_each(|dst| *dst = value);
    }

    fn fill_vector_masked(&self, out: &mut VectorField, value: Vector3, mask: &IntField) {
        check_len(out.len(), mask.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(mask.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|(dst, m)| {
                if *m != 0 {
                    *dst = value;
                }
            });
    }

    fn scale(&self, out: &mut ScalarField, c: Scalar) {
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .for_each(|dst| *dst *= c);
    }

    fn add(&self, out: &mut ScalarField, c: Scalar) {
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .for_each(|dst| *dst += c);
    }

    fn scale_vector(&self, out: &mut VectorField, c: Scalar) {
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .for_each(|dst| *dst *= c);
    }

    fn add_vector(&self, out: &mut VectorField, v: Vector3) {
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .for_each(|dst| *dst += v);
    }

    fn sum(&self, field: &ScalarField) -> Scalar {
        let partials: Vec<Scalar> = field
            .as_slice()
            .par_chunks(CHUNK)
            .map(|chunk| chunk.iter().sum())
            .collect();
        partials.iter().sum()
    }

    fn sum_vector(&self, field: &VectorField) -> Vector3 {
        let partials: Vec<Vector3> = field
            .as_slice()
            .par_chunks(CHUNK)
            .map(|chunk| chunk.iter().fold(Vector3::zeros(), |acc, v| acc + v))
            .collect();
        partials.iter().fold(Vector3::zeros(), |acc, v| acc + v)
    }

    fn minmax_component(&self, field: &VectorField) -> (Scalar, Scalar) {
        if field.is_empty() {
            return (0.0, 0.0);
        }
        let partials: Vec<(Scalar, Scalar)> = field
            .as_slice()
            .par_chunks(CHUNK)
            .map(|chunk| {
                let mut lo = chunk[0].x.min(chunk[0].y).min(chunk[0].z);
                let mut hi = chunk[0].x.max(chunk[0].y).max(chunk[0].z);
                for v in chunk {
                    lo = lo.min(v.x).min(v.y).min(v.z);
                    hi = hi.max(v.x).max(v.y).max(v.z);
                }
                (lo, hi)
            })
            .collect();
        partials
            .iter()
            .fold((Scalar::INFINITY, Scalar::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.0), hi.max(p.1))
            })
    }

    fn dot(&self, a: &VectorField, b: &VectorField) -> Scalar {
        check_len(a.len(), b.len());
        let partials: Vec<Scalar> = a
            .as_slice()
            .par_chunks(CHUNK)
            .zip(b.as_slice().par_chunks(CHUNK))
            .map(|(xs, ys)| xs.iter().zip(ys).map(|(x, y)| x.dot(y)).sum())
            .collect();
        partials.iter().sum()
    }

    fn dot_per_site(&self, a: &VectorField, b: &VectorField, out: &mut ScalarField) {
        check_len(a.len(), b.len());
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .zip(b.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|((dst, x), y)| *dst = x.dot(y));
    }

    fn cross(&self, a: &VectorField, b: &VectorField, out: &mut VectorField) {
        check_len(a.len(), b.len());
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .zip(b.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|((dst, x), y)| *dst = x.cross(y));
    }

    fn normalize_vectors(&self, field: &mut VectorField) {
        field
            .as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .for_each(|v| {
                let n = v.norm();
                if n > 0.0 {
                    *v /= n;
                }
            });
    }

    fn norm(&self, field: &VectorField, out: &mut ScalarField) {
        check_len(field.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(field.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|(dst, v)| *dst = v.norm());
    }

    fn set_c_a(&self, c: Scalar, a: &VectorField, out: &mut VectorField) {
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|(dst, x)| *dst = x * c);
    }

    fn add_c_a(&self, c: Scalar, a: &VectorField, out: &mut VectorField) {
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|(dst, x)| *dst += x * c);
    }

    fn set_c_a_site(&self, c: &ScalarField, a: &VectorField, out: &mut VectorField) {
        check_len(c.len(), a.len());
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(c.as_slice().par_iter().with_min_len(CHUNK))
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|((dst, ci), x)| *dst = x * *ci);
    }

    fn add_c_a_site(&self, c: &ScalarField, a: &VectorField, out: &mut VectorField) {
        check_len(c.len(), a.len());
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(c.as_slice().par_iter().with_min_len(CHUNK))
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|((dst, ci), x)| *dst += x * *ci);
    }

    fn set_c_dot(&self, c: Scalar, a: &VectorField, b: &VectorField, out: &mut ScalarField) {
        check_len(a.len(), b.len());
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .zip(b.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|((dst, x), y)| *dst = c * x.dot(y));
    }

    fn add_c_dot(&self, c: Scalar, a: &VectorField, b: &VectorField, out: &mut ScalarField) {
        check_len(a.len(), b.len());
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .zip(b.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|((dst, x), y)| *dst += c * x.dot(y));
    }

    fn set_c_cross(&self, c: Scalar, a: &VectorField, b: &VectorField, out: &mut VectorField) {
        check_len(a.len(), b.len());
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .zip(b.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|((dst, x), y)| *dst = x.cross(y) * c);
    }

    fn add_c_cross(&self, c: Scalar, a: &VectorField, b: &VectorField, out: &mut VectorField) {
        check_len(a.len(), b.len());
        check_len(a.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(a.as_slice().par_iter().with_min_len(CHUNK))
            .zip(b.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|((dst, x), y)| *dst += x.cross(y) * c);
    }

    fn transform(&self, spins: &VectorField, force: &VectorField, out: &mut VectorField) {
        check_len(spins.len(), force.len());
        check_len(spins.len(), out.len());
        out.as_mut_slice()
            .par_iter_mut()
            .with_min_len(CHUNK)
            .zip(spins.as_slice().par_iter().with_min_len(CHUNK))
            .zip(force.as_slice().par_iter().with_min_len(CHUNK))
            .for_each(|((dst, s), f)| *dst = cayley_transform(s, f));
    }
}
