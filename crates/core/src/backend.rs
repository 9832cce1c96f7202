//! Backend trait for the vectormath kernel layer.
//!
//! Every numerical integrator step is expressible as a handful of fused
//! multiply-accumulate passes over fields plus a few reductions, so the
//! whole solver talks to hardware exclusively through [`FieldBackend`].
//! Call sites are backend-agnostic: the same code runs on the sequential
//! reference implementation, the rayon CPU backend and the CUDA backend.
//!
//! # Contract
//!
//! - Every operation is **synchronous**: it returns only after all work it
//!   launched (including device-side kernels) has completed and the result
//!   is visible through the buffer's storage view. There is no overlapping
//!   kernel or cancellation surface.
//! - All buffers passed to one call must have equal length. A mismatch is a
//!   programmer error and panics; nothing is truncated or padded.
//! - Operations are pure numerical transforms with no I/O and no retries.
//! - Reductions on parallel backends combine per-unit partial sums (tree
//!   within a unit, second pass across units). Results therefore agree with
//!   the sequential defaults only up to floating-point summation order.
//!
//! The default method bodies below are the sequential reference forms; a
//! backend overrides the ones it accelerates and inherits the rest through
//! its buffer's host storage view.

use rand::{Rng, RngCore};

use crate::field::{IntField, Scalar, ScalarField, Vector3, VectorField};

const TAU: Scalar = std::f64::consts::TAU as Scalar;

/// Host-visible view of a per-site scalar buffer.
///
/// For device-resident buffers, `as_slice`/`as_mut_slice` imply a host
/// synchronization; the view is always current when the call returns.
pub trait ScalarStorage {
    fn len(&self) -> usize;
    fn as_slice(&self) -> &[Scalar];
    fn as_mut_slice(&mut self) -> &mut [Scalar];
}

/// Host-visible view of a per-site 3-vector buffer.
pub trait VectorStorage {
    fn len(&self) -> usize;
    fn as_slice(&self) -> &[Vector3];
    fn as_mut_slice(&mut self) -> &mut [Vector3];
}

impl ScalarStorage for ScalarField {
    fn len(&self) -> usize {
        self.len()
    }

    fn as_slice(&self) -> &[Scalar] {
        self.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [Scalar] {
        self.as_mut_slice()
    }
}

impl VectorStorage for VectorField {
    fn len(&self) -> usize {
        self.len()
    }

    fn as_slice(&self) -> &[Vector3] {
        self.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [Vector3] {
        self.as_mut_slice()
    }
}

macro_rules! check_len {
    ($a:expr, $b:expr) => {
        assert_eq!($a.len(), $b.len(), "field lengths must match");
    };
}

pub trait FieldBackend {
    type ScalarBuffer: ScalarStorage + Clone;
    type VectorBuffer: VectorStorage + Clone;

    fn alloc_scalar_field(&self, n: usize) -> Self::ScalarBuffer;
    fn alloc_vector_field(&self, n: usize) -> Self::VectorBuffer;

    fn upload_scalar(&self, host: &ScalarField) -> Self::ScalarBuffer {
        let mut buf = self.alloc_scalar_field(host.len());
        buf.as_mut_slice().copy_from_slice(host.as_slice());
        buf
    }

    fn upload_vector(&self, host: &VectorField) -> Self::VectorBuffer {
        let mut buf = self.alloc_vector_field(host.len());
        buf.as_mut_slice().copy_from_slice(host.as_slice());
        buf
    }

    fn download_scalar(&self, buf: &Self::ScalarBuffer) -> ScalarField {
        ScalarField::from_vec(buf.as_slice().to_vec())
    }

    fn download_vector(&self, buf: &Self::VectorBuffer) -> VectorField {
        VectorField::from_vec(buf.as_slice().to_vec())
    }

    // ------------------------------------------------------------------
    // Fill / elementwise in-place algebra
    // ------------------------------------------------------------------

    /// Set every site to `value`.
    fn fill(&self, out: &mut Self::ScalarBuffer, value: Scalar) {
        out.as_mut_slice().fill(value);
    }

    /// Set every site with a nonzero mask entry to `value`.
    fn fill_masked(&self, out: &mut Self::ScalarBuffer, value: Scalar, mask: &IntField) {
        check_len!(out, mask);
        for (dst, m) in out.as_mut_slice().iter_mut().zip(mask.as_slice()) {
            if *m != 0 {
                *dst = value;
            }
        }
    }

    fn fill_vector(&self, out: &mut Self::VectorBuffer, value: Vector3) {
        out.as_mut_slice().fill(value);
    }

    fn fill_vector_masked(&self, out: &mut Self::VectorBuffer, value: Vector3, mask: &IntField) {
        check_len!(out, mask);
        for (dst, m) in out.as_mut_slice().iter_mut().zip(mask.as_slice()) {
            if *m != 0 {
                *dst = value;
            }
        }
    }

    /// Elementwise multiply in place.
    fn scale(&self, out: &mut Self::ScalarBuffer, c: Scalar) {
        for dst in out.as_mut_slice() {
            *dst *= c;
        }
    }

    /// Elementwise add in place.
    fn add(&self, out: &mut Self::ScalarBuffer, c: Scalar) {
        for dst in out.as_mut_slice() {
            *dst += c;
        }
    }

    fn scale_vector(&self, out: &mut Self::VectorBuffer, c: Scalar) {
        for dst in out.as_mut_slice() {
            *dst *= c;
        }
    }

    fn add_vector(&self, out: &mut Self::VectorBuffer, v: Vector3) {
        for dst in out.as_mut_slice() {
            *dst += v;
        }
    }

    // ------------------------------------------------------------------
    // Reductions
    // ------------------------------------------------------------------

    /// Full reduction over all sites.
    fn sum(&self, field: &Self::ScalarBuffer) -> Scalar {
        field.as_slice().iter().sum()
    }

    fn sum_vector(&self, field: &Self::VectorBuffer) -> Vector3 {
        field
            .as_slice()
            .iter()
            .fold(Vector3::zeros(), |acc, v| acc + v)
    }

    fn mean(&self, field: &Self::ScalarBuffer) -> Scalar {
        self.sum(field) / field.len().max(1) as Scalar
    }

    fn mean_vector(&self, field: &Self::VectorBuffer) -> Vector3 {
        self.sum_vector(field) / field.len().max(1) as Scalar
    }

    /// (min, max) over all scalar components of all vectors.
    /// An empty field yields `(0, 0)`.
    fn minmax_component(&self, field: &Self::VectorBuffer) -> (Scalar, Scalar) {
        let mut iter = field.as_slice().iter();
        let Some(first) = iter.next() else {
            return (0.0, 0.0);
        };
        let mut lo = first.x.min(first.y).min(first.z);
        let mut hi = first.x.max(first.y).max(first.z);
        for v in iter {
            lo = lo.min(v.x).min(v.y).min(v.z);
            hi = hi.max(v.x).max(v.y).max(v.z);
        }
        (lo, hi)
    }

    /// Magnitude bound used for convergence checks and step-size control.
    fn max_abs_component(&self, field: &Self::VectorBuffer) -> Scalar {
        let (lo, hi) = self.minmax_component(field);
        lo.abs().max(hi.abs())
    }

    /// Scalar reduction: sum of per-site dot products.
    fn dot(&self, a: &Self::VectorBuffer, b: &Self::VectorBuffer) -> Scalar {
        check_len!(a, b);
        a.as_slice()
            .iter()
            .zip(b.as_slice())
            .map(|(x, y)| x.dot(y))
            .sum()
    }

    // ------------------------------------------------------------------
    // Elementwise products
    // ------------------------------------------------------------------

    /// Per-site dot product written to a scalar field.
    fn dot_per_site(
        &self,
        a: &Self::VectorBuffer,
        b: &Self::VectorBuffer,
        out: &mut Self::ScalarBuffer,
    ) {
        check_len!(a, b);
        check_len!(a, out);
        for ((x, y), dst) in a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .zip(out.as_mut_slice())
        {
            *dst = x.dot(y);
        }
    }

    /// Per-site cross product `out[i] = a[i] × b[i]`.
    fn cross(
        &self,
        a: &Self::VectorBuffer,
        b: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
    ) {
        check_len!(a, b);
        check_len!(a, out);
        for ((x, y), dst) in a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .zip(out.as_mut_slice())
        {
            *dst = x.cross(y);
        }
    }

    /// Per-site unit normalization; zero vectors stay zero.
    fn normalize_vectors(&self, field: &mut Self::VectorBuffer) {
        for v in field.as_mut_slice() {
            let n = v.norm();
            if n > 0.0 {
                *v /= n;
            }
        }
    }

    /// Per-site magnitude written to a scalar field.
    fn norm(&self, field: &Self::VectorBuffer, out: &mut Self::ScalarBuffer) {
        check_len!(field, out);
        for (v, dst) in field.as_slice().iter().zip(out.as_mut_slice()) {
            *dst = v.norm();
        }
    }

    // ------------------------------------------------------------------
    // Fused multiply-accumulate family
    //
    // `set_*` overwrites, `add_*` accumulates; `_vec` broadcasts a single
    // vector over all sites, `_site` takes a per-site coefficient field.
    // Fusing these keeps an integrator step at a small number of passes.
    // ------------------------------------------------------------------

    /// `out[i] = c * a[i]`
    fn set_c_a(&self, c: Scalar, a: &Self::VectorBuffer, out: &mut Self::VectorBuffer) {
        check_len!(a, out);
        for (x, dst) in a.as_slice().iter().zip(out.as_mut_slice()) {
            *dst = x * c;
        }
    }

    fn set_c_a_masked(
        &self,
        c: Scalar,
        a: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
        mask: &IntField,
    ) {
        check_len!(a, out);
        check_len!(a, mask);
        for ((x, dst), m) in a
            .as_slice()
            .iter()
            .zip(out.as_mut_slice())
            .zip(mask.as_slice())
        {
            if *m != 0 {
                *dst = x * c;
            }
        }
    }

    /// `out[i] = c * a` (broadcast).
    fn set_c_a_vec(&self, c: Scalar, a: Vector3, out: &mut Self::VectorBuffer) {
        out.as_mut_slice().fill(c * a);
    }

    fn set_c_a_vec_masked(
        &self,
        c: Scalar,
        a: Vector3,
        out: &mut Self::VectorBuffer,
        mask: &IntField,
    ) {
        check_len!(out, mask);
        let ca = c * a;
        for (dst, m) in out.as_mut_slice().iter_mut().zip(mask.as_slice()) {
            if *m != 0 {
                *dst = ca;
            }
        }
    }

    /// `out[i] = c[i] * a[i]` (per-site coefficient).
    fn set_c_a_site(
        &self,
        c: &Self::ScalarBuffer,
        a: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
    ) {
        check_len!(c, a);
        check_len!(a, out);
        for ((ci, x), dst) in c
            .as_slice()
            .iter()
            .zip(a.as_slice())
            .zip(out.as_mut_slice())
        {
            *dst = x * *ci;
        }
    }

    /// `out[i] += c * a[i]`
    fn add_c_a(&self, c: Scalar, a: &Self::VectorBuffer, out: &mut Self::VectorBuffer) {
        check_len!(a, out);
        for (x, dst) in a.as_slice().iter().zip(out.as_mut_slice()) {
            *dst += x * c;
        }
    }

    fn add_c_a_masked(
        &self,
        c: Scalar,
        a: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
        mask: &IntField,
    ) {
        check_len!(a, out);
        check_len!(a, mask);
        for ((x, dst), m) in a
            .as_slice()
            .iter()
            .zip(out.as_mut_slice())
            .zip(mask.as_slice())
        {
            if *m != 0 {
                *dst += x * c;
            }
        }
    }

    /// `out[i] += c * a` (broadcast).
    fn add_c_a_vec(&self, c: Scalar, a: Vector3, out: &mut Self::VectorBuffer) {
        let ca = c * a;
        for dst in out.as_mut_slice() {
            *dst += ca;
        }
    }

    fn add_c_a_vec_masked(
        &self,
        c: Scalar,
        a: Vector3,
        out: &mut Self::VectorBuffer,
        mask: &IntField,
    ) {
        check_len!(out, mask);
        let ca = c * a;
        for (dst, m) in out.as_mut_slice().iter_mut().zip(mask.as_slice()) {
            if *m != 0 {
                *dst += ca;
            }
        }
    }

    /// `out[i] += c[i] * a[i]` (per-site coefficient).
    fn add_c_a_site(
        &self,
        c: &Self::ScalarBuffer,
        a: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
    ) {
        check_len!(c, a);
        check_len!(a, out);
        for ((ci, x), dst) in c
            .as_slice()
            .iter()
            .zip(a.as_slice())
            .zip(out.as_mut_slice())
        {
            *dst += x * *ci;
        }
    }

    /// `out[i] = c * (a[i] · b[i])`
    fn set_c_dot(
        &self,
        c: Scalar,
        a: &Self::VectorBuffer,
        b: &Self::VectorBuffer,
        out: &mut Self::ScalarBuffer,
    ) {
        check_len!(a, b);
        check_len!(a, out);
        for ((x, y), dst) in a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .zip(out.as_mut_slice())
        {
            *dst = c * x.dot(y);
        }
    }

    /// `out[i] += c * (a[i] · b[i])`
    fn add_c_dot(
        &self,
        c: Scalar,
        a: &Self::VectorBuffer,
        b: &Self::VectorBuffer,
        out: &mut Self::ScalarBuffer,
    ) {
        check_len!(a, b);
        check_len!(a, out);
        for ((x, y), dst) in a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .zip(out.as_mut_slice())
        {
            *dst += c * x.dot(y);
        }
    }

    /// `out[i] = c * (a · b[i])` (broadcast `a`).
    fn set_c_dot_vec(
        &self,
        c: Scalar,
        a: Vector3,
        b: &Self::VectorBuffer,
        out: &mut Self::ScalarBuffer,
    ) {
        check_len!(b, out);
        for (y, dst) in b.as_slice().iter().zip(out.as_mut_slice()) {
            *dst = c * a.dot(y);
        }
    }

    /// `out[i] += c * (a · b[i])` (broadcast `a`).
    fn add_c_dot_vec(
        &self,
        c: Scalar,
        a: Vector3,
        b: &Self::VectorBuffer,
        out: &mut Self::ScalarBuffer,
    ) {
        check_len!(b, out);
        for (y, dst) in b.as_slice().iter().zip(out.as_mut_slice()) {
            *dst += c * a.dot(y);
        }
    }

    /// `out[i] = c * (a[i] × b[i])`
    fn set_c_cross(
        &self,
        c: Scalar,
        a: &Self::VectorBuffer,
        b: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
    ) {
        check_len!(a, b);
        check_len!(a, out);
        for ((x, y), dst) in a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .zip(out.as_mut_slice())
        {
            *dst = c * x.cross(y);
        }
    }

    /// `out[i] += c * (a[i] × b[i])`
    fn add_c_cross(
        &self,
        c: Scalar,
        a: &Self::VectorBuffer,
        b: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
    ) {
        check_len!(a, b);
        check_len!(a, out);
        for ((x, y), dst) in a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .zip(out.as_mut_slice())
        {
            *dst += c * x.cross(y);
        }
    }

    /// `out[i] = c * (a × b[i])` (broadcast `a`).
    fn set_c_cross_vec(
        &self,
        c: Scalar,
        a: Vector3,
        b: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
    ) {
        check_len!(b, out);
        for (y, dst) in b.as_slice().iter().zip(out.as_mut_slice()) {
            *dst = c * a.cross(y);
        }
    }

    /// `out[i] += c * (a × b[i])` (broadcast `a`).
    fn add_c_cross_vec(
        &self,
        c: Scalar,
        a: Vector3,
        b: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
    ) {
        check_len!(b, out);
        for (y, dst) in b.as_slice().iter().zip(out.as_mut_slice()) {
            *dst += c * a.cross(y);
        }
    }

    // ------------------------------------------------------------------
    // Integrator kernels
    // ------------------------------------------------------------------

    /// Cayley-transform update used by the semi-implicit integrators.
    ///
    /// Per site, with `A = force[i] / 2` and `a' = s − s × A`, applies the
    /// closed form of `(I + A×)(I − A×)⁻¹`:
    ///
    /// `out = M(A) · a' / (1 + A·A)` with
    /// `M = [[AxAx+1, AxAy−Az, AxAz+Ay],
    ///       [AyAx+Az, AyAy+1, AyAz−Ax],
    ///       [AzAx−Ay, AzAy+Ax, AzAz+1]]`.
    ///
    /// The rotation is exactly norm-preserving; implementations must follow
    /// this expansion coefficient for coefficient rather than approximate it.
    fn transform(
        &self,
        spins: &Self::VectorBuffer,
        force: &Self::VectorBuffer,
        out: &mut Self::VectorBuffer,
    ) {
        check_len!(spins, force);
        check_len!(spins, out);
        for ((s, f), dst) in spins
            .as_slice()
            .iter()
            .zip(force.as_slice())
            .zip(out.as_mut_slice())
        {
            *dst = cayley_transform(s, f);
        }
    }

    // ------------------------------------------------------------------
    // Random fields
    //
    // Host-side by construction; device backends upload the result. The
    // caller owns the RNG, so fixed-seed reproducibility is preserved
    // across backends.
    // ------------------------------------------------------------------

    /// Fill with vectors whose components are i.i.d. uniform in [-1, 1).
    fn random_vectorfield(&self, rng: &mut dyn RngCore, out: &mut Self::VectorBuffer) {
        for v in out.as_mut_slice() {
            *v = Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
        }
    }

    /// Fill with uniformly distributed unit vectors using the rejection-free
    /// z/phi parametrization.
    fn random_unitsphere(&self, rng: &mut dyn RngCore, out: &mut Self::VectorBuffer) {
        for v in out.as_mut_slice() {
            *v = random_unit_vector(rng);
        }
    }
}

/// Single-site Cayley transform; shared by all host-side backends.
#[inline]
pub fn cayley_transform(s: &Vector3, f: &Vector3) -> Vector3 {
    let a = f * 0.5;
    let inv_det = 1.0 / (1.0 + a.norm_squared());
    let ap = s - s.cross(&a);
    Vector3::new(
        (ap.x * (a.x * a.x + 1.0) + ap.y * (a.x * a.y - a.z) + ap.z * (a.x * a.z + a.y)) * inv_det,
        (ap.x * (a.y * a.x + a.z) + ap.y * (a.y * a.y + 1.0) + ap.z * (a.y * a.z - a.x)) * inv_det,
        (ap.x * (a.z * a.x - a.y) + ap.y * (a.z * a.y + a.x) + ap.z * (a.z * a.z + 1.0)) * inv_det,
    )
}

/// Draw one uniformly distributed unit vector: `v_z` and `phi` uniform,
/// vector `(sqrt(1-v_z²)cos(2π·phi), sqrt(1-v_z²)sin(2π·phi), v_z)`.
#[inline]
pub fn random_unit_vector(rng: &mut dyn RngCore) -> Vector3 {
    let z: Scalar = rng.gen_range(-1.0..1.0);
    let phi: Scalar = rng.gen_range(0.0..1.0);
    let r = (1.0 - z * z).sqrt();
    let (sin, cos) = (TAU * phi).sin_cos();
    Vector3::new(r * cos, r * sin, z)
}
