//! CUDA vector-math backend using cudarc when enabled.
//!
//! With the `cuda` feature disabled this crate still compiles and exposes
//! the same types; the buffers are then plain host fields and every
//! operation runs the sequential defaults.
//!
//! # Memory model
//!
//! `CudaScalarField` / `CudaVectorField` keep data on both host and device:
//! device storage is always f64 (`[x, y, z, ...]` triplets for vectors,
//! converted at the sync boundary when the crate is built single-precision),
//! while the host cache uses the crate-wide `Scalar`/`Vector3` types.
//! Synchronization is lazy with dirty flags in each direction; the storage
//! views `as_slice`/`as_mut_slice` always hand out current host data.
//!
//! Every backend operation synchronizes the stream before returning, so the
//! synchronous contract of `FieldBackend` holds: once a call returns, its
//! result is visible through the buffer's storage view. Operations without a
//! device kernel (masked fills, broadcast dot/cross variants, random fields,
//! componentwise min/max) run the sequential defaults through the host view.

use spinlat_core::backend::FieldBackend;
#[cfg(not(feature = "cuda"))]
use spinlat_core::field::{ScalarField, VectorField};

#[cfg(feature = "cuda")]
use std::sync::Arc;

#[cfg(feature = "cuda")]
use cudarc::driver::{CudaContext, CudaStream};

#[cfg(feature = "cuda")]
use spinlat_core::field::{Scalar, ScalarField, Vector3, VectorField};

pub mod kernels;

#[cfg(feature = "cuda")]
use kernels::SpinKernels;

/// CUDA backend on device 0. Falls back to a host stub without the `cuda`
/// feature.
pub struct CudaBackend {
    #[cfg(feature = "cuda")]
    ctx: Arc<CudaContext>,
    #[cfg(feature = "cuda")]
    stream: Arc<CudaStream>,
    #[cfg(feature = "cuda")]
    kernels: Arc<SpinKernels>,
}

impl CudaBackend {
    /// Create a backend on device 0; `None` if no device is usable or the
    /// kernels fail to compile.
    #[cfg(feature = "cuda")]
    pub fn try_new() -> Option<Self> {
        let ctx = CudaContext::new(0).ok()?;
        let kernels = SpinKernels::new(&ctx).ok()?;
        let stream = ctx.default_stream();
        Some(Self {
            ctx,
            stream,
            kernels: Arc::new(kernels),
        })
    }

    /// Create a backend, panicking if CUDA is unavailable.
    pub fn new() -> Self {
        #[cfg(feature = "cuda")]
        {
            Self::try_new().expect("failed to initialize CUDA device 0")
        }
        #[cfg(not(feature = "cuda"))]
        {
            Self {}
        }
    }

    #[cfg(feature = "cuda")]
    pub fn is_available() -> bool {
        CudaContext::new(0).is_ok()
    }

    #[cfg(not(feature = "cuda"))]
    pub fn is_available() -> bool {
        false
    }

    #[cfg(feature = "cuda")]
    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }
}

impl Default for CudaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CudaBackend {
    fn clone(&self) -> Self {
        #[cfg(feature = "cuda")]
        {
            Self {
                ctx: Arc::clone(&self.ctx),
                stream: Arc::clone(&self.stream),
                kernels: Arc::clone(&self.kernels),
            }
        }
        #[cfg(not(feature = "cuda"))]
        {
            Self {}
        }
    }
}

#[cfg(feature = "cuda")]
mod gpu_field {
    use std::cell::{Cell, UnsafeCell};

    use cudarc::driver::CudaSlice;
    use spinlat_core::backend::{ScalarStorage, VectorStorage};

    use super::*;

    fn scalars_to_f64(data: &[Scalar]) -> Vec<f64> {
        data.iter().map(|&v| v as f64).collect()
    }

    fn vectors_to_f64(data: &[Vector3]) -> Vec<f64> {
        let mut out = Vec::with_capacity(data.len() * 3);
        for v in data {
            out.push(v.x as f64);
            out.push(v.y as f64);
            out.push(v.z as f64);
        }
        out
    }

    /// Per-site scalar buffer with device-resident primary storage.
    ///
    /// Lazy synchronization: device kernels set `host_dirty`, the host views
    /// refresh on demand, and host writes set `device_dirty` so the next
    /// kernel re-uploads. Interior mutability (UnsafeCell/Cell) makes the
    /// refresh possible behind `&self`; the type is !Sync, which rules out
    /// aliased access across threads.
    pub struct CudaScalarField {
        n: usize,
        device_data: UnsafeCell<CudaSlice<f64>>,
        host_cache: UnsafeCell<Vec<Scalar>>,
        stream: Arc<CudaStream>,
        host_dirty: Cell<bool>,
        device_dirty: Cell<bool>,
    }

    impl CudaScalarField {
        pub fn zeros(stream: Arc<CudaStream>, n: usize) -> Self {
            let device_data = stream
                .alloc_zeros::<f64>(n)
                .expect("failed to allocate GPU memory");
            Self {
                n,
                device_data: UnsafeCell::new(device_data),
                host_cache: UnsafeCell::new(vec![0.0; n]),
                stream,
                host_dirty: Cell::new(false),
                device_dirty: Cell::new(false),
            }
        }

        pub fn from_host(stream: Arc<CudaStream>, data: Vec<Scalar>) -> Self {
            let device_data = stream
                .clone_htod(&scalars_to_f64(&data))
                .expect("failed to copy data to GPU");
            Self {
                n: data.len(),
                device_data: UnsafeCell::new(device_data),
                host_cache: UnsafeCell::new(data),
                stream,
                host_dirty: Cell::new(false),
                device_dirty: Cell::new(false),
            }
        }

        pub fn mark_device_modified(&self) {
            self.host_dirty.set(true);
        }

        fn ensure_host_current(&self) {
            if self.host_dirty.get() {
                // Safety: !Sync plus the dirty-flag protocol rule out aliased
                // mutable access here.
                let device_data = unsafe { &*self.device_data.get() };
                let host_cache = unsafe { &mut *self.host_cache.get() };
                let raw: Vec<f64> = self
                    .stream
                    .clone_dtoh(device_data)
                    .expect("failed to sync device to host");
                for (dst, src) in host_cache.iter_mut().zip(&raw) {
                    *dst = *src as Scalar;
                }
                self.host_dirty.set(false);
            }
        }

        fn ensure_device_current(&self) {
            if self.device_dirty.get() {
                let host_cache = unsafe { &*self.host_cache.get() };
                let device_data = unsafe { &mut *self.device_data.get() };
                self.stream
                    .memcpy_htod(&scalars_to_f64(host_cache), device_data)
                    .expect("failed to sync host to device");
                self.device_dirty.set(false);
            }
        }

        pub fn with_device_data<F, R>(&self, f: F) -> R
        where
            F: FnOnce(&CudaSlice<f64>) -> R,
        {
            self.ensure_device_current();
            let device_data = unsafe { &*self.device_data.get() };
            f(device_data)
        }

        pub fn with_device_data_mut<F, R>(&self, f: F) -> R
        where
            F: FnOnce(&mut CudaSlice<f64>) -> R,
        {
            self.ensure_device_current();
            let device_data = unsafe { &mut *self.device_data.get() };
            let result = f(device_data);
            self.host_dirty.set(true);
            result
        }
    }

    impl Clone for CudaScalarField {
        fn clone(&self) -> Self {
            self.ensure_host_current();
            let host_cache = unsafe { &*self.host_cache.get() };
            Self::from_host(Arc::clone(&self.stream), host_cache.clone())
        }
    }

    impl ScalarStorage for CudaScalarField {
        fn len(&self) -> usize {
            self.n
        }

        fn as_slice(&self) -> &[Scalar] {
            self.ensure_host_current();
            unsafe { (*self.host_cache.get()).as_slice() }
        }

        fn as_mut_slice(&mut self) -> &mut [Scalar] {
            self.ensure_host_current();
            self.device_dirty.set(true);
            unsafe { (*self.host_cache.get()).as_mut_slice() }
        }
    }

    /// Per-site 3-vector buffer; device layout is `[x, y, z, x, y, z, ...]`
    /// with `3 * n` doubles. Same synchronization protocol as
    /// [`CudaScalarField`].
    pub struct CudaVectorField {
        n: usize,
        device_data: UnsafeCell<CudaSlice<f64>>,
        host_cache: UnsafeCell<Vec<Vector3>>,
        stream: Arc<CudaStream>,
        host_dirty: Cell<bool>,
        device_dirty: Cell<bool>,
    }

    impl CudaVectorField {
        pub fn zeros(stream: Arc<CudaStream>, n: usize) -> Self {
            let device_data = stream
                .alloc_zeros::<f64>(n * 3)
                .expect("failed to allocate GPU memory");
            Self {
                n,
                device_data: UnsafeCell::new(device_data),
                host_cache: UnsafeCell::new(vec![Vector3::zeros(); n]),
                stream,
                host_dirty: Cell::new(false),
                device_dirty: Cell::new(false),
            }
        }

        pub fn from_host(stream: Arc<CudaStream>, data: Vec<Vector3>) -> Self {
            let device_data = stream
                .clone_htod(&vectors_to_f64(&data))
                .expect("failed to copy data to GPU");
            Self {
                n: data.len(),
                device_data: UnsafeCell::new(device_data),
                host_cache: UnsafeCell::new(data),
                stream,
                host_dirty: Cell::new(false),
                device_dirty: Cell::new(false),
            }
        }

        pub fn mark_device_modified(&self) {
            self.host_dirty.set(true);
        }

        fn ensure_host_current(&self) {
            if self.host_dirty.get() {
                let device_data = unsafe { &*self.device_data.get() };
                let host_cache = unsafe { &mut *self.host_cache.get() };
                let raw: Vec<f64> = self
                    .stream
                    .clone_dtoh(device_data)
                    .expect("failed to sync device to host");
                for (dst, src) in host_cache.iter_mut().zip(raw.chunks_exact(3)) {
                    *dst = Vector3::new(src[0] as Scalar, src[1] as Scalar, src[2] as Scalar);
                }
                self.host_dirty.set(false);
            }
        }

        fn ensure_device_current(&self) {
            if self.device_dirty.get() {
                let host_cache = unsafe { &*self.host_cache.get() };
                let device_data = unsafe { &mut *self.device_data.get() };
                self.stream
                    .memcpy_htod(&vectors_to_f64(host_cache), device_data)
                    .expect("failed to sync host to device");
                self.device_dirty.set(false);
            }
        }

        pub fn with_device_data<F, R>(&self, f: F) -> R
        where
            F: FnOnce(&CudaSlice<f64>) -> R,
        {
            self.ensure_device_current();
            let device_data = unsafe { &*self.device_data.get() };
            f(device_data)
        }

        pub fn with_device_data_mut<F, R>(&self, f: F) -> R
        where
            F: FnOnce(&mut CudaSlice<f64>) -> R,
        {
            self.ensure_device_current();
            let device_data = unsafe { &mut *self.device_data.get() };
            let result = f(device_data);
            self.host_dirty.set(true);
            result
        }
    }

    impl Clone for CudaVectorField {
        fn clone(&self) -> Self {
            self.ensure_host_current();
            let host_cache = unsafe { &*self.host_cache.get() };
            Self::from_host(Arc::clone(&self.stream), host_cache.clone())
        }
    }

    impl VectorStorage for CudaVectorField {
        fn len(&self) -> usize {
            self.n
        }

        fn as_slice(&self) -> &[Vector3] {
            self.ensure_host_current();
            unsafe { (*self.host_cache.get()).as_slice() }
        }

        fn as_mut_slice(&mut self) -> &mut [Vector3] {
            self.ensure_host_current();
            self.device_dirty.set(true);
            unsafe { (*self.host_cache.get()).as_mut_slice() }
        }
    }
}

#[cfg(feature = "cuda")]
pub use gpu_field::{CudaScalarField, CudaVectorField};

#[cfg(not(feature = "cuda"))]
mod stub_field {
    use spinlat_core::backend::{ScalarStorage, VectorStorage};
    use spinlat_core::field::{Scalar, Vector3};

    use super::*;

    /// Host-only stand-in when the `cuda` feature is disabled.
    #[derive(Clone)]
    pub struct CudaScalarField {
        data: ScalarField,
    }

    impl CudaScalarField {
        pub fn zeros(n: usize) -> Self {
            Self {
                data: ScalarField::zeros(n),
            }
        }
    }

    impl ScalarStorage for CudaScalarField {
        fn len(&self) -> usize {
            self.data.len()
        }

        fn as_slice(&self) -> &[Scalar] {
            self.data.as_slice()
        }

        fn as_mut_slice(&mut self) -> &mut [Scalar] {
            self.data.as_mut_slice()
        }
    }

    #[derive(Clone)]
    pub struct CudaVectorField {
        data: VectorField,
    }

    impl CudaVectorField {
        pub fn zeros(n: usize) -> Self {
            Self {
                data: VectorField::zeros(n),
            }
        }
    }

    impl VectorStorage for CudaVectorField {
        fn len(&self) -> usize {
            self.data.len()
        }

        fn as_slice(&self) -> &[Vector3] {
            self.data.as_slice()
        }

        fn as_mut_slice(&mut self) -> &mut [Vector3] {
            self.data.as_mut_slice()
        }
    }
}

#[cfg(not(feature = "cuda"))]
pub use stub_field::{CudaScalarField, CudaVectorField};

#[cfg(feature = "cuda")]
impl FieldBackend for CudaBackend {
    type ScalarBuffer = CudaScalarField;
    type VectorBuffer = CudaVectorField;

    fn alloc_scalar_field(&self, n: usize) -> CudaScalarField {
        CudaScalarField::zeros(Arc::clone(&self.stream), n)
    }

    fn alloc_vector_field(&self, n: usize) -> CudaVectorField {
        CudaVectorField::zeros(Arc::clone(&self.stream), n)
    }

    fn upload_scalar(&self, host: &ScalarField) -> CudaScalarField {
        CudaScalarField::from_host(Arc::clone(&self.stream), host.as_slice().to_vec())
    }

    fn upload_vector(&self, host: &VectorField) -> CudaVectorField {
        CudaVectorField::from_host(Arc::clone(&self.stream), host.as_slice().to_vec())
    }

    fn fill(&self, out: &mut CudaScalarField, value: Scalar) {
        let n = spinlat_core::backend::ScalarStorage::len(out);
        out.with_device_data_mut(|data| unsafe {
            self.kernels
                .fill(&self.stream, data, value as f64, n)
                .expect("fill kernel launch failed");
        });
        self.synchronize();
    }

    fn fill_vector(&self, out: &mut CudaVectorField, value: Vector3) {
        let n = spinlat_core::backend::VectorStorage::len(out);
        out.with_device_data_mut(|data| unsafe {
            self.kernels
                .fill_vec3(
                    &self.stream,
                    data,
                    [value.x as f64, value.y as f64, value.z as f64],
                    n,
                )
                .expect("fill kernel launch failed");
        });
        self.synchronize();
    }

    fn scale(&self, out: &mut CudaScalarField, c: Scalar) {
        let n = spinlat_core::backend::ScalarStorage::len(out);
        out.with_device_data_mut(|data| unsafe {
            self.kernels
                .scale(&self.stream, data, c as f64, n)
                .expect("scale kernel launch failed");
        });
        self.synchronize();
    }

    fn add(&self, out: &mut CudaScalarField, c: Scalar) {
        let n = spinlat_core::backend::ScalarStorage::len(out);
        out.with_device_data_mut(|data| unsafe {
            self.kernels
                .add_value(&self.stream, data, c as f64, n)
                .expect("add kernel launch failed");
        });
        self.synchronize();
    }

    fn scale_vector(&self, out: &mut CudaVectorField, c: Scalar) {
        let n = spinlat_core::backend::VectorStorage::len(out);
        out.with_device_data_mut(|data| unsafe {
            self.kernels
                .scale(&self.stream, data, c as f64, 3 * n)
                .expect("scale kernel launch failed");
        });
        self.synchronize();
    }

    fn add_vector(&self, out: &mut CudaVectorField, v: Vector3) {
        let n = spinlat_core::backend::VectorStorage::len(out);
        out.with_device_data_mut(|data| unsafe {
            self.kernels
                .add_vec3(&self.stream, data, [v.x as f64, v.y as f64, v.z as f64], n)
                .expect("add kernel launch failed");
        });
        self.synchronize();
    }

    fn sum(&self, field: &CudaScalarField) -> Scalar {
        let n = spinlat_core::backend::ScalarStorage::len(field);
        if n == 0 {
            return 0.0;
        }
        let partials = field.with_device_data(|data| {
            let mut partials = self
                .stream
                .alloc_zeros::<f64>(SpinKernels::partial_count(n))
                .expect("failed to allocate GPU memory");
            unsafe {
                self.kernels
                    .reduce_sum(&self.stream, data, &mut partials, n)
                    .expect("reduction kernel launch failed");
            }
            self.stream
                .clone_dtoh(&partials)
                .expect("failed to sync device to host")
        });
        self.synchronize();
        partials.iter().sum::<f64>() as Scalar
    }

    fn dot(&self, a: &CudaVectorField, b: &CudaVectorField) -> Scalar {
        let n = spinlat_core::backend::VectorStorage::len(a);
        assert_eq!(
            n,
            spinlat_core::backend::VectorStorage::len(b),
            "field lengths must match"
        );
        if n == 0 {
            return 0.0;
        }
        let partials = a.with_device_data(|a_data| {
            b.with_device_data(|b_data| {
                let mut partials = self
                    .stream
                    .alloc_zeros::<f64>(SpinKernels::partial_count(n))
                    .expect("failed to allocate GPU memory");
                unsafe {
                    self.kernels
                        .reduce_dot(&self.stream, a_data, b_data, &mut partials, n)
                        .expect("reduction kernel launch failed");
                }
                self.stream
                    .clone_dtoh(&partials)
                    .expect("failed to sync device to host")
            })
        });
        self.synchronize();
        partials.iter().sum::<f64>() as Scalar
    }

    fn dot_per_site(&self, a: &CudaVectorField, b: &CudaVectorField, out: &mut CudaScalarField) {
        let n = spinlat_core::backend::VectorStorage::len(a);
        assert_eq!(
            n,
            spinlat_core::backend::VectorStorage::len(b),
            "field lengths must match"
        );
        assert_eq!(
            n,
            spinlat_core::backend::ScalarStorage::len(out),
            "field lengths must match"
        );
        a.with_device_data(|a_data| {
            b.with_device_data(|b_data| {
                out.with_device_data_mut(|out_data| unsafe {
                    self.kernels
                        .dot_per_site(&self.stream, a_data, b_data, out_data, n)
                        .expect("dot kernel launch failed");
                });
            });
        });
        self.synchronize();
    }

    fn cross(&self, a: &CudaVectorField, b: &CudaVectorField, out: &mut CudaVectorField) {
        self.launch_cross(a, b, out, 1.0, false);
    }

    fn set_c_cross(
        &self,
        c: Scalar,
        a: &CudaVectorField,
        b: &CudaVectorField,
        out: &mut CudaVectorField,
    ) {
        self.launch_cross(a, b, out, c as f64, false);
    }

    fn add_c_cross(
        &self,
        c: Scalar,
        a: &CudaVectorField,
        b: &CudaVectorField,
        out: &mut CudaVectorField,
    ) {
        self.launch_cross(a, b, out, c as f64, true);
    }

    fn set_c_a(&self, c: Scalar, a: &CudaVectorField, out: &mut CudaVectorField) {
        self.launch_scaled(a, out, c as f64, false);
    }

    fn add_c_a(&self, c: Scalar, a: &CudaVectorField, out: &mut CudaVectorField) {
        self.launch_scaled(a, out, c as f64, true);
    }

    fn set_c_a_site(&self, c: &CudaScalarField, a: &CudaVectorField, out: &mut CudaVectorField) {
        self.launch_site_scaled(c, a, out, false);
    }

    fn add_c_a_site(&self, c: &CudaScalarField, a: &CudaVectorField, out: &mut CudaVectorField) {
        self.launch_site_scaled(c, a, out, true);
    }

    fn normalize_vectors(&self, field: &mut CudaVectorField) {
        let n = spinlat_core::backend::VectorStorage::len(field);
        field.with_device_data_mut(|data| unsafe {
            self.kernels
                .normalize(&self.stream, data, n)
                .expect("normalize kernel launch failed");
        });
        self.synchronize();
    }

    fn norm(&self, field: &CudaVectorField, out: &mut CudaScalarField) {
        let n = spinlat_core::backend::VectorStorage::len(field);
        assert_eq!(
            n,
            spinlat_core::backend::ScalarStorage::len(out),
            "field lengths must match"
        );
        field.with_device_data(|field_data| {
            out.with_device_data_mut(|out_data| unsafe {
                self.kernels
                    .norm(&self.stream, field_data, out_data, n)
                    .expect("norm kernel launch failed");
            });
        });
        self.synchronize();
    }

    fn transform(
        &self,
        spins: &CudaVectorField,
        force: &CudaVectorField,
        out: &mut CudaVectorField,
    ) {
        let n = spinlat_core::backend::VectorStorage::len(spins);
        assert_eq!(
            n,
            spinlat_core::backend::VectorStorage::len(force),
            "field lengths must match"
        );
        assert_eq!(
            n,
            spinlat_core::backend::VectorStorage::len(out),
            "field lengths must match"
        );
        spins.with_device_data(|spins_data| {
            force.with_device_data(|force_data| {
                out.with_device_data_mut(|out_data| unsafe {
                    self.kernels
                        .cayley(&self.stream, spins_data, force_data, out_data, n)
                        .expect("transform kernel launch failed");
                });
            });
        });
        self.synchronize();
    }
}

#[cfg(feature = "cuda")]
impl CudaBackend {
    fn synchronize(&self) {
        self.stream
            .synchronize()
            .expect("stream synchronization failed");
    }

    fn launch_scaled(
        &self,
        a: &CudaVectorField,
        out: &mut CudaVectorField,
        c: f64,
        accumulate: bool,
    ) {
        use spinlat_core::backend::VectorStorage;
        let n = a.len();
        assert_eq!(n, out.len(), "field lengths must match");
        a.with_device_data(|a_data| {
            out.with_device_data_mut(|out_data| unsafe {
                let result = if accumulate {
                    self.kernels.add_scaled(&self.stream, out_data, a_data, c, 3 * n)
                } else {
                    self.kernels.set_scaled(&self.stream, out_data, a_data, c, 3 * n)
                };
                result.expect("scaled-add kernel launch failed");
            });
        });
        self.synchronize();
    }

    fn launch_site_scaled(
        &self,
        c: &CudaScalarField,
        a: &CudaVectorField,
        out: &mut CudaVectorField,
        accumulate: bool,
    ) {
        use spinlat_core::backend::{ScalarStorage, VectorStorage};
        let n = a.len();
        assert_eq!(n, ScalarStorage::len(c), "field lengths must match");
        assert_eq!(n, out.len(), "field lengths must match");
        c.with_device_data(|c_data| {
            a.with_device_data(|a_data| {
                out.with_device_data_mut(|out_data| unsafe {
                    self.kernels
                        .site_scaled(&self.stream, out_data, c_data, a_data, n, accumulate)
                        .expect("scaled-add kernel launch failed");
                });
            });
        });
        self.synchronize();
    }

    fn launch_cross(
        &self,
        a: &CudaVectorField,
        b: &CudaVectorField,
        out: &mut CudaVectorField,
        c: f64,
        accumulate: bool,
    ) {
        use spinlat_core::backend::VectorStorage;
        let n = a.len();
        assert_eq!(n, b.len(), "field lengths must match");
        assert_eq!(n, out.len(), "field lengths must match");
        a.with_device_data(|a_data| {
            b.with_device_data(|b_data| {
                out.with_device_data_mut(|out_data| unsafe {
                    self.kernels
                        .cross(&self.stream, a_data, b_data, out_data, c, n, accumulate)
                        .expect("cross kernel launch failed");
                });
            });
        });
        self.synchronize();
    }
}

#[cfg(not(feature = "cuda"))]
impl FieldBackend for CudaBackend {
    type ScalarBuffer = CudaScalarField;
    type VectorBuffer = CudaVectorField;

    fn alloc_scalar_field(&self, n: usize) -> CudaScalarField {
        CudaScalarField::zeros(n)
    }

    fn alloc_vector_field(&self, n: usize) -> CudaVectorField {
        CudaVectorField::zeros(n)
    }
}
