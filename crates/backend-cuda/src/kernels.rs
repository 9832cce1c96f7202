//! CUDA kernels for the spin vector-math operations.
//!
//! Vector fields live on the device as contiguous `[x, y, z, x, y, z, ...]`
//! f64 arrays of length `3 * n`; scalar fields as plain f64 arrays of length
//! `n`. Reductions produce one partial per block; the host combines the
//! partials, so a reduction is exactly two levels deep.

#[cfg(feature = "cuda")]
use std::sync::Arc;

#[cfg(feature = "cuda")]
use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig, PushKernelArg,
};

#[cfg(feature = "cuda")]
const KERNEL_SOURCE: &str = r#"
extern "C" {

// Elementwise kernels over raw f64 ranges. `len` is the number of doubles,
// which is 3*n for vector fields.

__global__ void fill_kernel(double* __restrict__ out, double value, size_t len) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < len) {
        out[i] = value;
    }
}

__global__ void scale_kernel(double* __restrict__ out, double c, size_t len) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < len) {
        out[i] *= c;
    }
}

__global__ void add_value_kernel(double* __restrict__ out, double c, size_t len) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < len) {
        out[i] += c;
    }
}

/// out[i] = c * a[i] over raw doubles.
__global__ void set_scaled_kernel(
    double* __restrict__ out,
    const double* __restrict__ a,
    double c,
    size_t len
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < len) {
        out[i] = c * a[i];
    }
}

/// out[i] += c * a[i] over raw doubles.
__global__ void add_scaled_kernel(
    double* __restrict__ out,
    const double* __restrict__ a,
    double c,
    size_t len
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < len) {
        out[i] += c * a[i];
    }
}

// Site-indexed kernels: one thread per lattice site, three doubles per site.

/// Broadcast a single vector to every site.
__global__ void fill_vec3_kernel(
    double* __restrict__ out,
    double x, double y, double z,
    size_t n
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[3*i] = x;
        out[3*i + 1] = y;
        out[3*i + 2] = z;
    }
}

__global__ void add_vec3_kernel(
    double* __restrict__ out,
    double x, double y, double z,
    size_t n
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[3*i] += x;
        out[3*i + 1] += y;
        out[3*i + 2] += z;
    }
}

/// out[i] = c[i] * a[i] with a per-site scalar coefficient field.
__global__ void site_scaled_set_kernel(
    double* __restrict__ out,
    const double* __restrict__ coeff,
    const double* __restrict__ a,
    size_t n
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        double c = coeff[i];
        out[3*i] = c * a[3*i];
        out[3*i + 1] = c * a[3*i + 1];
        out[3*i + 2] = c * a[3*i + 2];
    }
}

__global__ void site_scaled_add_kernel(
    double* __restrict__ out,
    const double* __restrict__ coeff,
    const double* __restrict__ a,
    size_t n
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        double c = coeff[i];
        out[3*i] += c * a[3*i];
        out[3*i + 1] += c * a[3*i + 1];
        out[3*i + 2] += c * a[3*i + 2];
    }
}

__global__ void dot_per_site_kernel(
    const double* __restrict__ a,
    const double* __restrict__ b,
    double* __restrict__ out,
    size_t n
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[i] = a[3*i] * b[3*i] + a[3*i + 1] * b[3*i + 1] + a[3*i + 2] * b[3*i + 2];
    }
}

/// out[i] = c * (a[i] x b[i]); pass c = 1 for the plain cross product.
__global__ void cross_set_kernel(
    const double* __restrict__ a,
    const double* __restrict__ b,
    double* __restrict__ out,
    double c,
    size_t n
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        double ax = a[3*i], ay = a[3*i + 1], az = a[3*i + 2];
        double bx = b[3*i], by = b[3*i + 1], bz = b[3*i + 2];
        out[3*i] = c * (ay * bz - az * by);
        out[3*i + 1] = c * (az * bx - ax * bz);
        out[3*i + 2] = c * (ax * by - ay * bx);
    }
}

__global__ void cross_add_kernel(
    const double* __restrict__ a,
    const double* __restrict__ b,
    double* __restrict__ out,
    double c,
    size_t n
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        double ax = a[3*i], ay = a[3*i + 1], az = a[3*i + 2];
        double bx = b[3*i], by = b[3*i + 1], bz = b[3*i + 2];
        out[3*i] += c * (ay * bz - az * by);
        out[3*i + 1] += c * (az * bx - ax * bz);
        out[3*i + 2] += c * (ax * by - ay * bx);
    }
}

/// Per-site unit normalization; zero vectors stay zero.
__global__ void normalize_kernel(double* __restrict__ v, size_t n) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        double x = v[3*i], y = v[3*i + 1], z = v[3*i + 2];
        double norm = sqrt(x * x + y * y + z * z);
        if (norm > 0.0) {
            v[3*i] = x / norm;
            v[3*i + 1] = y / norm;
            v[3*i + 2] = z / norm;
        }
    }
}

__global__ void norm_kernel(
    const double* __restrict__ v,
    double* __restrict__ out,
    size_t n
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        double x = v[3*i], y = v[3*i + 1], z = v[3*i + 2];
        out[i] = sqrt(x * x + y * y + z * z);
    }
}

/// Cayley-transform update: with A = force/2 and ap = s - s x A,
/// out = (I + A A^T + [A]_x) ap / (1 + A.A).
__global__ void cayley_kernel(
    const double* __restrict__ spins,
    const double* __restrict__ force,
    double* __restrict__ out,
    size_t n
) {
    size_t i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        double sx = spins[3*i], sy = spins[3*i + 1], sz = spins[3*i + 2];
        double ax = 0.5 * force[3*i], ay = 0.5 * force[3*i + 1], az = 0.5 * force[3*i + 2];
        double inv_det = 1.0 / (1.0 + ax * ax + ay * ay + az * az);

        double px = sx - (sy * az - sz * ay);
        double py = sy - (sz * ax - sx * az);
        double pz = sz - (sx * ay - sy * ax);

        out[3*i] = (px * (ax * ax + 1.0) + py * (ax * ay - az) + pz * (ax * az + ay)) * inv_det;
        out[3*i + 1] = (px * (ay * ax + az) + py * (ay * ay + 1.0) + pz * (ay * az - ax)) * inv_det;
        out[3*i + 2] = (px * (az * ax - ay) + py * (az * ay + ax) + pz * (az * az + 1.0)) * inv_det;
    }
}

// Reductions: block-level tree into shared memory, one partial per block.

__global__ void reduce_sum_kernel(
    const double* __restrict__ in,
    double* __restrict__ partials,
    size_t len
) {
    __shared__ double shared[256];
    size_t tid = threadIdx.x;
    size_t i = blockIdx.x * blockDim.x + tid;
    shared[tid] = (i < len) ? in[i] : 0.0;
    __syncthreads();
    for (size_t stride = blockDim.x / 2; stride > 0; stride >>= 1) {
        if (tid < stride) {
            shared[tid] += shared[tid + stride];
        }
        __syncthreads();
    }
    if (tid == 0) {
        partials[blockIdx.x] = shared[0];
    }
}

/// Partial sums of per-site dot products.
__global__ void reduce_dot_kernel(
    const double* __restrict__ a,
    const double* __restrict__ b,
    double* __restrict__ partials,
    size_t n
) {
    __shared__ double shared[256];
    size_t tid = threadIdx.x;
    size_t i = blockIdx.x * blockDim.x + tid;
    double v = 0.0;
    if (i < n) {
        v = a[3*i] * b[3*i] + a[3*i + 1] * b[3*i + 1] + a[3*i + 2] * b[3*i + 2];
    }
    shared[tid] = v;
    __syncthreads();
    for (size_t stride = blockDim.x / 2; stride > 0; stride >>= 1) {
        if (tid < stride) {
            shared[tid] += shared[tid + stride];
        }
        __syncthreads();
    }
    if (tid == 0) {
        partials[blockIdx.x] = shared[0];
    }
}

} // extern "C"
"#;

/// Compiled kernels for the spin vector-math operations.
#[cfg(feature = "cuda")]
pub struct SpinKernels {
    #[allow(dead_code)]
    module: Arc<CudaModule>,
    fill: CudaFunction,
    scale: CudaFunction,
    add_value: CudaFunction,
    set_scaled: CudaFunction,
    add_scaled: CudaFunction,
    fill_vec3: CudaFunction,
    add_vec3: CudaFunction,
    site_scaled_set: CudaFunction,
    site_scaled_add: CudaFunction,
    dot_per_site: CudaFunction,
    cross_set: CudaFunction,
    cross_add: CudaFunction,
    normalize: CudaFunction,
    norm: CudaFunction,
    cayley: CudaFunction,
    reduce_sum: CudaFunction,
    reduce_dot: CudaFunction,
}

#[cfg(feature = "cuda")]
pub const BLOCK_SIZE: u32 = 256;

#[cfg(feature = "cuda")]
impl SpinKernels {
    /// Compile and load the kernels. Called once per backend; the driver
    /// caches the compilation.
    pub fn new(ctx: &Arc<CudaContext>) -> Result<Self, Box<dyn std::error::Error>> {
        log::info!("compiling CUDA spin kernels");

        let ptx = cudarc::nvrtc::compile_ptx(KERNEL_SOURCE)?;
        let module = ctx.load_module(ptx)?;

        let fill = module.load_function("fill_kernel")?;
        let scale = module.load_function("scale_kernel")?;
        let add_value = module.load_function("add_value_kernel")?;
        let set_scaled = module.load_function("set_scaled_kernel")?;
        let add_scaled = module.load_function("add_scaled_kernel")?;
        let fill_vec3 = module.load_function("fill_vec3_kernel")?;
        let add_vec3 = module.load_function("add_vec3_kernel")?;
        let site_scaled_set = module.load_function("site_scaled_set_kernel")?;
        let site_scaled_add = module.load_function("site_scaled_add_kernel")?;
        let dot_per_site = module.load_function("dot_per_site_kernel")?;
        let cross_set = module.load_function("cross_set_kernel")?;
        let cross_add = module.load_function("cross_add_kernel")?;
        let normalize = module.load_function("normalize_kernel")?;
        let norm = module.load_function("norm_kernel")?;
        let cayley = module.load_function("cayley_kernel")?;
        let reduce_sum = module.load_function("reduce_sum_kernel")?;
        let reduce_dot = module.load_function("reduce_dot_kernel")?;

        log::info!("CUDA spin kernels compiled");

        Ok(Self {
            module,
            fill,
            scale,
            add_value,
            set_scaled,
            add_scaled,
            fill_vec3,
            add_vec3,
            site_scaled_set,
            site_scaled_add,
            dot_per_site,
            cross_set,
            cross_add,
            normalize,
            norm,
            cayley,
            reduce_sum,
            reduce_dot,
        })
    }

    fn launch_config(count: usize) -> LaunchConfig {
        let grid_size = ((count as u32) + BLOCK_SIZE - 1) / BLOCK_SIZE;
        LaunchConfig {
            grid_dim: (grid_size.max(1), 1, 1),
            block_dim: (BLOCK_SIZE, 1, 1),
            shared_mem_bytes: 0,
        }
    }

    /// Number of reduction partials for `count` reduced elements.
    pub fn partial_count(count: usize) -> usize {
        count.div_ceil(BLOCK_SIZE as usize).max(1)
    }

    /// # Safety
    /// `out` must hold at least `len` doubles.
    pub unsafe fn fill(
        &self,
        stream: &CudaStream,
        out: &mut CudaSlice<f64>,
        value: f64,
        len: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.fill)
            .arg(out)
            .arg(&value)
            .arg(&len)
            .launch(Self::launch_config(len))?;
        Ok(())
    }

    /// # Safety
    /// `out` must hold at least `len` doubles.
    pub unsafe fn scale(
        &self,
        stream: &CudaStream,
        out: &mut CudaSlice<f64>,
        c: f64,
        len: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.scale)
            .arg(out)
            .arg(&c)
            .arg(&len)
            .launch(Self::launch_config(len))?;
        Ok(())
    }

    /// # Safety
    /// `out` must hold at least `len` doubles.
    pub unsafe fn add_value(
        &self,
        stream: &CudaStream,
        out: &mut CudaSlice<f64>,
        c: f64,
        len: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.add_value)
            .arg(out)
            .arg(&c)
            .arg(&len)
            .launch(Self::launch_config(len))?;
        Ok(())
    }

    /// # Safety
    /// `out` and `a` must hold at least `len` doubles each.
    pub unsafe fn set_scaled(
        &self,
        stream: &CudaStream,
        out: &mut CudaSlice<f64>,
        a: &CudaSlice<f64>,
        c: f64,
        len: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.set_scaled)
            .arg(out)
            .arg(a)
            .arg(&c)
            .arg(&len)
            .launch(Self::launch_config(len))?;
        Ok(())
    }

    /// # Safety
    /// `out` and `a` must hold at least `len` doubles each.
    pub unsafe fn add_scaled(
        &self,
        stream: &CudaStream,
        out: &mut CudaSlice<f64>,
        a: &CudaSlice<f64>,
        c: f64,
        len: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.add_scaled)
            .arg(out)
            .arg(a)
            .arg(&c)
            .arg(&len)
            .launch(Self::launch_config(len))?;
        Ok(())
    }

    /// # Safety
    /// `out` must hold `3 * n` doubles.
    pub unsafe fn fill_vec3(
        &self,
        stream: &CudaStream,
        out: &mut CudaSlice<f64>,
        v: [f64; 3],
        n: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.fill_vec3)
            .arg(out)
            .arg(&v[0])
            .arg(&v[1])
            .arg(&v[2])
            .arg(&n)
            .launch(Self::launch_config(n))?;
        Ok(())
    }

    /// # Safety
    /// `out` must hold `3 * n` doubles.
    pub unsafe fn add_vec3(
        &self,
        stream: &CudaStream,
        out: &mut CudaSlice<f64>,
        v: [f64; 3],
        n: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.add_vec3)
            .arg(out)
            .arg(&v[0])
            .arg(&v[1])
            .arg(&v[2])
            .arg(&n)
            .launch(Self::launch_config(n))?;
        Ok(())
    }

    /// # Safety
    /// `out` and `a` must hold `3 * n` doubles; `coeff` must hold `n`.
    pub unsafe fn site_scaled(
        &self,
        stream: &CudaStream,
        out: &mut CudaSlice<f64>,
        coeff: &CudaSlice<f64>,
        a: &CudaSlice<f64>,
        n: usize,
        accumulate: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let function = if accumulate {
            &self.site_scaled_add
        } else {
            &self.site_scaled_set
        };
        stream
            .launch_builder(function)
            .arg(out)
            .arg(coeff)
            .arg(a)
            .arg(&n)
            .launch(Self::launch_config(n))?;
        Ok(())
    }

    /// # Safety
    /// `a` and `b` must hold `3 * n` doubles; `out` must hold `n`.
    pub unsafe fn dot_per_site(
        &self,
        stream: &CudaStream,
        a: &CudaSlice<f64>,
        b: &CudaSlice<f64>,
        out: &mut CudaSlice<f64>,
        n: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.dot_per_site)
            .arg(a)
            .arg(b)
            .arg(out)
            .arg(&n)
            .launch(Self::launch_config(n))?;
        Ok(())
    }

    /// # Safety
    /// `a`, `b` and `out` must hold `3 * n` doubles each.
    pub unsafe fn cross(
        &self,
        stream: &CudaStream,
        a: &CudaSlice<f64>,
        b: &CudaSlice<f64>,
        out: &mut CudaSlice<f64>,
        c: f64,
        n: usize,
        accumulate: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let function = if accumulate {
            &self.cross_add
        } else {
            &self.cross_set
        };
        stream
            .launch_builder(function)
            .arg(a)
            .arg(b)
            .arg(out)
            .arg(&c)
            .arg(&n)
            .launch(Self::launch_config(n))?;
        Ok(())
    }

    /// # Safety
    /// `v` must hold `3 * n` doubles.
    pub unsafe fn normalize(
        &self,
        stream: &CudaStream,
        v: &mut CudaSlice<f64>,
        n: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.normalize)
            .arg(v)
            .arg(&n)
            .launch(Self::launch_config(n))?;
        Ok(())
    }

    /// # Safety
    /// `v` must hold `3 * n` doubles; `out` must hold `n`.
    pub unsafe fn norm(
        &self,
        stream: &CudaStream,
        v: &CudaSlice<f64>,
        out: &mut CudaSlice<f64>,
        n: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.norm)
            .arg(v)
            .arg(out)
            .arg(&n)
            .launch(Self::launch_config(n))?;
        Ok(())
    }

    /// # Safety
    /// `spins`, `force` and `out` must hold `3 * n` doubles each.
    pub unsafe fn cayley(
        &self,
        stream: &CudaStream,
        spins: &CudaSlice<f64>,
        force: &CudaSlice<f64>,
        out: &mut CudaSlice<f64>,
        n: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.cayley)
            .arg(spins)
            .arg(force)
            .arg(out)
            .arg(&n)
            .launch(Self::launch_config(n))?;
        Ok(())
    }

    /// # Safety
    /// `input` must hold `len` doubles; `partials` at least
    /// `partial_count(len)`.
    pub unsafe fn reduce_sum(
        &self,
        stream: &CudaStream,
        input: &CudaSlice<f64>,
        partials: &mut CudaSlice<f64>,
        len: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.reduce_sum)
            .arg(input)
            .arg(partials)
            .arg(&len)
            .launch(Self::launch_config(len.max(1)))?;
        Ok(())
    }

    /// # Safety
    /// `a` and `b` must hold `3 * n` doubles; `partials` at least
    /// `partial_count(n)`.
    pub unsafe fn reduce_dot(
        &self,
        stream: &CudaStream,
        a: &CudaSlice<f64>,
        b: &CudaSlice<f64>,
        partials: &mut CudaSlice<f64>,
        n: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stream
            .launch_builder(&self.reduce_dot)
            .arg(a)
            .arg(b)
            .arg(partials)
            .arg(&n)
            .launch(Self::launch_config(n.max(1)))?;
        Ok(())
    }
}
