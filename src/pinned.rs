//! Page-locked ("pinned") backing storage for the streaming ring.
//!
//! Two backends implement [`PinnedBackend`]: [`GpuHostBackend`], which
//! dynamically resolves a CUDA-style host-allocator at runtime via
//! `libloading` (mirroring `cudaHostAlloc`/`cudaFreeHost`), and
//! [`OsPinnedBackend`], which falls back to `libc::mlock`/`munlock` over an
//! ordinary heap allocation. The backend is chosen once, at construction,
//! and never mixed: memory allocated by one backend is always freed by the
//! same one.

use std::alloc::{self, Layout};
use std::fmt;

use tracing::{info, warn};

/// A page-locked allocation. Freed by its owning backend on `Drop`.
pub struct PinnedAllocation {
    ptr: *mut u8,
    len: usize,
    layout: Layout,
    freed_by: Backend,
}

// SAFETY: the allocation is exclusively owned by whoever holds the
// `PinnedAllocation`; no aliasing occurs across threads without external
// synchronization, same as any other owned buffer.
unsafe impl Send for PinnedAllocation {}
unsafe impl Sync for PinnedAllocation {}

impl PinnedAllocation {
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            // SAFETY: ptr/len describe a live allocation owned by this value.
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.len == 0 {
            &mut []
        } else {
            // SAFETY: ptr/len describe a live allocation exclusively borrowed here.
            unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
        }
    }
}

impl fmt::Debug for PinnedAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedAllocation")
            .field("len", &self.len)
            .field("backend", &self.freed_by)
            .finish()
    }
}

impl Drop for PinnedAllocation {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        match self.freed_by {
            Backend::Gpu => {
                // GPU-host deallocation path lives on the backend that produced
                // this allocation; re-entering it here would require a handle
                // back to the loaded library, which outlives individual
                // allocations for the process lifetime (see GpuHostBackend).
                gpu::free(self.ptr);
            }
            Backend::Os => {
                // SAFETY: ptr/layout were produced by the matching alloc call
                // in OsPinnedBackend::allocate and have not been freed since.
                unsafe {
                    libc::munlock(self.ptr as *const libc::c_void, self.len);
                    alloc::dealloc(self.ptr, self.layout);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Gpu,
    Os,
}

/// A source of page-locked memory.
pub trait PinnedBackend: Send + Sync {
    /// Allocates `len` bytes of page-locked memory, or `None` if this
    /// backend cannot satisfy the request (never panics).
    fn allocate(&self, len: usize) -> Option<PinnedAllocation>;

    /// Human-readable backend name, surfaced through telemetry.
    fn name(&self) -> &'static str;
}

/// Resolves the preferred [`PinnedBackend`] at construction time: the
/// dynamically-loaded GPU host allocator when the `gpu_direct` feature is
/// enabled and a compatible library is found, otherwise the OS `mlock`
/// fallback.
pub fn resolve_backend(gpu_direct: bool) -> Box<dyn PinnedBackend> {
    if gpu_direct {
        #[cfg(feature = "gpu_direct")]
        if let Some(backend) = gpu::GpuHostBackend::load() {
            info!("GPU host allocator detected, enabling zero-copy pinned backend");
            return Box::new(backend);
        }
        #[cfg(not(feature = "gpu_direct"))]
        warn!("gpu_direct requested but crate built without the gpu_direct feature");
    }
    info!("using OS mlock pinned backend");
    Box::new(OsPinnedBackend)
}

/// Page-locks ordinary heap memory via `libc::mlock`.
#[derive(Debug, Default)]
pub struct OsPinnedBackend;

impl PinnedBackend for OsPinnedBackend {
    fn allocate(&self, len: usize) -> Option<PinnedAllocation> {
        if len == 0 {
            return Some(PinnedAllocation {
                ptr: std::ptr::NonNull::dangling().as_ptr(),
                len: 0,
                layout: Layout::new::<u8>(),
                freed_by: Backend::Os,
            });
        }

        let layout = Layout::from_size_align(len, std::mem::align_of::<u64>()).ok()?;
        // SAFETY: layout has nonzero size, checked above.
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            warn!(len, "OS pinned backend: allocation failed");
            return None;
        }

        // SAFETY: ptr/len describe the allocation just made.
        let rc = unsafe { libc::mlock(ptr as *const libc::c_void, len) };
        if rc != 0 {
            warn!(len, "OS pinned backend: mlock failed, falling back to unlocked memory");
            // Not fatal: the pages just aren't locked. We still hand back
            // usable memory rather than failing the allocation outright.
        }

        Some(PinnedAllocation {
            ptr,
            len,
            layout,
            freed_by: Backend::Os,
        })
    }

    fn name(&self) -> &'static str {
        "os_mlock"
    }
}

#[cfg(feature = "gpu_direct")]
mod gpu {
    use super::{Backend, PinnedAllocation, PinnedBackend};
    use libloading::{Library, Symbol};
    use std::ffi::c_void;
    use std::sync::OnceLock;
    use tracing::warn;

    type CudaError = i32;
    const CUDA_SUCCESS: CudaError = 0;

    type FnHostAlloc = unsafe extern "C" fn(*mut *mut c_void, usize, u32) -> CudaError;
    type FnFreeHost = unsafe extern "C" fn(*mut c_void) -> CudaError;

    struct CudaFunctions {
        host_alloc: FnHostAlloc,
        free_host: FnFreeHost,
    }

    // The loaded library is kept alive for the process lifetime; individual
    // allocations only need the resolved function pointers, which are Copy.
    static LIBRARY: OnceLock<Option<(Library, CudaFunctions)>> = OnceLock::new();

    fn library() -> Option<&'static CudaFunctions> {
        LIBRARY
            .get_or_init(probe)
            .as_ref()
            .map(|(_, funcs)| funcs)
    }

    fn probe() -> Option<(Library, CudaFunctions)> {
        const CANDIDATES: &[&str] = &[
            "libcudart.so",
            "libcudart.so.12",
            "libcudart.so.11.0",
            "cudart64_120.dll",
            "cudart64_110.dll",
            "nvcuda.dll",
        ];

        for name in CANDIDATES {
            // SAFETY: dlopen/LoadLibrary of a named shared object; failure is
            // handled, not a safety hazard.
            let lib = match unsafe { Library::new(name) } {
                Ok(lib) => lib,
                Err(_) => continue,
            };

            // SAFETY: symbol signatures are declared to match the vendor ABI
            // for these well-known entry points.
            let host_alloc: Symbol<FnHostAlloc> = match unsafe { lib.get(b"cudaHostAlloc\0") } {
                Ok(sym) => sym,
                Err(_) => continue,
            };
            let free_host: Symbol<FnFreeHost> = match unsafe { lib.get(b"cudaFreeHost\0") } {
                Ok(sym) => sym,
                Err(_) => continue,
            };

            let funcs = CudaFunctions {
                host_alloc: *host_alloc,
                free_host: *free_host,
            };
            return Some((lib, funcs));
        }
        None
    }

    pub(super) fn free(ptr: *mut u8) {
        if let Some(funcs) = library() {
            // SAFETY: ptr was produced by a prior call to the same
            // cudaHostAlloc entry point and has not been freed yet.
            unsafe {
                (funcs.free_host)(ptr as *mut c_void);
            }
        }
    }

    pub struct GpuHostBackend {
        funcs: &'static CudaFunctions,
    }

    impl GpuHostBackend {
        pub fn load() -> Option<Self> {
            library().map(|funcs| Self { funcs })
        }
    }

    impl PinnedBackend for GpuHostBackend {
        fn allocate(&self, len: usize) -> Option<PinnedAllocation> {
            if len == 0 {
                return Some(PinnedAllocation {
                    ptr: std::ptr::NonNull::dangling().as_ptr(),
                    len: 0,
                    layout: std::alloc::Layout::new::<u8>(),
                    freed_by: Backend::Gpu,
                });
            }

            let mut raw: *mut c_void = std::ptr::null_mut();
            // SAFETY: raw is a valid out-pointer; len is the requested size.
            let rc = unsafe { (self.funcs.host_alloc)(&mut raw, len, 0) };
            if rc != CUDA_SUCCESS || raw.is_null() {
                warn!(len, code = rc, "GPU host allocator failed, allocation rejected");
                return None;
            }

            Some(PinnedAllocation {
                ptr: raw as *mut u8,
                len,
                layout: std::alloc::Layout::from_size_align(len, std::mem::align_of::<u64>())
                    .unwrap_or_else(|_| std::alloc::Layout::new::<u8>()),
                freed_by: Backend::Gpu,
            })
        }

        fn name(&self) -> &'static str {
            "gpu_host_alloc"
        }
    }
}

#[cfg(not(feature = "gpu_direct"))]
mod gpu {
    pub(super) fn free(_ptr: *mut u8) {
        unreachable!("gpu backend never allocates when the gpu_direct feature is disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_backend_allocates_requested_length() {
        let backend = OsPinnedBackend;
        let alloc = backend.allocate(4096).expect("allocation should succeed");
        assert_eq!(alloc.len(), 4096);
    }

    #[test]
    fn os_backend_zero_length_is_well_defined() {
        let backend = OsPinnedBackend;
        let alloc = backend.allocate(0).expect("zero-length allocation is valid");
        assert!(alloc.is_empty());
    }

    #[test]
    fn resolve_backend_without_gpu_direct_uses_os_backend() {
        let backend = resolve_backend(false);
        assert_eq!(backend.name(), "os_mlock");
    }
}
