//! Eager loading of the libtorch CUDA runtime.
//!
//! TorchScript modules only see CUDA when the CUDA flavoured libtorch
//! libraries are loaded with `RTLD_GLOBAL` before the first device query.

use std::sync::OnceLock;

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
use sign_core::tch::{Cuda, Device};
use tracing::{debug, info};

const TORCH_CUDA_LIBS: [&str; 3] = [
    "libtorch_cuda.so",
    "libtorch_cuda_cu.so",
    "libtorch_cuda_cpp.so",
];

static LOADED: OnceLock<Vec<Library>> = OnceLock::new();

/// Load whichever libtorch CUDA libraries exist. Returns how many loaded.
pub(crate) fn load_torch_cuda_runtime() -> usize {
    LOADED
        .get_or_init(|| {
            TORCH_CUDA_LIBS
                .iter()
                .filter_map(|lib| {
                    // SAFETY: loading libtorch's own shared objects runs only their static initialisers.
                    match unsafe { Library::open(Some(*lib), RTLD_NOW | RTLD_GLOBAL) } {
                        Ok(handle) => {
                            debug!("Loaded {lib}");
                            Some(handle)
                        }
                        Err(err) => {
                            debug!("Skipping {lib}: {err}");
                            None
                        }
                    }
                })
                .collect()
        })
        .len()
}

/// Pick the inference device, preferring CUDA unless `use_cpu` is set.
pub(crate) fn select_device(use_cpu: bool) -> Device {
    if use_cpu {
        return Device::Cpu;
    }
    let loaded = load_torch_cuda_runtime();
    let device = Device::cuda_if_available();
    info!(
        "Inference device {device:?} (CUDA libs loaded: {loaded}, devices: {})",
        Cuda::device_count()
    );
    device
}
