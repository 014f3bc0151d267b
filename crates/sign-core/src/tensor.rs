//! Host-side tensors leased from a [`TensorLedger`].
//!
//! Every [`HostTensor`] is registered with the ledger when it is created and
//! deregistered when it is dropped, so a tick that finishes with
//! `allocated == released` provably returned every buffer it touched. There is
//! no explicit `release` call to forget: dropping the value is the release.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TensorError {
    #[error("shape {shape:?} needs {expected} elements but {actual} were supplied")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("cannot transpose a tensor of rank {0}")]
    Rank(usize),
}

/// Allocation counters shared by every tensor leased during a session.
#[derive(Debug, Default)]
pub struct TensorLedger {
    allocated: AtomicU64,
    released: AtomicU64,
}

/// Point-in-time view of a ledger's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSnapshot {
    pub allocated: u64,
    pub released: u64,
}

impl LedgerSnapshot {
    pub fn live(&self) -> u64 {
        self.allocated.saturating_sub(self.released)
    }

    /// Allocations and releases that happened after `earlier`.
    pub fn since(&self, earlier: LedgerSnapshot) -> LedgerSnapshot {
        LedgerSnapshot {
            allocated: self.allocated.saturating_sub(earlier.allocated),
            released: self.released.saturating_sub(earlier.released),
        }
    }
}

impl TensorLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lease a tensor wrapping `data` with the given shape.
    pub fn allocate(
        self: &Arc<Self>,
        shape: Vec<usize>,
        data: Vec<f32>,
    ) -> Result<HostTensor, TensorError> {
        let expected = shape.iter().product::<usize>();
        if expected != data.len() {
            return Err(TensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        self.allocated.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!("signcam_live_tensors").increment(1.0);
        Ok(HostTensor {
            shape,
            data,
            ledger: Arc::clone(self),
        })
    }

    /// Lease a zero-filled tensor.
    pub fn zeros(self: &Arc<Self>, shape: Vec<usize>) -> HostTensor {
        let len = shape.iter().product::<usize>();
        self.allocated.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!("signcam_live_tensors").increment(1.0);
        HostTensor {
            shape,
            data: vec![0.0; len],
            ledger: Arc::clone(self),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            allocated: self.allocated.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!("signcam_live_tensors").decrement(1.0);
    }
}

/// Dense row-major `f32` buffer.
#[derive(Debug)]
pub struct HostTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    ledger: Arc<TensorLedger>,
}

impl HostTensor {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Swap the two innermost axes, e.g. `[1, C, N]` into `[1, N, C]`.
    ///
    /// The result is leased from the same ledger as `self`.
    pub fn transpose_last_two(&self) -> Result<HostTensor, TensorError> {
        let rank = self.shape.len();
        if rank < 2 {
            return Err(TensorError::Rank(rank));
        }
        let rows = self.shape[rank - 2];
        let cols = self.shape[rank - 1];
        let plane = rows * cols;
        let mut out = vec![0.0f32; self.data.len()];
        if plane > 0 {
            for (src, dst) in self
                .data
                .chunks_exact(plane)
                .zip(out.chunks_exact_mut(plane))
            {
                for r in 0..rows {
                    for c in 0..cols {
                        dst[c * rows + r] = src[r * cols + c];
                    }
                }
            }
        }
        let mut shape = self.shape.clone();
        shape.swap(rank - 2, rank - 1);
        self.ledger.allocate(shape, out)
    }
}

impl Drop for HostTensor {
    fn drop(&mut self) {
        self.ledger.release();
    }
}
