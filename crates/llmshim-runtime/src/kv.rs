//! Bounded key/value cache for the reference engine.
//!
//! One flat K and one flat V buffer of `capacity * dim` floats, filled one
//! position at a time. Clearing only resets the length, so a cleared cache
//! reuses its allocation on the next call.

/// Error type for KV cache operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    #[error("KV cache capacity exceeded: {seq_len} > {max}")]
    CapacityExceeded { seq_len: usize, max: usize },

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },
}

pub type KvResult<T> = Result<T, KvError>;

/// Single-head K/V cache.
///
/// # Invariants
/// - `seq_len <= capacity`
/// - K and V always hold the same number of positions
#[derive(Debug, Clone)]
pub struct KvCache {
    k: Vec<f32>,
    v: Vec<f32>,
    capacity: usize,
    dim: usize,
    seq_len: usize,
}

impl KvCache {
    pub fn new(capacity: usize, dim: usize) -> Self {
        let buf_len = capacity * dim;
        Self {
            k: vec![0.0; buf_len],
            v: vec![0.0; buf_len],
            capacity,
            dim,
            seq_len: 0,
        }
    }

    /// Append K and V for one position.
    pub fn append(&mut self, k: &[f32], v: &[f32]) -> KvResult<()> {
        if k.len() != self.dim || v.len() != self.dim {
            let got = if k.len() != self.dim { k.len() } else { v.len() };
            return Err(KvError::ShapeMismatch {
                expected: self.dim,
                got,
            });
        }
        if self.seq_len >= self.capacity {
            return Err(KvError::CapacityExceeded {
                seq_len: self.seq_len + 1,
                max: self.capacity,
            });
        }

        let offset = self.seq_len * self.dim;
        self.k[offset..offset + self.dim].copy_from_slice(k);
        self.v[offset..offset + self.dim].copy_from_slice(v);
        self.seq_len += 1;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.seq_len = 0;
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.seq_len
    }

    /// Key row for position `pos`.
    pub fn key(&self, pos: usize) -> &[f32] {
        &self.k[pos * self.dim..(pos + 1) * self.dim]
    }

    /// Value row for position `pos`.
    pub fn value(&self, pos: usize) -> &[f32] {
        &self.v[pos * self.dim..(pos + 1) * self.dim]
    }

    /// Total memory allocated for K and V (in bytes).
    pub fn memory_bytes(&self) -> usize {
        (self.k.len() + self.v.len()) * std::mem::size_of::<f32>()
    }
}
