//! Dense 3D sample arrays.
//!
//! A [`Volume`] stores `nx * ny * nz` samples with X varying fastest, matching
//! the layout chunk files are written in.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::VolumeError;

/// Number of samples in a volume of `dims`, or `None` if it overflows.
pub(crate) fn sample_count(dims: [usize; 3]) -> Option<usize> {
    dims.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
}

/// A dense, X-fastest 3D array of samples.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume<T> {
    dims: [usize; 3],
    samples: Vec<T>,
}

impl<T: Copy + Default> Volume<T> {
    /// Creates a volume of the given dimensions filled with `T::default()`.
    pub fn new(dims: [usize; 3]) -> Self {
        Self::filled(dims, T::default())
    }

    /// Creates a volume of the given dimensions filled with `value`.
    pub fn filled(dims: [usize; 3], value: T) -> Self {
        Self {
            dims,
            samples: vec![value; dims[0] * dims[1] * dims[2]],
        }
    }

    /// Wraps an existing X-fastest sample buffer.
    pub fn from_vec(dims: [usize; 3], samples: Vec<T>) -> Result<Self, VolumeError> {
        if sample_count(dims) != Some(samples.len()) {
            return Err(VolumeError::BufferSize {
                dims,
                actual: samples.len(),
            });
        }
        Ok(Self { dims, samples })
    }

    /// Returns the dimensions `[nx, ny, nz]`.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Total number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if any axis has zero extent.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Linear index of `(x, y, z)`.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.dims[0] && y < self.dims[1] && z < self.dims[2]);
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    /// Returns the sample at `(x, y, z)`.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.samples[self.index(x, y, z)]
    }

    /// Sets the sample at `(x, y, z)`.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        let i = self.index(x, y, z);
        self.samples[i] = value;
    }

    /// Sets every sample inside the half-open box `min..max` to `value`.
    pub fn fill_box(&mut self, min: [usize; 3], max: [usize; 3], value: T) {
        for z in min[2]..max[2].min(self.dims[2]) {
            for y in min[1]..max[1].min(self.dims[1]) {
                for x in min[0]..max[0].min(self.dims[0]) {
                    self.set(x, y, z, value);
                }
            }
        }
    }

    /// Raw sample slice in X-fastest order.
    pub fn samples(&self) -> &[T] {
        &self.samples
    }

    /// Mutable raw sample slice in X-fastest order.
    pub fn samples_mut(&mut self) -> &mut [T] {
        &mut self.samples
    }

    /// Consumes the volume and returns its sample buffer.
    pub fn into_samples(self) -> Vec<T> {
        self.samples
    }
}

impl Volume<u32> {
    /// Sorted distinct non-zero values. Zero is background.
    pub fn distinct_nonzero(&self) -> Vec<u32> {
        let set: FxHashSet<u32> = self.samples.iter().copied().filter(|&v| v != 0).collect();
        let mut ids: Vec<u32> = set.into_iter().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of samples equal to `value`.
    pub fn count(&self, value: u32) -> usize {
        self.samples.iter().filter(|&&v| v == value).count()
    }
}
