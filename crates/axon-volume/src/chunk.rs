//! One chunk of the segmented volume.
//!
//! A [`VolumeChunk`] pairs the grey-valued segmentation field (`data`), which
//! is what closing smooths and contouring meshes, with a co-indexed object-id
//! array (`labels`) that passes through every stage untouched and defines
//! which objects the chunk contains.

use serde::{Deserialize, Serialize};

use crate::error::VolumeError;
use crate::volume::Volume;

/// Segmentation data plus object-id labels for one chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeChunk {
    data: Volume<u32>,
    labels: Volume<u32>,
}

impl VolumeChunk {
    /// Pairs a data array with its label array.
    ///
    /// Fails with [`VolumeError::ShapeMismatch`] when the shapes differ.
    pub fn new(data: Volume<u32>, labels: Volume<u32>) -> Result<Self, VolumeError> {
        if data.dims() != labels.dims() {
            return Err(VolumeError::ShapeMismatch {
                data: data.dims(),
                labels: labels.dims(),
            });
        }
        Ok(Self { data, labels })
    }

    /// Builds a chunk whose data field starts as a copy of its labels.
    pub fn from_labels(labels: Volume<u32>) -> Self {
        Self {
            data: labels.clone(),
            labels,
        }
    }

    /// Chunk dimensions in voxels.
    pub fn dims(&self) -> [usize; 3] {
        self.data.dims()
    }

    /// The segmentation field.
    pub fn data(&self) -> &Volume<u32> {
        &self.data
    }

    /// The object-id labels.
    pub fn labels(&self) -> &Volume<u32> {
        &self.labels
    }

    /// Returns true when data and labels are identical.
    pub fn data_matches_labels(&self) -> bool {
        self.data == self.labels
    }

    /// Sorted ids of the objects present in this chunk (background excluded).
    pub fn object_ids(&self) -> Vec<u32> {
        self.labels.distinct_nonzero()
    }

    /// Replaces the data field, keeping labels.
    pub fn with_data(self, data: Volume<u32>) -> Result<Self, VolumeError> {
        Self::new(data, self.labels)
    }

    /// Splits the chunk into `(data, labels)`.
    pub fn into_parts(self) -> (Volume<u32>, Volume<u32>) {
        (self.data, self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let data = Volume::<u32>::new([4, 4, 4]);
        let labels = Volume::<u32>::new([4, 4, 3]);
        assert_eq!(
            VolumeChunk::new(data, labels),
            Err(VolumeError::ShapeMismatch {
                data: [4, 4, 4],
                labels: [4, 4, 3]
            })
        );
    }

    #[test]
    fn test_object_ids_come_from_labels() {
        let mut labels = Volume::<u32>::new([4, 4, 4]);
        labels.set(0, 0, 0, 12);
        labels.set(3, 3, 3, 5);
        let data = Volume::<u32>::filled([4, 4, 4], 99);
        let chunk = VolumeChunk::new(data, labels).unwrap();
        assert_eq!(chunk.object_ids(), vec![5, 12]);
    }

    #[test]
    fn test_with_data_keeps_labels() {
        let mut labels = Volume::<u32>::new([2, 2, 2]);
        labels.set(1, 1, 1, 3);
        let chunk = VolumeChunk::from_labels(labels.clone());
        assert!(chunk.data_matches_labels());

        let chunk = chunk.with_data(Volume::filled([2, 2, 2], 3)).unwrap();
        assert_eq!(chunk.labels(), &labels);
        assert!(!chunk.data_matches_labels());
    }
}
