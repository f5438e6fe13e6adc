//! Chunk-grid coordinates and their file-name encoding.
//!
//! Chunk files and fragment files carry their grid position in the file stem
//! as `x{i}y{j}z{k}`. Fragment stems append `_n{id}`; [`ChunkCoord::parse_stem`]
//! returns whatever follows the coordinate so callers can decode suffixes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VolumeError;

/// Position of a chunk in the chunk grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// Index along the first axis.
    pub i: u32,
    /// Index along the second axis.
    pub j: u32,
    /// Index along the third (anisotropic) axis.
    pub k: u32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    pub const fn new(i: u32, j: u32, k: u32) -> Self {
        Self { i, j, k }
    }

    /// Returns the file stem `x{i}y{j}z{k}`.
    pub fn file_stem(&self) -> String {
        self.to_string()
    }

    /// Parses a leading `x{i}y{j}z{k}` and returns the coordinate plus the rest of `s`.
    pub fn parse_stem(s: &str) -> Result<(Self, &str), VolumeError> {
        let bad = || VolumeError::BadStem(s.to_string());
        let rest = s.strip_prefix('x').ok_or_else(bad)?;
        let (i, rest) = split_number(rest).ok_or_else(bad)?;
        let rest = rest.strip_prefix('y').ok_or_else(bad)?;
        let (j, rest) = split_number(rest).ok_or_else(bad)?;
        let rest = rest.strip_prefix('z').ok_or_else(bad)?;
        let (k, rest) = split_number(rest).ok_or_else(bad)?;
        Ok((Self::new(i, j, k), rest))
    }
}

/// Splits the leading decimal digits off `s`.
fn split_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}y{}z{}", self.i, self.j, self.k)
    }
}

impl FromStr for ChunkCoord {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::parse_stem(s)? {
            (coord, "") => Ok(coord),
            _ => Err(VolumeError::BadStem(s.to_string())),
        }
    }
}

/// Bounds of the chunk grid: valid coordinates satisfy `0 <= i < dims.i` etc.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    /// Chunks along the first axis.
    pub i: u32,
    /// Chunks along the second axis.
    pub j: u32,
    /// Chunks along the third axis.
    pub k: u32,
}

impl GridDims {
    /// Creates grid bounds.
    pub const fn new(i: u32, j: u32, k: u32) -> Self {
        Self { i, j, k }
    }

    /// Returns true if `coord` lies inside the grid.
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        coord.i < self.i && coord.j < self.j && coord.k < self.k
    }

    /// Returns `coord` if it lies inside the grid.
    pub fn check(&self, coord: ChunkCoord) -> Result<ChunkCoord, VolumeError> {
        if self.contains(coord) {
            Ok(coord)
        } else {
            Err(VolumeError::OutsideGrid {
                coord: coord.file_stem(),
                grid: [self.i, self.j, self.k],
            })
        }
    }

    /// Total number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.i as usize * self.j as usize * self.k as usize
    }

    /// Iterates every coordinate, `k` varying fastest.
    pub fn iter(&self) -> impl Iterator<Item = ChunkCoord> + use<> {
        let dims = *self;
        (0..dims.i).flat_map(move |i| {
            (0..dims.j).flat_map(move |j| (0..dims.k).map(move |k| ChunkCoord::new(i, j, k)))
        })
    }
}

impl From<(u32, u32, u32)> for GridDims {
    fn from((i, j, k): (u32, u32, u32)) -> Self {
        Self::new(i, j, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_roundtrip_over_deployed_grid() {
        let grid = GridDims::new(6, 9, 4);
        for coord in grid.iter() {
            let stem = coord.file_stem();
            let parsed: ChunkCoord = stem.parse().unwrap();
            assert_eq!(parsed, coord, "stem {stem}");
        }
    }

    #[test]
    fn test_parse_stem_returns_suffix() {
        let (coord, rest) = ChunkCoord::parse_stem("x2y3z1_n042.nmsh").unwrap();
        assert_eq!(coord, ChunkCoord::new(2, 3, 1));
        assert_eq!(rest, "_n042.nmsh");
    }

    #[test]
    fn test_multi_digit_coordinates() {
        let coord: ChunkCoord = "x12y305z7".parse().unwrap();
        assert_eq!(coord, ChunkCoord::new(12, 305, 7));
    }

    #[test]
    fn test_malformed_stems_rejected() {
        for stem in ["", "x", "xy1z2", "x1y2", "x1y2z", "a1b2c3", "x1y2z3extra"] {
            assert!(stem.parse::<ChunkCoord>().is_err(), "accepted {stem:?}");
        }
    }

    #[test]
    fn test_grid_iteration_order_and_count() {
        let grid = GridDims::new(2, 2, 2);
        let coords: Vec<_> = grid.iter().collect();
        assert_eq!(coords.len(), grid.chunk_count());
        assert_eq!(coords[0], ChunkCoord::new(0, 0, 0));
        assert_eq!(coords[1], ChunkCoord::new(0, 0, 1));
        assert_eq!(coords[7], ChunkCoord::new(1, 1, 1));
    }

    #[test]
    fn test_grid_check() {
        let grid = GridDims::new(6, 9, 4);
        assert!(grid.check(ChunkCoord::new(5, 8, 3)).is_ok());
        assert!(matches!(
            grid.check(ChunkCoord::new(6, 0, 0)),
            Err(VolumeError::OutsideGrid { .. })
        ));
    }
}
