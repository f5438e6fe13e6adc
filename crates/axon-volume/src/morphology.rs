//! Grey-scale morphology with a flat cubic structuring element.
//!
//! Dilation takes the maximum and erosion the minimum over a cube of edge
//! `size` centred on each voxel. The cube is separable, so every operation
//! runs as three 1D passes. Windows are clamped at the volume border, which
//! for max/min filters equals mirror-reflecting the volume.

use crate::volume::Volume;

#[derive(Clone, Copy)]
enum Extremum {
    Max,
    Min,
}

impl Extremum {
    #[inline]
    fn pick(self, a: u32, b: u32) -> u32 {
        match self {
            Extremum::Max => a.max(b),
            Extremum::Min => a.min(b),
        }
    }
}

/// Window offsets `(lo, hi)` for a footprint of edge `size`.
///
/// Dilation uses the reflected footprint so that closing and opening stay
/// centred for even sizes.
fn window(size: usize, reflected: bool) -> (isize, isize) {
    let size = size as isize;
    let before = size / 2;
    let after = size - 1 - before;
    if reflected {
        (-after, before)
    } else {
        (-before, after)
    }
}

fn filter_axis(src: &Volume<u32>, axis: usize, lo: isize, hi: isize, op: Extremum) -> Volume<u32> {
    let dims = src.dims();
    let stride = [1, dims[0], dims[0] * dims[1]][axis];
    let n = dims[axis] as isize;
    let input = src.samples();
    let mut out = src.clone();
    let output = out.samples_mut();

    for z in 0..dims[2] {
        for y in 0..dims[1] {
            for x in 0..dims[0] {
                let c = [x, y, z][axis] as isize;
                let idx = x + dims[0] * (y + dims[1] * z);
                let first = (c + lo).max(0);
                let last = (c + hi).min(n - 1);
                let base = idx as isize - c * stride as isize;
                let mut acc = input[(base + first * stride as isize) as usize];
                for t in first + 1..=last {
                    acc = op.pick(acc, input[(base + t * stride as isize) as usize]);
                }
                output[idx] = acc;
            }
        }
    }
    out
}

fn filter(src: &Volume<u32>, size: usize, op: Extremum, reflected: bool) -> Volume<u32> {
    if size <= 1 || src.is_empty() {
        return src.clone();
    }
    let (lo, hi) = window(size, reflected);
    let pass = filter_axis(src, 0, lo, hi, op);
    let pass = filter_axis(&pass, 1, lo, hi, op);
    filter_axis(&pass, 2, lo, hi, op)
}

/// Grey dilation: each voxel becomes the maximum over its `size`-cube.
pub fn dilate(volume: &Volume<u32>, size: usize) -> Volume<u32> {
    filter(volume, size, Extremum::Max, true)
}

/// Grey erosion: each voxel becomes the minimum over its `size`-cube.
pub fn erode(volume: &Volume<u32>, size: usize) -> Volume<u32> {
    filter(volume, size, Extremum::Min, false)
}

/// Closing (dilate, then erode). Fills gaps narrower than the footprint.
pub fn close(volume: &Volume<u32>, size: usize) -> Volume<u32> {
    erode(&dilate(volume, size), size)
}

/// Opening (erode, then dilate). Removes spikes narrower than the footprint.
pub fn open(volume: &Volume<u32>, size: usize) -> Volume<u32> {
    dilate(&erode(volume, size), size)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABEL: u32 = 7;

    fn solid_box() -> Volume<u32> {
        let mut vol = Volume::<u32>::new([16, 16, 16]);
        vol.fill_box([4, 4, 4], [12, 12, 12], LABEL);
        vol
    }

    #[test]
    fn test_window_offsets() {
        assert_eq!(window(5, false), (-2, 2));
        assert_eq!(window(5, true), (-2, 2));
        assert_eq!(window(4, false), (-2, 1));
        assert_eq!(window(4, true), (-1, 2));
    }

    #[test]
    fn test_dilate_grows_box_by_half_width() {
        let dilated = dilate(&solid_box(), 5);
        assert_eq!(dilated.get(2, 2, 2), LABEL);
        assert_eq!(dilated.get(1, 8, 8), 0);
        assert_eq!(dilated.count(LABEL), 12 * 12 * 12);
    }

    #[test]
    fn test_erode_shrinks_box_by_half_width() {
        let eroded = erode(&solid_box(), 5);
        assert_eq!(eroded.count(LABEL), 4 * 4 * 4);
        assert_eq!(eroded.get(6, 6, 6), LABEL);
        assert_eq!(eroded.get(5, 8, 8), 0);
    }

    #[test]
    fn test_closing_fills_isolated_hole() {
        let mut holed = solid_box();
        holed.set(8, 8, 8, 0);
        let closed = close(&holed, 5);
        assert_eq!(closed.get(8, 8, 8), LABEL);
        assert_eq!(closed, solid_box());
    }

    #[test]
    fn test_closing_fills_surface_notch() {
        let mut notched = solid_box();
        for x in 4..12 {
            notched.set(x, 11, 8, 0);
        }
        let closed = close(&notched, 5);
        assert_eq!(closed, solid_box());
    }

    #[test]
    fn test_closing_keeps_spike_and_opening_removes_it() {
        let mut spiked = solid_box();
        spiked.set(12, 8, 8, LABEL);
        spiked.set(13, 8, 8, LABEL);

        let closed = close(&spiked, 5);
        assert_eq!(closed.get(13, 8, 8), LABEL, "closing never removes foreground");

        let opened = open(&closed, 5);
        assert_eq!(opened.get(12, 8, 8), 0);
        assert_eq!(opened.get(13, 8, 8), 0);
        assert_eq!(opened, solid_box());
    }

    #[test]
    fn test_closing_is_identity_on_uniform_volume() {
        let uniform = Volume::<u32>::filled([5, 6, 7], 3);
        assert_eq!(close(&uniform, 5), uniform);
    }

    #[test]
    fn test_adjacent_labels_keep_their_boundary() {
        let mut vol = Volume::<u32>::new([16, 4, 4]);
        vol.fill_box([0, 0, 0], [8, 4, 4], 3);
        vol.fill_box([8, 0, 0], [16, 4, 4], 9);
        assert_eq!(close(&vol, 5), vol);
    }
}
