// SPDX-License-Identifier: CEPL-1.0
//! Small math helpers shared by the renderer: per-frame transforms and the
//! integer arithmetic behind mip chains and uniform-buffer strides.

mod transforms;

pub use glam;
pub use transforms::{projection, rotation_angle, view, FrameTransforms, FAR_PLANE, FOV_Y_DEGREES, NEAR_PLANE};

/// Number of levels in a full mip chain: `floor(log2(max(w, h))) + 1`.
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Rounds `size` up to the next multiple of `alignment`.
/// An alignment of zero or one leaves `size` untouched.
pub fn align_up(size: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_levels_matches_log2() {
        assert_eq!(mip_levels(512, 256), 10);
        assert_eq!(mip_levels(256, 512), 10);
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(1000, 750), 10);
        assert_eq!(mip_levels(4096, 1), 13);
        for (w, h) in [(3u32, 5u32), (17, 2), (1023, 1024), (1025, 7)] {
            let expected = (w.max(h) as f64).log2().floor() as u32 + 1;
            assert_eq!(mip_levels(w, h), expected, "{w}x{h}");
        }
    }

    #[test]
    fn test_mip_levels_zero_is_single_level() {
        assert_eq!(mip_levels(0, 0), 1);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(192, 256), 256);
        assert_eq!(align_up(192, 64), 192);
        assert_eq!(align_up(193, 64), 256);
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(100, 0), 100);
        assert_eq!(align_up(100, 1), 100);
    }
}
