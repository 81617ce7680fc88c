//! Integer grid math shared by the dispatch and atlas code.

/// Ceiling division for non-negative integers.
#[inline]
pub const fn div_ceil(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Number of workgroups needed to cover `extent` invocations.
#[inline]
pub const fn workgroup_count(extent: u32, local_size: u32) -> u32 {
    div_ceil(extent, local_size)
}

/// Side length of the square tile grid that holds `slices` tiles.
///
/// Equals `ceil(sqrt(slices))`, computed exactly in integers.
pub const fn grid_side(slices: u32) -> u32 {
    if slices <= 1 {
        return 1;
    }

    let root = slices.isqrt();
    if root * root == slices {
        root
    } else {
        root + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroup_counts() {
        assert_eq!(workgroup_count(128, 8), 16);
        assert_eq!(workgroup_count(64, 8), 8);
        assert_eq!(workgroup_count(1, 8), 1);
        assert_eq!(workgroup_count(9, 8), 2);
        assert_eq!(workgroup_count(0, 8), 0);
    }

    #[test]
    fn grid_side_boundaries() {
        assert_eq!(grid_side(1), 1);
        assert_eq!(grid_side(2), 2);
        assert_eq!(grid_side(4), 2);
        assert_eq!(grid_side(5), 3);
        assert_eq!(grid_side(64), 8);
        assert_eq!(grid_side(65), 9);
    }

    #[test]
    fn grid_side_matches_float_ceil_sqrt() {
        for h in 1..=4096u32 {
            let side = grid_side(h);
            assert_eq!(side, f64::from(h).sqrt().ceil() as u32, "height {h}");
            assert!(side * side >= h);
            assert!((side - 1) * (side - 1) < h);
        }
    }
}
