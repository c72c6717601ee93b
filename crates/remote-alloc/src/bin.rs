//! Size classes for the segregated free lists.
//!
//! Free chunks are grouped into [`BIN_COUNT`] bins by size. Small sizes get
//! narrow bins and large sizes get wide ones, so a search starting at
//! [`bin_index(size)`](bin_index) skips most chunks that are too small while
//! keeping the number of lists fixed.
//!
//! ```text
//! sizes            width   bins
//! 0     ..    63       2     32   (0..=31)
//! 64    ..   319      16     16   (32..=47)
//! 320   ..  1343     128      8   (48..=55)
//! 1344  ..  5439    1024      4   (56..=59)
//! 5440  .. 21823    8192      2   (60..=61)
//! 21824 ..           -        1   (62)
//! ```

use platform_cast::CastFrom as _;

/// A run of equally wide bins.
#[derive(Debug, Clone, Copy)]
struct Tier {
    /// First size covered by the tier.
    start: u32,
    /// Width of every bin in the tier.
    width: u32,
    /// Number of bins in the tier.
    bins: u32,
}

impl Tier {
    const fn end(&self) -> u32 {
        self.start + self.width * self.bins
    }
}

const TIERS: [Tier; 5] = [
    Tier {
        start: 0,
        width: 2,
        bins: 32,
    },
    Tier {
        start: 64,
        width: 16,
        bins: 16,
    },
    Tier {
        start: 320,
        width: 128,
        bins: 8,
    },
    Tier {
        start: 1344,
        width: 1024,
        bins: 4,
    },
    Tier {
        start: 5440,
        width: 8192,
        bins: 2,
    },
];

const fn count_bins() -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < TIERS.len() {
        count += TIERS[i].bins as usize;
        i += 1;
    }
    // the catch-all bin
    count + 1
}

/// Number of size classes.
pub const BIN_COUNT: usize = count_bins();
const _: () = assert!(BIN_COUNT == 63);

const _: () = {
    let mut i = 1;
    while i < TIERS.len() {
        assert!(TIERS[i - 1].end() == TIERS[i].start, "tiers must be contiguous");
        i += 1;
    }
};

/// Returns the size class a chunk of `size` bytes belongs to.
///
/// The result is always less than [`BIN_COUNT`] and never decreases as `size`
/// grows.
///
/// # Examples
///
/// ```
/// use remote_alloc::bin::{BIN_COUNT, bin_index};
///
/// assert_eq!(bin_index(0), 0);
/// assert_eq!(bin_index(63), 31);
/// assert_eq!(bin_index(64), 32);
/// assert_eq!(bin_index(u32::MAX), BIN_COUNT - 1);
/// ```
#[must_use]
pub fn bin_index(size: u32) -> usize {
    let mut first_bin = 0;
    for tier in &TIERS {
        if size < tier.end() {
            return first_bin + usize::cast_from((size - tier.start) / tier.width);
        }
        first_bin += usize::cast_from(tier.bins);
    }
    BIN_COUNT - 1
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(bin_index(0), 0);
        assert_eq!(bin_index(1), 0);
        assert_eq!(bin_index(2), 1);
        assert_eq!(bin_index(63), 31);

        assert_eq!(bin_index(64), 32);
        assert_eq!(bin_index(79), 32);
        assert_eq!(bin_index(80), 33);
        assert_eq!(bin_index(319), 47);

        assert_eq!(bin_index(320), 48);
        assert_eq!(bin_index(447), 48);
        assert_eq!(bin_index(448), 49);
        assert_eq!(bin_index(1343), 55);

        assert_eq!(bin_index(1344), 56);
        assert_eq!(bin_index(2367), 56);
        assert_eq!(bin_index(2368), 57);
        assert_eq!(bin_index(5439), 59);

        assert_eq!(bin_index(5440), 60);
        assert_eq!(bin_index(13631), 60);
        assert_eq!(bin_index(13632), 61);
        assert_eq!(bin_index(21823), 61);

        assert_eq!(bin_index(21824), 62);
        assert_eq!(bin_index(1 << 20), 62);
        assert_eq!(bin_index(u32::MAX), 62);
    }

    #[test]
    fn test_monotonic() {
        let mut last = 0;
        for size in 0..=30_000 {
            let bin = bin_index(size);
            assert!(bin >= last, "bin_index({size}) = {bin} < {last}");
            assert!(bin - last <= 1, "bin_index skipped a class at {size}");
            last = bin;
        }
        assert_eq!(last, BIN_COUNT - 1);
    }

    #[test]
    fn test_every_bin_is_reachable() {
        let mut seen = [false; BIN_COUNT];
        for size in 0..=22_000 {
            seen[bin_index(size)] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
