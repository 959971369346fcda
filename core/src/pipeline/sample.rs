//! Pick the power-of-two downsampling factor for a decode.

use crate::types::{ImageDimensions, NativeDimensions, RequestedBounds};

/// Largest power-of-two factor that keeps both sides at or above the requested bounds.
///
/// Sources no larger than the bounds in both dimensions decode at factor 1. Otherwise the
/// native size is halved and the factor doubles while the halved size divided by the
/// factor still meets the bounds, so output errs on the large side rather than needing
/// an upscale.
pub fn compute_sample_factor(native: NativeDimensions, requested: RequestedBounds) -> u32 {
    let mut factor = 1u32;

    if native.height > requested.req_height || native.width > requested.req_width {
        let half_height = native.height / 2;
        let half_width = native.width / 2;

        while half_height / factor >= requested.req_height
            && half_width / factor >= requested.req_width
        {
            match factor.checked_mul(2) {
                Some(next) => factor = next,
                None => break,
            }
        }
    }

    factor
}

/// Size of the bitmap produced when decoding `native` at `factor`, rounding up.
pub fn sampled_dimensions(native: NativeDimensions, factor: u32) -> ImageDimensions {
    let factor = factor.max(1);
    ImageDimensions {
        width: native.width.div_ceil(factor).max(1),
        height: native.height.div_ceil(factor).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(width: u32, height: u32) -> NativeDimensions {
        ImageDimensions { width, height }
    }

    #[test]
    fn halves_large_photo_down_to_display_size() {
        let factor = compute_sample_factor(native(1536, 2048), RequestedBounds::new(384, 512));
        assert_eq!(factor, 4);
        assert_eq!(sampled_dimensions(native(1536, 2048), factor), native(384, 512));
    }

    #[test]
    fn small_sources_decode_at_full_size() {
        assert_eq!(compute_sample_factor(native(100, 100), RequestedBounds::new(100, 100)), 1);
        assert_eq!(compute_sample_factor(native(10, 20), RequestedBounds::new(300, 400)), 1);
    }

    #[test]
    fn one_oversized_side_is_enough_to_consider_sampling() {
        // Width fits, height is four times the bound but the halved width is too narrow.
        assert_eq!(compute_sample_factor(native(100, 400), RequestedBounds::new(100, 100)), 1);
        assert_eq!(compute_sample_factor(native(400, 400), RequestedBounds::new(100, 100)), 4);
        assert_eq!(compute_sample_factor(native(401, 399), RequestedBounds::new(100, 100)), 2);
    }

    #[test]
    fn handles_degenerate_and_extreme_sizes() {
        assert_eq!(compute_sample_factor(native(0, 0), RequestedBounds::new(1, 1)), 1);
        let huge = native(u32::MAX, u32::MAX);
        assert_eq!(compute_sample_factor(huge, RequestedBounds::new(1, 1)), 1 << 31);
    }

    #[test]
    fn factor_is_the_largest_valid_power_of_two() {
        for height in (1..=300).step_by(7) {
            for width in (1..=300).step_by(11) {
                for (req_width, req_height) in [(1, 1), (16, 9), (40, 40), (75, 20)] {
                    let n = native(width, height);
                    let r = RequestedBounds::new(req_width, req_height);
                    let factor = compute_sample_factor(n, r);
                    assert!(factor.is_power_of_two());

                    if height <= req_height && width <= req_width {
                        assert_eq!(factor, 1);
                        continue;
                    }

                    let fits = |f: u32| height / 2 / f >= req_height && width / 2 / f >= req_width;
                    // Every doubling taken was justified by the previous factor fitting.
                    if factor > 1 {
                        assert!(fits(factor / 2), "{n:?} {r:?} -> {factor}");
                    }
                    assert!(!fits(factor), "{n:?} {r:?} -> {factor} could grow");
                }
            }
        }
    }
}
