//! Thumbnail width quantization
//!
//! Every thumbnail width is a power of two no smaller than `2^min_log2`.

/// Highest usable exponent for a `u32` width
const MAX_LOG2: u32 = 31;

fn floor_log2(value: u32) -> u32 {
    if value == 0 {
        0
    } else {
        MAX_LOG2 - value.leading_zeros()
    }
}

/// Map a requested width onto the thumbnail ladder.
///
/// The request is clamped to the native width, rounded down to a power of
/// two, and raised to the `2^min_log2` floor.
pub fn quantize_width(requested: u32, native: u32, min_log2: u32) -> u32 {
    let log2 = floor_log2(requested.min(native)).max(min_log2).min(MAX_LOG2);
    1u32 << log2
}

/// All ladder widths that fit within `native`, ascending
pub fn thumbnail_ladder(native: u32, min_log2: u32) -> Vec<u32> {
    (min_log2.min(MAX_LOG2)..=MAX_LOG2)
        .map(|k| 1u32 << k)
        .take_while(|width| *width <= native)
        .collect()
}
