//! Serial-number arithmetic for wrapping 32-bit counters (RFC 1982)
//!
//! TCP sequence numbers wrap around at 2^32, so plain integer comparison
//! mis-orders values on either side of the wrap. Here `a` precedes `b` when
//! the forward distance from `a` to `b` is less than half the value space.

use std::cmp::Ordering;

const HALF_SPACE: u32 = 0x7FFF_FFFF;

/// Compare two wrapping 32-bit counters.
///
/// Returns `Ordering::Less` when `a` precedes `b`, `Ordering::Greater` when it
/// follows, and `Ordering::Equal` when they are identical.
#[must_use]
pub fn compare_u32(a: u32, b: u32) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    if (a < b && b - a < HALF_SPACE) || (a > b && a - b > HALF_SPACE) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}
