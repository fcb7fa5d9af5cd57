/// Wraparound-safe sequence arithmetic over the 32-bit identifier space.
///
/// `a` is before `b` when the signed distance `b - a` is positive. Plain
/// `<`/`>` is wrong near the wrap boundary; every min/max/ordering decision in
/// the crate goes through these helpers.
use crate::{MSG_ID_INFO, MSG_ID_RESET};

/// Signed distance from `a` to `b`.
#[inline]
fn distance(a: u32, b: u32) -> i32 {
    b.wrapping_sub(a) as i32
}

/// `a` comes strictly before `b`.
#[inline]
pub fn before(a: u32, b: u32) -> bool {
    distance(a, b) > 0
}

/// `a` comes strictly after `b`.
#[inline]
pub fn after(a: u32, b: u32) -> bool {
    before(b, a)
}

#[inline]
pub fn before_or_eq(a: u32, b: u32) -> bool {
    distance(a, b) >= 0
}

#[inline]
pub fn after_or_eq(a: u32, b: u32) -> bool {
    before_or_eq(b, a)
}

/// `x` lies on the cyclic arc from `lo` up to `hi`, both inclusive.
#[inline]
pub fn in_range(x: u32, lo: u32, hi: u32) -> bool {
    x.wrapping_sub(lo) <= hi.wrapping_sub(lo)
}

/// Control identifiers never carry numbered data.
#[inline]
pub fn is_reserved(id: u32) -> bool {
    id == MSG_ID_INFO || id == MSG_ID_RESET
}

/// The data identifier following `id`, stepping over the reserved values.
#[inline]
pub fn next_id(id: u32) -> u32 {
    let mut next = id.wrapping_add(1);
    while is_reserved(next) {
        next = next.wrapping_add(1);
    }
    next
}
