//! Rank/bound arithmetic shared by every predicate operator.
//!
//! All bounds are half-open on the left: `(s, e]` covers rows `s+1..=e`.
//! Narrowing a bound by one byte moves it into that byte's class interval via
//! two rank lookups.

use wave_core::SOH;
use wave_index::FmIndex;

pub(crate) type Bound = (usize, usize);

/// Upper end of the SOH class; 0 when the stream has no separator.
pub(crate) fn soh_end(fmi: &FmIndex) -> usize {
    fmi.get_bound(SOH).map(|(_, e)| e).unwrap_or(0)
}

/// Rows of `c` whose rank position is at most `end` — the occurrences that
/// open a field (follow an SOH or the stream start).
pub(crate) fn find_end_range(fmi: &FmIndex, c: u8, end: usize) -> Option<Bound> {
    let (s, _) = fmi.get_bound(c)?;
    let rend = fmi.rank(c, end) as usize;
    if rend == 0 {
        return None;
    }
    Some((s, s + rend))
}

/// Narrows `bound` by the next byte `c`.
pub(crate) fn find_bound(fmi: &FmIndex, c: u8, bound: Bound) -> Option<Bound> {
    let (s, _) = fmi.get_bound(c)?;
    let rbeg = fmi.rank(c, bound.0) as usize;
    let rend = fmi.rank(c, bound.1) as usize;
    if rbeg == rend {
        return None;
    }
    Some((s + rbeg, s + rend))
}

/// Feeds the remaining key bytes, then the control byte `cc`.
pub(crate) fn find_key_range(fmi: &FmIndex, mut bound: Bound, key: &[u8], cc: u8) -> Option<Bound> {
    for &k in key {
        bound = find_bound(fmi, k, bound)?;
    }
    find_bound(fmi, cc, bound)
}

/// Bound of `key` immediately followed by the value-type byte `c`, with the
/// first key byte anchored at a field start.
pub(crate) fn find_end_of_key_bound(fmi: &FmIndex, end: usize, key: &[u8], c: u8) -> Option<Bound> {
    let (&first, rest) = key.split_first()?;
    let bound = find_end_range(fmi, first, end)?;
    if rest.is_empty() {
        find_bound(fmi, c, bound)
    } else {
        find_key_range(fmi, bound, rest, c)
    }
}

/// Bound of `key` anchored at a field start, with no trailing marker.
pub(crate) fn find_key_bound_from_soh(fmi: &FmIndex, end: usize, key: &[u8]) -> Option<Bound> {
    let (&first, rest) = key.split_first()?;
    let mut bound = find_end_range(fmi, first, end)?;
    for &k in rest {
        bound = find_bound(fmi, k, bound)?;
    }
    Some(bound)
}
