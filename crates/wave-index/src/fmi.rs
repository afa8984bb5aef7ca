//! FM-index over a byte stream.
//!
//! The index is built over the *reversed* input plus one sentinel, so that
//! feeding pattern bytes left to right narrows a reading-order substring
//! match, and walking the LF chain moves forward through the original bytes.
//!
//! Row space: rows are the suffix order of the reversed input; row 0 is the
//! sentinel row. `get_bound(c)` reports the class interval `(s, e]` with
//! `s` = the number of non-sentinel bytes smaller than `c`, and `rank(c, p)`
//! counts occurrences of `c` among BWT rows `[0, p]`, which makes
//! `(s + rank(c, lo), s + rank(c, hi)]` the one-character extension of a
//! bound — the only rank arithmetic the operators use.
//!
//! The original bytes are kept alongside the rank structures: extraction and
//! the builder's position-to-rank lookups are direct array reads instead of
//! LF walks.

use wave_core::{Result, WaveError, SENTINEL};

// ---------------------------------------------------------------------------
// FmIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FmIndex {
    /// Original bytes, without the sentinel.
    text: Vec<u8>,
    /// BWT of `reverse(text) + [SENTINEL]`, one byte per row.
    bwt: Vec<u8>,
    /// Sorted row indices per byte value; `rows[0]` holds the sentinel row.
    rows: Vec<Vec<u32>>,
    /// Occurrences per byte value in `text`.
    counts: [u32; 256],
    /// Class starts: number of non-sentinel bytes smaller than the value.
    class_start: [u32; 256],
    /// Row of each original position.
    row_of_pos: Vec<u32>,
}

impl FmIndex {
    /// Builds the index from the original bytes.
    pub fn from_text(text: Vec<u8>) -> Self {
        let n = text.len();
        let mut reversed = Vec::with_capacity(n + 1);
        reversed.extend(text.iter().rev());
        reversed.push(SENTINEL);

        let sa = suffix_array(&reversed);
        let mut bwt = vec![0u8; n + 1];
        let mut row_of_pos = vec![0u32; n];
        for (row, &start) in sa.iter().enumerate() {
            let start = start as usize;
            bwt[row] = if start == 0 { SENTINEL } else { reversed[start - 1] };
            if start < n {
                // Reversed position `start` is original position n-1-start.
                row_of_pos[n - 1 - start] = row as u32;
            }
        }

        Self::assemble(text, bwt, row_of_pos)
    }

    /// Rebuilds the index from a serialized BWT (`orig_len` includes the
    /// sentinel). Inverting the BWT recovers the original bytes, then the
    /// row structures are recomputed.
    pub fn from_bwt(orig_len: usize, bwt: &[u8]) -> Result<Self> {
        if bwt.len() != orig_len || orig_len == 0 {
            return Err(WaveError::BlockCorrupt(format!(
                "bwt length {} does not match original length {}",
                bwt.len(),
                orig_len
            )));
        }

        let n = orig_len - 1;
        // Full C table including the sentinel and per-row occurrence ranks.
        let mut c_full = [0u32; 257];
        for &b in bwt {
            c_full[b as usize + 1] += 1;
        }
        for i in 1..257 {
            c_full[i] += c_full[i - 1];
        }
        let mut occ = vec![0u32; orig_len];
        let mut seen = [0u32; 256];
        for (i, &b) in bwt.iter().enumerate() {
            occ[i] = seen[b as usize];
            seen[b as usize] += 1;
        }

        if seen[SENTINEL as usize] != 1 {
            return Err(WaveError::BlockCorrupt("bwt must hold exactly one sentinel".into()));
        }

        // LF walk from the sentinel row emits the original bytes in order.
        let mut text = Vec::with_capacity(n);
        let mut row = 0usize;
        for _ in 0..n {
            let c = bwt[row];
            if c == SENTINEL {
                return Err(WaveError::BlockCorrupt("premature sentinel in bwt".into()));
            }
            text.push(c);
            row = (c_full[c as usize] + occ[row]) as usize;
        }

        Ok(Self::from_text(text))
    }

    fn assemble(text: Vec<u8>, bwt: Vec<u8>, row_of_pos: Vec<u32>) -> Self {
        let mut rows: Vec<Vec<u32>> = vec![Vec::new(); 256];
        for (row, &b) in bwt.iter().enumerate() {
            rows[b as usize].push(row as u32);
        }

        let mut counts = [0u32; 256];
        for &b in &text {
            counts[b as usize] += 1;
        }
        let mut class_start = [0u32; 256];
        let mut acc = 0u32;
        for c in 0..256 {
            class_start[c] = acc;
            acc += counts[c];
        }

        Self { text, bwt, rows, counts, class_start, row_of_pos }
    }

    /// Original length plus the sentinel.
    pub fn len(&self) -> usize {
        self.text.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Original bytes, without the sentinel.
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Serialized form: the BWT row bytes.
    pub fn bwt(&self) -> &[u8] {
        &self.bwt
    }

    /// Distinct non-sentinel byte values, ascending.
    pub fn alphabet(&self) -> Vec<u8> {
        (1..256).filter(|&c| self.counts[c] > 0).map(|c| c as u8).collect()
    }

    /// BWT byte at row `p` and its inclusive rank within its value class.
    pub fn access(&self, p: usize) -> Option<(u8, u32)> {
        let c = *self.bwt.get(p)?;
        Some((c, self.rank_raw(c, p)))
    }

    /// Occurrences of `c` among BWT rows `[0, p]`.
    pub fn rank(&self, c: u8, p: usize) -> u32 {
        self.rank_raw(c, p)
    }

    /// Class interval `(s, e]` of rows whose suffix starts with `c`.
    ///
    /// For the sentinel the interval is only meaningful for emptiness and
    /// count tests.
    pub fn get_bound(&self, c: u8) -> Option<(usize, usize)> {
        if c == SENTINEL {
            return Some((0, 1));
        }
        let cnt = self.counts[c as usize] as usize;
        if cnt == 0 {
            return None;
        }
        let s = self.class_start[c as usize] as usize;
        Some((s, s + cnt))
    }

    /// Distinct non-sentinel bytes appearing as BWT rows in `(s, e]`.
    pub fn chars_in_bound(&self, s: usize, e: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for c in 1..256usize {
            let list = &self.rows[c];
            let at = list.partition_point(|&r| (r as usize) <= s);
            if at < list.len() && (list[at] as usize) <= e {
                out.push(c as u8);
            }
        }
        out
    }

    /// Row of the suffix anchored at original position `t`.
    pub fn row_of_pos(&self, t: usize) -> usize {
        self.row_of_pos[t] as usize
    }

    /// 1-based rank of position `t` within the class of its byte value; this
    /// is the slot order the columnar arrays and HLT are aligned to.
    pub fn class_rank_of_pos(&self, t: usize) -> u32 {
        let c = self.text[t];
        self.row_of_pos[t] - self.class_start[c as usize]
    }

    /// Original bytes from `from` up to (excluding) the first `stop` byte.
    pub fn extract_to_char(&self, from: usize, stop: u8) -> &[u8] {
        let tail = &self.text[from.min(self.text.len())..];
        match tail.iter().position(|&b| b == stop) {
            Some(at) => &tail[..at],
            None => tail,
        }
    }

    fn rank_raw(&self, c: u8, p: usize) -> u32 {
        self.rows[c as usize].partition_point(|&r| (r as usize) <= p) as u32
    }
}

// ---------------------------------------------------------------------------
// Suffix array construction
// ---------------------------------------------------------------------------

/// Prefix-doubling suffix array; the trailing sentinel is the unique
/// smallest byte, so plain suffix comparison is total.
fn suffix_array(s: &[u8]) -> Vec<u32> {
    let n = s.len();
    let mut sa: Vec<u32> = (0..n as u32).collect();
    let mut rank: Vec<u32> = s.iter().map(|&b| b as u32).collect();
    let mut next = vec![0u32; n];

    let mut k = 1usize;
    loop {
        let key = |i: u32| -> (u32, u32) {
            let i = i as usize;
            let second = if i + k < n { rank[i + k] + 1 } else { 0 };
            (rank[i], second)
        };
        sa.sort_unstable_by_key(|&i| key(i));

        next[sa[0] as usize] = 0;
        for w in 1..n {
            let bump = (key(sa[w]) != key(sa[w - 1])) as u32;
            next[sa[w] as usize] = next[sa[w - 1] as usize] + bump;
        }
        rank.copy_from_slice(&next);

        if n == 0 || rank[sa[n - 1] as usize] as usize == n - 1 {
            break;
        }
        k *= 2;
    }

    sa
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wave_core::SOH;

    fn extend(fmi: &FmIndex, bound: (usize, usize), c: u8) -> Option<(usize, usize)> {
        let (s, _) = fmi.get_bound(c)?;
        let lo = fmi.rank(c, bound.0) as usize;
        let hi = fmi.rank(c, bound.1) as usize;
        if lo == hi {
            return None;
        }
        Some((s + lo, s + hi))
    }

    fn occurrences(fmi: &FmIndex, pattern: &[u8]) -> usize {
        let mut bound = match fmi.get_bound(pattern[0]) {
            Some(b) => b,
            None => return 0,
        };
        for &c in &pattern[1..] {
            bound = match extend(fmi, bound, c) {
                Some(b) => b,
                None => return 0,
            };
        }
        bound.1 - bound.0
    }

    #[test]
    fn bounds_partition_the_rows() {
        let fmi = FmIndex::from_text(b"abracadabra".to_vec());
        assert_eq!(fmi.len(), 12);
        let (s, e) = fmi.get_bound(b'a').unwrap();
        assert_eq!(e - s, 5);
        let (s, e) = fmi.get_bound(b'b').unwrap();
        assert_eq!(e - s, 2);
        assert!(fmi.get_bound(b'z').is_none());
    }

    #[test]
    fn forward_search_counts_occurrences() {
        let fmi = FmIndex::from_text(b"abracadabra".to_vec());
        assert_eq!(occurrences(&fmi, b"abra"), 2);
        assert_eq!(occurrences(&fmi, b"bra"), 2);
        assert_eq!(occurrences(&fmi, b"cad"), 1);
        assert_eq!(occurrences(&fmi, b"abrac"), 1);
        assert_eq!(occurrences(&fmi, b"abrr"), 0);
    }

    #[test]
    fn class_rank_orders_positions_by_suffix() {
        let text = b"c\x01f".to_vec();
        let fmi = FmIndex::from_text(text);
        // Single occurrences always rank 1.
        assert_eq!(fmi.class_rank_of_pos(0), 1);
        assert_eq!(fmi.class_rank_of_pos(1), 1);
        assert_eq!(fmi.class_rank_of_pos(2), 1);
    }

    #[test]
    fn bwt_round_trip_rebuilds_identical_index() {
        let text = b"the quick brown fox\x01jumps over\x01the lazy dog".to_vec();
        let fmi = FmIndex::from_text(text.clone());
        let loaded = FmIndex::from_bwt(fmi.len(), fmi.bwt()).expect("round trip");
        assert_eq!(loaded.text(), text.as_slice());
        assert_eq!(loaded.bwt(), fmi.bwt());
    }

    #[test]
    fn from_bwt_rejects_bad_input() {
        assert!(FmIndex::from_bwt(0, &[]).is_err());
        assert!(FmIndex::from_bwt(3, &[SENTINEL, SENTINEL, b'a']).is_err());
        assert!(FmIndex::from_bwt(4, &[b'a'; 3]).is_err());
    }

    #[test]
    fn extract_stops_at_marker() {
        let fmi = FmIndex::from_text(b"abc\x01def".to_vec());
        assert_eq!(fmi.extract_to_char(0, SOH), b"abc");
        assert_eq!(fmi.extract_to_char(4, SOH), b"def");
    }

    #[test]
    fn chars_in_bound_lists_distinct_bytes() {
        let fmi = FmIndex::from_text(b"abracadabra".to_vec());
        let (s, e) = fmi.get_bound(b'a').unwrap();
        let mut chars = fmi.chars_in_bound(s, e);
        chars.sort_unstable();
        // BWT rows of the 'a' class: bytes following an 'a' in reading
        // order, i.e. b, c, d, and the sentinel (excluded).
        assert_eq!(chars, vec![b'b', b'c', b'd']);
    }

    #[test]
    fn rank_is_inclusive_of_the_row() {
        let fmi = FmIndex::from_text(b"aa".to_vec());
        // Rows: 0 sentinel, 1..=2 the two 'a' suffixes.
        let total: u32 = (0..fmi.len()).map(|p| u32::from(fmi.bwt()[p] == b'a')).sum();
        assert_eq!(fmi.rank(b'a', fmi.len() - 1), total);
        assert_eq!(fmi.rank(b'a', fmi.len() + 10), total);
    }
}
