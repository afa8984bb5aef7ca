//! JSON restoration: converts a stream of attribute records back to
//! canonical JSON.

use std::collections::{HashMap, HashSet};

use wave_core::{BOOL, EOA, FLT64, INT64, NULL, SOA, TEXT};
use wave_index::IndexedBlock;

use crate::resultset::{escape_json, format_f64};

/// One attribute of a document sub-tree, in stream order. `kind` is the
/// value-type marker, or SOA/EOA for array boundaries.
#[derive(Debug, Clone)]
pub(crate) struct AttrRec {
    /// Path code with the selected parent's prefix stripped.
    pub code: Vec<u8>,
    /// Attribute offset; array elements of one document differ by it.
    pub offset: u16,
    pub kind: u8,
    /// Type-dependent payload: text-heap offset, f64 bits, i64 bits, or a
    /// bool.
    pub value: u64,
}

/// Rebuilds strict JSON from `attrs`. Tracks nested array depths, the
/// previous path per depth, and the emitted key set per depth to decide
/// where to open and close braces.
pub(crate) fn marshal_to_json(
    block: &IndexedBlock,
    parent: &[u8],
    attrs: &[AttrRec],
    texts: &HashMap<u32, Vec<u8>>,
) -> Vec<u8> {
    let parent_segments = if parent.is_empty() {
        0
    } else {
        block.meta.get_path(parent).map(|p| p.len()).unwrap_or(0)
    };

    let mut w: Vec<u8> = Vec::with_capacity(2048);
    let mut depth = 0usize;
    // Per depth: previous path, segment count consumed by enclosing arrays,
    // last element offset, emitted key set.
    let mut prev: Vec<Vec<Vec<u8>>> = vec![Vec::new()];
    let mut nested: Vec<usize> = vec![0];
    let mut diffs: Vec<u16> = vec![0];
    let mut emitted: Vec<HashSet<Vec<u8>>> = vec![HashSet::new()];

    for attr in attrs {
        let mut full = parent.to_vec();
        full.extend_from_slice(&attr.code);
        let Some(segments) = block.meta.get_path(&full) else { continue };
        let mut path: Vec<Vec<u8>> = segments[parent_segments..]
            .iter()
            .map(|s| s.to_vec())
            .collect();

        if depth > 0 {
            if attr.kind == EOA {
                for _ in 0..prev[depth].len() {
                    w.push(b'}');
                }
                w.push(b']');
                nested.pop();
                prev.pop();
                diffs.pop();
                emitted.pop();
                depth -= 1;
                continue;
            }

            let consumed: usize = nested[..=depth].iter().sum();
            path.drain(..consumed.min(path.len()));

            if attr.offset > diffs[depth] {
                if diffs[depth] > 0 {
                    for _ in 0..path.len() {
                        w.push(b'}');
                    }
                    w.push(b',');
                }
                diffs[depth] = attr.offset;
                prev[depth].clear();
                emitted[depth].clear();
            } else if attr.kind == SOA
                && !prev[depth].is_empty()
                && prev[depth].last() == path.last()
            {
                for _ in 0..prev[depth].len() {
                    w.push(b'}');
                }
                w.push(b',');
                prev[depth].clear();
                emitted[depth].clear();
            }
        }

        let mut aligned = 0usize;
        if !prev[depth].is_empty() {
            aligned = common_prefix(&prev[depth], &path);
            for _ in (aligned + 1..prev[depth].len()).rev() {
                w.push(b'}');
            }
        }

        let key: Vec<u8> = path.iter().take(aligned + 1).flatten().copied().collect();
        let mut sep = if emitted[depth].is_empty() { b'{' } else { b',' };
        emitted[depth].insert(key);
        while aligned < path.len() {
            w.push(sep);
            w.push(b'"');
            w.extend_from_slice(&path[aligned]);
            w.push(b'"');
            w.push(b':');
            sep = b'{';
            aligned += 1;
        }
        prev[depth] = path.clone();

        match attr.kind {
            SOA => {
                nested.push(path.len());
                prev.push(Vec::new());
                diffs.push(0);
                emitted.push(HashSet::new());
                depth += 1;
                w.push(b'[');
            }
            TEXT => {
                let text = texts.get(&(attr.value as u32)).cloned().unwrap_or_default();
                w.extend_from_slice(escape_json(&String::from_utf8_lossy(&text)).as_bytes());
            }
            FLT64 => w.extend_from_slice(format_f64(f64::from_bits(attr.value)).as_bytes()),
            INT64 => w.extend_from_slice((attr.value as i64).to_string().as_bytes()),
            BOOL => w.extend_from_slice(if attr.value == 0 { b"false" } else { b"true" }),
            NULL => w.extend_from_slice(b"null"),
            _ => {}
        }
    }

    for _ in 0..prev[depth].len() {
        w.push(b'}');
    }

    if w.is_empty() {
        w.extend_from_slice(b"{}");
    }
    w
}

fn common_prefix(x: &[Vec<u8>], y: &[Vec<u8>]) -> usize {
    x.iter().zip(y).take_while(|(a, b)| a == b).count()
}
