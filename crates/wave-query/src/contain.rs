//! Full-text `contain` search over the content index.
//!
//! Patterns support `^` (prefix anchor), `$` (suffix anchor), `*` (zero or
//! more characters), and `\` escapes. Matches are collected as text-heap
//! offsets, then intersected with the queried path's text column.

use std::collections::HashSet;

use wave_core::{FRAG, SENTINEL, SOH, TEXT};
use wave_index::IndexedBlock;

use crate::bound::{find_bound, find_end_of_key_bound, find_end_range, soh_end, Bound};
use crate::predicate::{no_match, pairs_at, Matches};

/// Wildcard marker inside a sanitized pattern; the sentinel never occurs in
/// stored text.
const WILDCARD: u8 = SENTINEL;

pub(crate) fn contain(block: &IndexedBlock, key: &[u8], pattern: &[u8]) -> Matches {
    let Some(entity) = block.entity.as_ref() else {
        return no_match();
    };
    let Some((class_start, _)) = entity.get_bound(TEXT) else {
        return no_match();
    };

    let end = soh_end(entity) + 1;
    let Some(text_bound) = find_end_of_key_bound(entity, end, key, TEXT) else {
        tracing::info!(?key, "path with TEXT value does not exist in block {}", block.id);
        return no_match();
    };

    let Some((sanitized, prefix, suffix)) = sanitize_pattern(pattern) else {
        tracing::info!("sanitized search pattern is empty");
        return no_match();
    };

    let matched = search_content(block, &sanitized, prefix, suffix);
    if matched.is_empty() {
        return no_match();
    }

    let key_beg = text_bound.0 - class_start;
    let sz = text_bound.1 - text_bound.0;
    let window = &block.columnar.text[key_beg..key_beg + sz];
    pairs_at(
        &block.hlt.text,
        key_beg,
        window
            .iter()
            .enumerate()
            .filter(|(_, offset)| matched.contains(offset))
            .map(|(i, _)| i),
    )
}

/// `in(...)` over strings: union of the pattern matches of every listed
/// value.
pub(crate) fn in_text(block: &IndexedBlock, key: &[u8], values: &[String]) -> Matches {
    let Some(entity) = block.entity.as_ref() else {
        return no_match();
    };
    let Some((class_start, _)) = entity.get_bound(TEXT) else {
        return no_match();
    };
    let end = soh_end(entity) + 1;
    let Some(text_bound) = find_end_of_key_bound(entity, end, key, TEXT) else {
        return no_match();
    };

    let mut matched = HashSet::new();
    for value in values {
        if let Some((sanitized, prefix, suffix)) = sanitize_pattern(value.as_bytes()) {
            matched.extend(search_content(block, &sanitized, prefix, suffix));
        }
    }
    if matched.is_empty() {
        return no_match();
    }

    let key_beg = text_bound.0 - class_start;
    let sz = text_bound.1 - text_bound.0;
    let window = &block.columnar.text[key_beg..key_beg + sz];
    pairs_at(
        &block.hlt.text,
        key_beg,
        window
            .iter()
            .enumerate()
            .filter(|(_, offset)| matched.contains(offset))
            .map(|(i, _)| i),
    )
}

/// Strips anchors, resolves escapes, folds `*` into the wildcard marker, and
/// trims leading/trailing wildcards. Returns `None` for an empty pattern.
fn sanitize_pattern(pattern: &[u8]) -> Option<(Vec<u8>, bool, bool)> {
    if pattern.is_empty() {
        return None;
    }
    let prefix = pattern[0] == b'^';
    let mut suffix = pattern[pattern.len() - 1] == b'$';
    let mut body = pattern;
    if suffix {
        if pattern.len() > 1 && pattern[pattern.len() - 2] == b'\\' {
            suffix = false;
        } else {
            body = &body[..body.len() - 1];
        }
    }
    if prefix {
        body = &body[1..];
    }

    let mut out = Vec::with_capacity(body.len());
    let mut escaped = false;
    for &b in body {
        if b == b'\\' && !escaped {
            escaped = true;
            continue;
        }
        if b == b'*' && !escaped {
            out.push(WILDCARD);
        } else {
            out.push(b);
        }
        escaped = false;
    }

    while out.last() == Some(&WILDCARD) {
        out.pop();
    }
    let head = out.iter().take_while(|&&b| b == WILDCARD).count();
    out.drain(..head);

    if out.is_empty() {
        None
    } else {
        Some((out, prefix, suffix))
    }
}

/// Runs the pattern over the content index, producing matched 1-based text
/// offsets.
fn search_content(block: &IndexedBlock, sanitized: &[u8], prefix: bool, suffix: bool) -> HashSet<u32> {
    let Some(content) = block.content.as_ref() else {
        return HashSet::new();
    };
    let content_soh_end = soh_end(content);

    let start = if prefix {
        find_end_range(content, sanitized[0], content_soh_end + 1)
    } else {
        content.get_bound(sanitized[0])
    };
    let Some(start) = start else {
        return HashSet::new();
    };

    // One slot per string; the last slot also covers sentinel terminations.
    let mut matched = vec![false; content_soh_end + 1];
    {
        let frag_start = content.get_bound(FRAG).map(|(s, _)| s).unwrap_or(0);
        let mut on_match = |marker: u8, bound: Bound| match marker {
            SENTINEL => matched[content_soh_end] = true,
            SOH => {
                for row in bound.0..bound.1 {
                    matched[block.header_da[row] as usize] = true;
                }
            }
            _ => {
                for row in bound.0..bound.1 {
                    matched[block.frag_da[row - frag_start] as usize] = true;
                }
            }
        };
        text_search(content, start, &sanitized[1..], suffix, &mut on_match);
    }

    matched
        .iter()
        .enumerate()
        .filter(|(_, &hit)| hit)
        .map(|(i, _)| i as u32 + 1)
        .collect()
}

/// Narrows `bound` by the literal pattern bytes, descending into FRAG at
/// each step so matches may straddle fragment boundaries, and expanding
/// wildcards by DFS.
fn text_search(
    fmi: &wave_index::FmIndex,
    mut bound: Bound,
    mut pattern: &[u8],
    suffix: bool,
    on_match: &mut dyn FnMut(u8, Bound),
) {
    while let Some((&c, rest)) = pattern.split_first() {
        if c == WILDCARD {
            dfs(fmi, bound, rest, suffix, on_match);
            return;
        }

        if let Some(frag) = find_bound(fmi, FRAG, bound) {
            text_search(fmi, frag, pattern, suffix, on_match);
        }

        bound = match find_bound(fmi, c, bound) {
            Some(next) => next,
            None => return,
        };
        pattern = rest;
    }

    // Pattern consumed.
    if suffix {
        for marker in [SENTINEL, SOH] {
            if let Some(terminate) = find_bound(fmi, marker, bound) {
                on_match(marker, terminate);
            }
        }
    } else {
        dfs(fmi, bound, &[], suffix, on_match);
    }
}

/// Depth-first expansion. With an empty remaining pattern every string the
/// bound reaches is a match: emit each terminator. With a remaining pattern
/// (wildcard expansion) try the next literal at every depth, treat FRAG as
/// transparent, and stop branches at string boundaries.
fn dfs(
    fmi: &wave_index::FmIndex,
    bound: Bound,
    pattern: &[u8],
    suffix: bool,
    on_match: &mut dyn FnMut(u8, Bound),
) {
    let mut stack: Vec<Bound> = vec![bound];
    while let Some(bound) = stack.pop() {
        if pattern.is_empty() {
            for marker in [SENTINEL, SOH, FRAG] {
                if let Some(terminate) = find_bound(fmi, marker, bound) {
                    on_match(marker, terminate);
                }
            }
        } else {
            // Wildcards cross fragment boundaries.
            if let Some(frag) = find_bound(fmi, FRAG, bound) {
                stack.push(frag);
            }
            if let Some(next) = find_bound(fmi, pattern[0], bound) {
                text_search(fmi, next, &pattern[1..], suffix, on_match);
            }
        }

        for c in fmi.chars_in_bound(bound.0, bound.1) {
            if c == SOH || c == FRAG {
                continue;
            }
            if let Some(next) = find_bound(fmi, c, bound) {
                stack.push(next);
            }
        }
    }
}
