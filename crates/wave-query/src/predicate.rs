//! Value predicates: vectorized scans over the typed columnar slice of one
//! path, mapped back to (entity, attribute) pairs through the HLT.

use wave_core::{HeaderIsa, BOOL, FLT64, INT64, JSON, NULL, TEXT};
use wave_index::IndexedBlock;

use crate::bound::{find_bound, find_end_of_key_bound, find_key_bound_from_soh, soh_end};

/// Parallel (entity, attribute) arrays, sorted by (entity, attribute).
pub(crate) type Matches = (Vec<u16>, Vec<u16>);

pub(crate) fn no_match() -> Matches {
    (Vec::new(), Vec::new())
}

/// Collects HLT pairs for the matched columnar slots and sorts them.
pub(crate) fn pairs_at(hlt: &HeaderIsa, key_beg: usize, slots: impl Iterator<Item = usize>) -> Matches {
    let mut pairs: Vec<(u16, u16)> = slots
        .map(|i| (hlt.entity[key_beg + i], hlt.attribute[key_beg + i]))
        .collect();
    pairs.sort_unstable();
    pairs.dedup();
    (
        pairs.iter().map(|&(e, _)| e).collect(),
        pairs.iter().map(|&(_, a)| a).collect(),
    )
}

/// Locates the columnar window of `key` values carrying marker `c`; returns
/// the offset of the window within the type's class.
fn key_window(block: &IndexedBlock, key: &[u8], c: u8) -> Option<(usize, usize)> {
    let fmi = block.entity.as_ref()?;
    let (class_start, _) = fmi.get_bound(c)?;
    let end = soh_end(fmi) + 1;
    let (beg, bend) = find_end_of_key_bound(fmi, end, key, c)?;
    Some((beg - class_start, bend - beg))
}

pub(crate) fn unary_int(block: &IndexedBlock, key: &[u8], pred: impl Fn(i64) -> bool) -> Matches {
    let Some((key_beg, sz)) = key_window(block, key, INT64) else {
        return no_match();
    };
    let slice = &block.columnar.int64[key_beg..key_beg + sz];
    pairs_at(
        &block.hlt.int64,
        key_beg,
        slice.iter().enumerate().filter(|(_, &v)| pred(v)).map(|(i, _)| i),
    )
}

pub(crate) fn unary_float(block: &IndexedBlock, key: &[u8], pred: impl Fn(f64) -> bool) -> Matches {
    let Some((key_beg, sz)) = key_window(block, key, FLT64) else {
        return no_match();
    };
    let slice = &block.columnar.float64[key_beg..key_beg + sz];
    pairs_at(
        &block.hlt.float64,
        key_beg,
        slice.iter().enumerate().filter(|(_, &v)| pred(v)).map(|(i, _)| i),
    )
}

pub(crate) fn in_int(block: &IndexedBlock, key: &[u8], values: &[i64]) -> Matches {
    let set: std::collections::HashSet<i64> = values.iter().copied().collect();
    unary_int(block, key, |v| set.contains(&v))
}

pub(crate) fn in_float(block: &IndexedBlock, key: &[u8], values: &[f64]) -> Matches {
    unary_float(block, key, |v| values.contains(&v))
}

/// Every (entity, attribute) carrying a value of any type under `key`; the
/// first value-type byte found inside the key's sub-bound wins.
pub(crate) fn exist(block: &IndexedBlock, key: &[u8]) -> Matches {
    let Some(fmi) = block.entity.as_ref() else {
        return no_match();
    };
    let end = soh_end(fmi) + 1;
    let Some(bound) = find_key_bound_from_soh(fmi, end, key) else {
        return no_match();
    };

    for row in bound.0 + 1..=bound.1 {
        let Some((c, _)) = fmi.access(row) else { continue };
        if (TEXT..=JSON).contains(&c) {
            return existing_entity(block, fmi, bound, c);
        }
    }

    no_match()
}

fn existing_entity(
    block: &IndexedBlock,
    fmi: &wave_index::FmIndex,
    bound: (usize, usize),
    c: u8,
) -> Matches {
    let Some(narrowed) = find_bound(fmi, c, bound) else {
        return no_match();
    };
    let Some((class_start, _)) = fmi.get_bound(c) else {
        return no_match();
    };

    let hlt = match c {
        TEXT => &block.hlt.text,
        FLT64 => &block.hlt.float64,
        INT64 => &block.hlt.int64,
        BOOL => &block.hlt.bool,
        NULL => &block.hlt.null,
        _ => return no_match(),
    };
    pairs_at(hlt, narrowed.0 - class_start, 0..narrowed.1 - narrowed.0)
}

/// Resolves the single value-type tail of `key`: the byte read at the end of
/// the key bound, then the bound narrowed to it. A code byte tail means the
/// path continues into a sub-tree.
pub(crate) fn key_type_rank(block: &IndexedBlock, key: &[u8]) -> Option<(u8, usize, usize)> {
    let fmi = block.entity.as_ref()?;
    let end = soh_end(fmi) + 1;
    let bound = find_key_bound_from_soh(fmi, end, key)?;

    let (cc, _) = fmi.access(bound.1)?;
    let (class_start, _) = fmi.get_bound(cc)?;
    let narrowed = find_bound(fmi, cc, bound)?;
    Some((cc, narrowed.0 - class_start, narrowed.1 - narrowed.0))
}

/// True when the tail byte names a scalar column; SOA, EOA, and code bytes
/// fall through to JSON sub-tree selection.
pub(crate) fn is_scalar_marker(c: u8) -> bool {
    matches!(c, TEXT | FLT64 | INT64 | BOOL | NULL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wave_core::json::{parse_json, FRAGMENT_SIZE};
    use wave_index::{build, IndexedBlock};

    fn block(json: &str) -> IndexedBlock {
        let parsed = parse_json(json.as_bytes(), FRAGMENT_SIZE).unwrap();
        build(&parsed, 0).unwrap()
    }

    #[test]
    fn int_comparisons_select_documents() {
        let b = block(r#"[{"a": 1}, {"a": 5}, {"a": 9}, {"b": 5}]"#);
        let key = b.meta.get_code(&[b"a"]).unwrap();
        assert_eq!(unary_int(&b, &key, |v| v == 5).0, vec![1]);
        assert_eq!(unary_int(&b, &key, |v| v > 1).0, vec![1, 2]);
        assert_eq!(unary_int(&b, &key, |v| v <= 5).0, vec![0, 1]);
        assert_eq!(unary_int(&b, &key, |v| v != 5).0, vec![0, 2]);
        assert_eq!(unary_int(&b, &key, |v| (2..=9).contains(&v)).0, vec![1, 2]);
    }

    #[test]
    fn float_and_int_columns_are_distinct() {
        let b = block(r#"[{"a": 0.5}, {"a": 5}]"#);
        let key = b.meta.get_code(&[b"a"]).unwrap();
        assert_eq!(unary_float(&b, &key, |v| v == 0.5).0, vec![0]);
        assert_eq!(unary_int(&b, &key, |v| v == 5).0, vec![1]);
        // An integer probe never sees the float value.
        assert_eq!(unary_int(&b, &key, |_| true).0, vec![1]);
    }

    #[test]
    fn missing_path_yields_empty() {
        let b = block(r#"{"a": 1}"#);
        assert_eq!(unary_int(&b, &[77], |_| true).0, Vec::<u16>::new());
    }

    #[test]
    fn in_lists() {
        let b = block(r#"[{"a": 1}, {"a": 2}, {"a": 3}]"#);
        let key = b.meta.get_code(&[b"a"]).unwrap();
        assert_eq!(in_int(&b, &key, &[1, 3, 99]).0, vec![0, 2]);
        assert_eq!(in_int(&b, &key, &[99]).0, Vec::<u16>::new());
    }

    #[test]
    fn exist_matches_any_value_type() {
        let b = block(r#"[{"d": "x"}, {"e": 1}, {"d": null}]"#);
        let d = b.meta.get_code(&[b"d"]).unwrap();
        let (entities, attributes) = exist(&b, &d);
        // Both documents carrying /d, whatever the type that wins.
        assert!(!entities.is_empty());
        assert_eq!(entities.len(), attributes.len());
        assert!(entities.iter().all(|&e| e == 0 || e == 2));
    }

    #[test]
    fn exist_on_object_interior_is_empty() {
        let b = block(r#"{"a": {"b": 1}}"#);
        let a = b.meta.get_code(&[b"a"]).unwrap();
        assert_eq!(exist(&b, &a).0, Vec::<u16>::new());
    }

    #[test]
    fn array_values_match_with_their_element_offsets() {
        let b = block(r#"{"a": [{"b": 1}, {"b": 2}]}"#);
        let key = b.meta.get_code(&[b"a", b"b"]).unwrap();
        let (entities, attributes) = unary_int(&b, &key, |_| true);
        assert_eq!(entities, vec![0, 0]);
        assert_ne!(attributes[0], attributes[1]);
        assert!(attributes[0] < attributes[1], "sorted by attribute");
    }

    #[test]
    fn key_type_rank_reports_the_tail() {
        let b = block(r#"{"a": 7, "t": "x"}"#);
        let a = b.meta.get_code(&[b"a"]).unwrap();
        let (c, _, sz) = key_type_rank(&b, &a).unwrap();
        assert_eq!(c, INT64);
        assert_eq!(sz, 1);
        let t = b.meta.get_code(&[b"t"]).unwrap();
        assert_eq!(key_type_rank(&b, &t).unwrap().0, TEXT);
    }
}
