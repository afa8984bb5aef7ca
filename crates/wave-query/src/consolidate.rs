//! Consolidation: turns selected columns into result-set rows, with
//! group-by hashing and per-group aggregator fusion.

use std::collections::HashMap;

use wave_core::MAX_DOC;
use wave_ssql::{FuncName, FuncParam};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::aggregate::Aggregator;
use crate::resultset::{Column, ResultSet, AGGREGATE};
use crate::select::{ColData, SelectColumn};

pub(crate) fn consolidate(block_id: u64, rows: &[u16], columns: &[SelectColumn]) -> ResultSet {
    let iid = block_id * MAX_DOC as u64;
    let has_group = columns.iter().any(|c| c.group);
    let group_cols: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.group && c.key.is_some())
        .map(|(i, _)| i)
        .collect();
    let agg_cols: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            c.key.is_some() && c.func.as_ref().is_some_and(|f| f.name != FuncName::Part)
        })
        .map(|(i, _)| i)
        .collect();

    let mut rs = ResultSet {
        column_type: columns
            .iter()
            .enumerate()
            .map(|(i, c)| if agg_cols.contains(&i) { AGGREGATE } else { c.typ })
            .collect(),
        column: columns
            .iter()
            .map(|c| Column { name: c.name.clone(), ..Column::default() })
            .collect(),
        ..ResultSet::default()
    };

    // Text pool shared by every text column, offsets deduped in row order.
    let mut text_idx: HashMap<u32, usize> = HashMap::new();
    for column in columns {
        if let ColData::Text { offsets, texts, .. } = &column.data {
            for offset in offsets {
                if !text_idx.contains_key(offset) {
                    text_idx.insert(*offset, rs.text.len());
                    rs.text.push(texts[offset].clone());
                }
            }
        }
    }

    if !has_group && agg_cols.is_empty() {
        plain_rows(iid, rows, columns, &text_idx, &mut rs);
        return rs;
    }

    grouped_rows(iid, rows, columns, &group_cols, &agg_cols, has_group, &text_idx, &mut rs);
    rs
}

// ---------------------------------------------------------------------------
// Plain rows
// ---------------------------------------------------------------------------

/// One output row per surviving entity.
fn plain_rows(
    iid: u64,
    rows: &[u16],
    columns: &[SelectColumn],
    text_idx: &HashMap<u32, usize>,
    rs: &mut ResultSet,
) {
    let nor = rows.len();
    rs.row_id = rows.iter().map(|&r| iid + r as u64).collect();

    for (i, column) in columns.iter().enumerate() {
        if matches!(column.data, ColData::None | ColData::Null { .. }) {
            continue;
        }
        let mut row_idx = vec![0u8; nor];
        let mut value = vec![0u64; nor];

        match &column.data {
            ColData::Text { rows: r, offsets, .. } => {
                for (j, &row) in r.iter().enumerate() {
                    row_idx[row as usize] = 1;
                    value[row as usize] = text_idx[&offsets[j]] as u64;
                }
            }
            ColData::F64 { rows: r, values } => {
                for (j, &row) in r.iter().enumerate() {
                    row_idx[row as usize] = 1;
                    value[row as usize] = values[j].to_bits();
                }
            }
            ColData::I64 { rows: r, values } => {
                for (j, &row) in r.iter().enumerate() {
                    row_idx[row as usize] = 1;
                    value[row as usize] = values[j] as u64;
                }
            }
            ColData::Bool { rows: r, values } => {
                for (j, &row) in r.iter().enumerate() {
                    row_idx[row as usize] = 1;
                    value[row as usize] = values[j] as u64;
                }
            }
            ColData::Json { rows: r, docs } => {
                for (j, &row) in r.iter().enumerate() {
                    row_idx[row as usize] = 1;
                    value[row as usize] = rs.json.len() as u64;
                    rs.json.push(docs[j].clone());
                }
            }
            ColData::None | ColData::Null { .. } => {}
        }

        rs.column[i].row_idx = row_idx;
        rs.column[i].value = value;
    }
}

// ---------------------------------------------------------------------------
// Grouped rows
// ---------------------------------------------------------------------------

/// Group-by hashing and aggregator fusion. Without grouping a single
/// synthetic row accumulates every entity.
#[allow(clippy::too_many_arguments)]
fn grouped_rows(
    iid: u64,
    rows: &[u16],
    columns: &[SelectColumn],
    group_cols: &[usize],
    agg_cols: &[usize],
    has_group: bool,
    text_idx: &HashMap<u32, usize>,
    rs: &mut ResultSet,
) {
    let mut cursors = vec![0usize; columns.len()];
    let mut group_of: HashMap<u64, usize> = HashMap::new();

    if !has_group {
        // Single synthetic row; aggregators in column order.
        rs.row_id = vec![iid + rows.first().copied().unwrap_or(0) as u64];
        for &f in agg_cols {
            let func = columns[f].func.as_ref().expect("aggregate column has a function");
            let agg = Aggregator::new(func.name).expect("aggregate function");
            rs.column[f].row_idx = vec![0];
            rs.column[f].value = vec![rs.aggregate.len() as u64];
            rs.aggregate.push(agg);
        }
    }

    for (i, _) in rows.iter().enumerate() {
        let target = if has_group {
            let mut digest = Xxh3::new();
            let mut values: Vec<(usize, Option<(u64, Vec<u8>)>)> = Vec::with_capacity(group_cols.len());
            for &g in group_cols {
                let v = group_value(columns, g, cursors[g], i, text_idx, rs);
                if v.is_some() {
                    cursors[g] += 1;
                }
                values.push((g, v));
            }
            for (_, v) in &values {
                if let Some((_, hash_bytes)) = v {
                    digest.update(hash_bytes);
                }
            }
            let hash = digest.digest();

            match group_of.get(&hash) {
                Some(&at) => at,
                None => {
                    let at = group_of.len();
                    group_of.insert(hash, at);
                    rs.row_id.push(hash);
                    for column in &mut rs.column {
                        column.row_idx.push(0);
                        column.value.push(0);
                    }
                    for (g, v) in values {
                        if let Some((value, _)) = v {
                            rs.column[g].row_idx[at] = 1;
                            rs.column[g].value[at] = value;
                        }
                    }
                    for &f in agg_cols {
                        let func = columns[f].func.as_ref().expect("aggregate column has a function");
                        let agg = Aggregator::new(func.name).expect("aggregate function");
                        rs.column[f].value[at] = rs.aggregate.len() as u64;
                        rs.aggregate.push(agg);
                    }
                    at
                }
            }
        } else {
            0
        };

        for &f in agg_cols {
            if let Some(stepped) = step_value(columns, f, cursors[f], i, text_idx) {
                cursors[f] += 1;
                let agg_at = rs.column[f].value[target] as usize;
                match stepped {
                    Stepped::Int(v) => rs.aggregate[agg_at].step_int(v),
                    Stepped::Float(v) => rs.aggregate[agg_at].step_float(v),
                }
                rs.column[f].row_idx[target] = 1;
            }
        }
    }
}

enum Stepped {
    Int(i64),
    Float(f64),
}

/// Value and hash bytes of group column `g` at survivor row `i`, if present.
/// PART(n) columns contribute their value hash modulo the partition count.
fn group_value(
    columns: &[SelectColumn],
    g: usize,
    cursor: usize,
    i: usize,
    text_idx: &HashMap<u32, usize>,
    rs: &mut ResultSet,
) -> Option<(u64, Vec<u8>)> {
    let column = &columns[g];
    let raw: Option<(u64, Vec<u8>)> = match &column.data {
        ColData::Text { rows, offsets, texts } => (rows.get(cursor) == Some(&(i as u32))).then(|| {
            let offset = offsets[cursor];
            (text_idx[&offset] as u64, texts[&offset].clone())
        }),
        ColData::F64 { rows, values } => (rows.get(cursor) == Some(&(i as u32)))
            .then(|| (values[cursor].to_bits(), values[cursor].to_le_bytes().to_vec())),
        ColData::I64 { rows, values } => (rows.get(cursor) == Some(&(i as u32)))
            .then(|| (values[cursor] as u64, values[cursor].to_le_bytes().to_vec())),
        ColData::Bool { rows, values } => (rows.get(cursor) == Some(&(i as u32)))
            .then(|| (values[cursor] as u64, vec![values[cursor] as u8])),
        ColData::Json { rows, docs } => (rows.get(cursor) == Some(&(i as u32))).then(|| {
            let at = rs.json.len() as u64;
            rs.json.push(docs[cursor].clone());
            (at, docs[cursor].clone())
        }),
        ColData::None | ColData::Null { .. } => None,
    };

    let (value, hash_bytes) = raw?;
    if let Some(func) = &column.func {
        if func.name == FuncName::Part {
            let n = match func.param {
                Some(FuncParam::Int(n)) if n > 0 => n as u64,
                _ => 1,
            };
            let bucket = xxh3_64(&hash_bytes) % n;
            return Some((value, bucket.to_le_bytes().to_vec()));
        }
    }
    Some((value, hash_bytes))
}

/// Aggregation input of column `f` at survivor row `i`, if present.
fn step_value(
    columns: &[SelectColumn],
    f: usize,
    cursor: usize,
    i: usize,
    text_idx: &HashMap<u32, usize>,
) -> Option<Stepped> {
    let hit = |rows: &[u32]| rows.get(cursor) == Some(&(i as u32));
    match &columns[f].data {
        ColData::Text { rows, offsets, .. } => {
            hit(rows).then(|| Stepped::Int(text_idx[&offsets[cursor]] as i64))
        }
        ColData::F64 { rows, values } => hit(rows).then(|| Stepped::Float(values[cursor])),
        ColData::I64 { rows, values } => hit(rows).then(|| Stepped::Int(values[cursor])),
        ColData::Bool { rows, .. } => hit(rows).then_some(Stepped::Int(0)),
        ColData::Null { rows } => hit(rows).then_some(Stepped::Int(0)),
        ColData::Json { rows, .. } => hit(rows).then_some(Stepped::Int(0)),
        ColData::None => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::exec;
    use wave_core::json::{parse_json, FRAGMENT_SIZE};
    use wave_core::INT64;
    use wave_index::{build, IndexedBlock};
    use wave_ssql::parse;

    fn block(json: &str, id: u64) -> IndexedBlock {
        let parsed = parse_json(json.as_bytes(), FRAGMENT_SIZE).unwrap();
        build(&parsed, id).unwrap()
    }

    fn run(json: &str, query: &str) -> ResultSet {
        let b = block(json, 0);
        let (stmt, errors) = parse(query);
        assert!(errors.is_empty(), "{errors:?}");
        exec(&b, &stmt)
    }

    #[test]
    fn plain_rows_carry_block_scoped_row_ids() {
        let rs = run(r#"[{"a": 1}, {"a": 2}]"#, "find $a where [$a /a exist]");
        assert_eq!(rs.row_id, vec![0, 1]);
        assert_eq!(rs.column_type, vec![INT64]);
        assert_eq!(rs.column[0].row_idx, vec![1, 1]);
        assert_eq!(rs.column[0].value, vec![1, 2]);
    }

    #[test]
    fn group_by_collapses_equal_keys() {
        let rs = run(
            r#"[{"url": "/x", "hit": 10}, {"url": "/x", "hit": 20}, {"url": "/y", "hit": 5}]"#,
            "find group-by($u), max($h) where [$u /url] [$h /hit]",
        );
        assert_eq!(rs.row_id.len(), 2);
        assert_eq!(rs.aggregate.len(), 2);
        let max_x = rs.aggregate[rs.column[1].value[0] as usize].done_float(0.0);
        let max_y = rs.aggregate[rs.column[1].value[1] as usize].done_float(0.0);
        assert_eq!(max_x, 20.0);
        assert_eq!(max_y, 5.0);
    }

    #[test]
    fn aggregate_without_group_is_one_row() {
        let rs = run(
            r#"[{"d": 1}, {"d": 2}, {"d": 3}]"#,
            "find avg($d) where [$d /d exist]",
        );
        assert_eq!(rs.row_id.len(), 1);
        assert_eq!(rs.column_type, vec![AGGREGATE]);
        assert_eq!(rs.aggregate[0].done_float(0.0), 2.0);
    }

    #[test]
    fn group_hash_is_stable_across_blocks() {
        let a = {
            let b = block(r#"[{"u": "/x", "h": 1}]"#, 1);
            let (stmt, _) = parse("find group-by($u), max($h) where [$u /u] [$h /h]");
            exec(&b, &stmt)
        };
        let b = {
            let b = block(r#"[{"u": "/x", "h": 9}]"#, 2);
            let (stmt, _) = parse("find group-by($u), max($h) where [$u /u] [$h /h]");
            exec(&b, &stmt)
        };
        assert_eq!(a.row_id, b.row_id, "same key hashes alike in both blocks");
    }

    #[test]
    fn null_group_values_are_omitted_from_the_hash() {
        let rs = run(
            r#"[{"u": "/x", "h": 1}, {"h": 2}]"#,
            "find group-by($u), sum($h) where {[$u /u exist] [$h /h exist]}",
        );
        // Two groups: one keyed by "/x", one by the absent value.
        assert_eq!(rs.row_id.len(), 2);
    }

    #[test]
    fn count_counts_rows() {
        let rs = run(
            r#"[{"d": "a"}, {"d": "b"}, {"e": 1}]"#,
            "find count($d) where [$d /d exist]",
        );
        assert_eq!(rs.aggregate[0].done_int(), 2);
    }
}
