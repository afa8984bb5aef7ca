//! Result-set materialization and JSON encoding.

use wave_core::{BOOL, FLT64, INT64, JSON, TEXT};

use crate::aggregate::Aggregator;

/// Column type marker for aggregated columns.
pub const AGGREGATE: u8 = 0;

/// One materialized output column. `row_idx[i] == 0` means the row has no
/// value (rendered as null); `value[i]` is a type-dependent payload: i64/f64
/// bit patterns, a bool, or an index into the result set's text, json, or
/// aggregate pools.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Column {
    pub name: String,
    pub row_idx: Vec<u8>,
    pub value: Vec<u64>,
}

/// Rows produced by one block (or by merging several).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub row_id: Vec<u64>,
    /// Per column: a value-type marker, or [`AGGREGATE`].
    pub column_type: Vec<u8>,
    pub column: Vec<Column>,
    pub text: Vec<Vec<u8>>,
    pub json: Vec<Vec<u8>>,
    pub aggregate: Vec<Aggregator>,
    /// Row permutation applied by order-by; identity when empty.
    pub order: Vec<usize>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.row_id.is_empty()
    }
}

/// Encodes rows as a JSON array of objects in `rs.order` order, truncated to
/// `limit` (0 means all). Aggregates render as `done_float(0.5)` rounded to
/// four decimals, NaN as null.
pub fn marshal_result_set(rs: &ResultSet, limit: u32) -> Vec<u8> {
    if rs.is_empty() {
        return b"[]".to_vec();
    }

    let limit = match limit as usize {
        0 => rs.row_id.len(),
        n => n.min(rs.row_id.len()),
    };
    let identity: Vec<usize>;
    let order: &[usize] = if rs.order.is_empty() {
        identity = (0..limit).collect();
        &identity
    } else {
        &rs.order[..limit.min(rs.order.len())]
    };

    let mut w = Vec::with_capacity(2048);
    w.push(b'[');
    for (at, &row) in order.iter().enumerate() {
        if at > 0 {
            w.push(b',');
        }
        w.push(b'{');
        for (j, column) in rs.column.iter().enumerate() {
            if j > 0 {
                w.push(b',');
            }
            w.push(b'"');
            w.extend_from_slice(column.name.as_bytes());
            w.extend_from_slice(b"\":");

            if column.row_idx.get(row).copied().unwrap_or(0) == 0 {
                w.extend_from_slice(b"null");
                continue;
            }
            let value = column.value[row];
            match rs.column_type[j] {
                AGGREGATE => {
                    let v = rs.aggregate[value as usize].done_float(0.5);
                    let v = (v * 10_000.0).round() / 10_000.0;
                    if v.is_nan() {
                        w.extend_from_slice(b"null");
                    } else {
                        w.extend_from_slice(format_f64(v).as_bytes());
                    }
                }
                TEXT => {
                    let text = String::from_utf8_lossy(&rs.text[value as usize]);
                    w.extend_from_slice(escape_json(&text).as_bytes());
                }
                FLT64 => w.extend_from_slice(format_f64(f64::from_bits(value)).as_bytes()),
                INT64 => w.extend_from_slice((value as i64).to_string().as_bytes()),
                JSON => w.extend_from_slice(&rs.json[value as usize]),
                BOOL => w.extend_from_slice(if value == 0 { b"false" } else { b"true" }),
                _ => w.extend_from_slice(b"null"),
            }
        }
        w.push(b'}');
    }
    w.push(b']');
    w
}

/// Shortest decimal form without an exponent.
pub(crate) fn format_f64(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

pub(crate) fn escape_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
