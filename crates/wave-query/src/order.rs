//! Multi-key ordering of a merged result set.

use std::cmp::Ordering;

use wave_core::{BOOL, FLT64, INT64, TEXT};
use wave_ssql::{Direction, Statement};

use crate::resultset::{ResultSet, AGGREGATE};

/// Applies the statement's sort keys in reverse order with a stable sort per
/// key, so the first key wins. Rows without a value sort last ascending and
/// first descending. The permutation lands in `rs.order`.
pub fn order_by(rs: &mut ResultSet, stmt: &Statement) {
    if rs.is_empty() {
        return;
    }

    let mut rows: Vec<usize> = (0..rs.row_id.len()).collect();

    for order in stmt.order_by.iter().rev() {
        let Some(idx) = stmt.find.iter().position(|f| f.name == order.name) else {
            continue;
        };
        if rs.column[idx].row_idx.is_empty() {
            continue;
        }
        let quantile = stmt.find[idx].func.as_ref().map(|f| f.quantile()).unwrap_or(0.0);
        let typ = rs.column_type[idx];

        rows.sort_by(|&x, &y| {
            let ordering = compare_rows(rs, idx, typ, quantile, x, y);
            match order.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        });
    }

    rs.order = rows;
}

/// Ascending comparison; a missing value compares greater than any present
/// one.
fn compare_rows(rs: &ResultSet, idx: usize, typ: u8, quantile: f64, x: usize, y: usize) -> Ordering {
    let column = &rs.column[idx];
    match (column.row_idx[x] != 0, column.row_idx[y] != 0) {
        (false, false) => Ordering::Equal,
        (false, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
        (true, true) => {
            let (vx, vy) = (column.value[x], column.value[y]);
            match typ {
                AGGREGATE => {
                    let fx = rs.aggregate[vx as usize].done_float(quantile);
                    let fy = rs.aggregate[vy as usize].done_float(quantile);
                    fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
                }
                TEXT => rs.text[vx as usize].cmp(&rs.text[vy as usize]),
                INT64 => (vx as i64).cmp(&(vy as i64)),
                FLT64 => f64::from_bits(vx)
                    .partial_cmp(&f64::from_bits(vy))
                    .unwrap_or(Ordering::Equal),
                BOOL => vx.cmp(&vy),
                _ => Ordering::Equal,
            }
        }
    }
}
