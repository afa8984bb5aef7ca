//! Cross-block result merge.
//!
//! Concatenates row ids, columns, and pools, translating text/json/aggregate
//! index references by the running prefix counts while copying — inputs are
//! never mutated. When any column is aggregated, equal row ids collapse onto
//! their first occurrence and the duplicates' aggregators merge in.

use crate::resultset::{Column, ResultSet, AGGREGATE};

pub fn merge(sets: &[ResultSet]) -> ResultSet {
    let live: Vec<&ResultSet> = sets.iter().filter(|rs| !rs.is_empty()).collect();
    let Some(&first) = live.first() else {
        return ResultSet::empty();
    };

    let noc = first.column_type.len();
    let mut merged = ResultSet {
        column_type: vec![wave_core::NULL; noc],
        column: (0..noc)
            .map(|i| Column { name: first.column[i].name.clone(), ..Column::default() })
            .collect(),
        ..ResultSet::default()
    };

    // Prefer the first concrete type a block reports for each column.
    for rs in &live {
        for (i, &typ) in rs.column_type.iter().enumerate() {
            if merged.column_type[i] == wave_core::NULL {
                merged.column_type[i] = typ;
            }
        }
    }

    for rs in &live {
        let text_base = merged.text.len() as u64;
        let json_base = merged.json.len() as u64;
        let agg_base = merged.aggregate.len() as u64;

        merged.row_id.extend_from_slice(&rs.row_id);
        merged.text.extend(rs.text.iter().cloned());
        merged.json.extend(rs.json.iter().cloned());
        merged.aggregate.extend(rs.aggregate.iter().cloned());

        for (i, column) in rs.column.iter().enumerate() {
            let out = &mut merged.column[i];
            for row in 0..rs.row_id.len() {
                let present = column.row_idx.get(row).copied().unwrap_or(0);
                let value = column.value.get(row).copied().unwrap_or(0);
                out.row_idx.push(present);
                let translated = match rs.column_type[i] {
                    AGGREGATE => value + agg_base,
                    wave_core::TEXT if present == 1 => value + text_base,
                    wave_core::JSON if present == 1 => value + json_base,
                    _ => value,
                };
                out.value.push(translated);
            }
        }
    }

    if !merged.column_type.contains(&AGGREGATE) {
        return merged;
    }

    dedup_rows(&mut merged);
    merged
}

/// Collapses duplicate row ids; the first occurrence claims the slot and
/// absorbs the duplicates' aggregators via `merge`, never by re-stepping.
fn dedup_rows(rs: &mut ResultSet) {
    let mut target_of: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();
    let mut keep: Vec<usize> = Vec::with_capacity(rs.row_id.len());

    for i in 0..rs.row_id.len() {
        match target_of.get(&rs.row_id[i]) {
            None => {
                target_of.insert(rs.row_id[i], keep.len());
                keep.push(i);
            }
            Some(&at) => {
                let target_row = keep[at];
                for (j, &typ) in rs.column_type.iter().enumerate() {
                    if typ != AGGREGATE || rs.column[j].row_idx[i] == 0 {
                        continue;
                    }
                    let dup_agg = rs.column[j].value[i] as usize;
                    if rs.column[j].row_idx[target_row] == 0 {
                        rs.column[j].row_idx[target_row] = 1;
                        rs.column[j].value[target_row] = dup_agg as u64;
                    } else {
                        let into = rs.column[j].value[target_row] as usize;
                        let other = rs.aggregate[dup_agg].clone();
                        rs.aggregate[into].merge(&other);
                    }
                }
            }
        }
    }

    rs.row_id = keep.iter().map(|&i| rs.row_id[i]).collect();
    for column in &mut rs.column {
        if column.row_idx.is_empty() {
            continue;
        }
        column.row_idx = keep.iter().map(|&i| column.row_idx[i]).collect();
        column.value = keep.iter().map(|&i| column.value[i]).collect();
    }
}
