//! Select/projection: resolves each `find` column against the surviving
//! entities.

use std::collections::HashMap;

use wave_core::{AED, BOOL, EOA, FLT64, INT64, JSON, NULL, SOA, SOH, TEXT};
use wave_index::IndexedBlock;
use wave_ssql::Function;

use crate::predicate::{is_scalar_marker, key_type_rank};
use crate::restore::{marshal_to_json, AttrRec};

/// One column being projected: the resolved binding plus the typed data for
/// the surviving rows.
#[derive(Debug)]
pub(crate) struct SelectColumn {
    /// Resolved path code; `None` when the binding never resolved in this
    /// block.
    pub key: Option<Vec<u8>>,
    pub name: String,
    pub group: bool,
    pub func: Option<Function>,
    /// TEXT / FLT64 / INT64 / BOOL / NULL / JSON after selection.
    pub typ: u8,
    pub data: ColData,
}

/// Per-type column payload. `rows` are indices into the survivor list,
/// ascending, at most one entry per row.
#[derive(Debug, Default)]
pub(crate) enum ColData {
    #[default]
    None,
    Text {
        rows: Vec<u32>,
        offsets: Vec<u32>,
        texts: HashMap<u32, Vec<u8>>,
    },
    F64 {
        rows: Vec<u32>,
        values: Vec<f64>,
    },
    I64 {
        rows: Vec<u32>,
        values: Vec<i64>,
    },
    Bool {
        rows: Vec<u32>,
        values: Vec<bool>,
    },
    Null {
        rows: Vec<u32>,
    },
    Json {
        rows: Vec<u32>,
        docs: Vec<Vec<u8>>,
    },
}

pub(crate) fn select(block: &IndexedBlock, mut columns: Vec<SelectColumn>, entities: &[u16]) -> Vec<SelectColumn> {
    for column in &mut columns {
        let Some(key) = column.key.clone() else {
            column.typ = NULL;
            continue;
        };

        if key.is_empty() {
            column.typ = JSON;
            column.data = select_json(block, &key, column.func.is_none(), entities);
            continue;
        }

        let Some((marker, key_beg, sz)) = key_type_rank(block, &key) else {
            column.typ = NULL;
            continue;
        };

        if !is_scalar_marker(marker) {
            column.typ = JSON;
            column.data = select_json(block, &key, column.func.is_none(), entities);
            continue;
        }

        column.typ = marker;
        column.data = match marker {
            TEXT => {
                let (rows, offsets) = pick(&block.hlt.text, key_beg, sz, entities, |i| {
                    block.columnar.text[i]
                });
                let mut texts = HashMap::with_capacity(offsets.len());
                for &offset in &offsets {
                    texts.entry(offset).or_insert_with(|| block.restore_text(offset));
                }
                ColData::Text { rows, offsets, texts }
            }
            FLT64 => {
                let (rows, values) = pick(&block.hlt.float64, key_beg, sz, entities, |i| {
                    block.columnar.float64[i]
                });
                ColData::F64 { rows, values }
            }
            INT64 => {
                let (rows, values) = pick(&block.hlt.int64, key_beg, sz, entities, |i| {
                    block.columnar.int64[i]
                });
                ColData::I64 { rows, values }
            }
            BOOL => {
                let (rows, values) = pick(&block.hlt.bool, key_beg, sz, entities, |i| {
                    block.columnar.bool[i]
                });
                ColData::Bool { rows, values }
            }
            _ => {
                let (rows, _) = pick(&block.hlt.null, key_beg, sz, entities, |_| ());
                ColData::Null { rows }
            }
        };
    }

    columns
}

/// Intersects one type's HLT window with the survivors; the first value in
/// rank order wins for each surviving document.
fn pick<T: Copy>(
    hlt: &wave_core::HeaderIsa,
    key_beg: usize,
    sz: usize,
    entities: &[u16],
    value_at: impl Fn(usize) -> T,
) -> (Vec<u32>, Vec<T>) {
    let mut slot_of: Vec<Option<T>> = vec![None; entities.len()];
    for i in 0..sz {
        let entity = hlt.entity[key_beg + i];
        if let Ok(row) = entities.binary_search(&entity) {
            if slot_of[row].is_none() {
                slot_of[row] = Some(value_at(key_beg + i));
            }
        }
    }

    let mut rows = Vec::new();
    let mut values = Vec::new();
    for (row, slot) in slot_of.into_iter().enumerate() {
        if let Some(value) = slot {
            rows.push(row as u32);
            values.push(value);
        }
    }
    (rows, values)
}

/// Extracts the JSON sub-tree under `key` for every surviving entity that
/// carries it. With `extract` unset (aggregated JSON columns) only presence
/// is recorded.
fn select_json(block: &IndexedBlock, key: &[u8], extract: bool, entities: &[u16]) -> ColData {
    let mut rows = Vec::new();
    let mut docs = Vec::new();

    for (row, &entity) in entities.iter().enumerate() {
        let mut attrs = Vec::new();
        let mut texts = HashMap::new();
        let present = doc_attributes(block, entity, key, &mut attrs, &mut texts);
        if !present {
            continue;
        }
        rows.push(row as u32);
        if extract {
            docs.push(marshal_to_json(block, key, &attrs, &texts));
        } else {
            docs.push(Vec::new());
        }
    }

    ColData::Json { rows, docs }
}

/// Walks one document's entity bytes in stream order, collecting the
/// attribute records under `key`. Returns whether the key is present at all
/// (an empty key is always present).
fn doc_attributes(
    block: &IndexedBlock,
    entity: u16,
    key: &[u8],
    attrs: &mut Vec<AttrRec>,
    texts: &mut HashMap<u32, Vec<u8>>,
) -> bool {
    let Some(fmi) = block.entity.as_ref() else {
        return false;
    };
    let bytes = block.entity_bytes(entity);
    let base = block.entity_id[entity as usize] as usize;

    let mut present = key.is_empty();
    let mut start = 0usize;
    loop {
        let end = bytes[start..]
            .iter()
            .position(|&b| b == SOH)
            .map(|p| start + p)
            .unwrap_or(bytes.len());
        let segment = &bytes[start..end];

        if let Some((&marker, code)) = segment.split_last() {
            if marker != AED && code.starts_with(key) {
                present = true;
                let tail = code[key.len()..].to_vec();
                match marker {
                    SOA | EOA => {
                        attrs.push(AttrRec { code: tail, offset: 0, kind: marker, value: 0 })
                    }
                    TEXT | FLT64 | INT64 | BOOL | NULL => {
                        let pos = base + end - 1;
                        let slot = fmi.class_rank_of_pos(pos) as usize - 1;
                        let (offset, value) = match marker {
                            TEXT => {
                                let text_offset = block.columnar.text[slot];
                                texts
                                    .entry(text_offset)
                                    .or_insert_with(|| block.restore_text(text_offset));
                                (block.hlt.text.attribute[slot], text_offset as u64)
                            }
                            FLT64 => (
                                block.hlt.float64.attribute[slot],
                                block.columnar.float64[slot].to_bits(),
                            ),
                            INT64 => (
                                block.hlt.int64.attribute[slot],
                                block.columnar.int64[slot] as u64,
                            ),
                            BOOL => (
                                block.hlt.bool.attribute[slot],
                                block.columnar.bool[slot] as u64,
                            ),
                            _ => (block.hlt.null.attribute[slot], 0),
                        };
                        attrs.push(AttrRec { code: tail, offset, kind: marker, value });
                    }
                    _ => {}
                }
            }
        }

        if end == bytes.len() {
            break;
        }
        start = end + 1;
    }

    present
}
