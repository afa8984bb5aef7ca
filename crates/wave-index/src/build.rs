//! Index-block builder: compresses a parsed block into FM-indexes and fills
//! the header lookup table and document arrays.

use wave_core::{
    Columnar, HeaderLookupTable, ParsedBlock, PathDict, Result, WaveError, AED, BOOL, EOA, EOO,
    FLT64, FRAG, INT64, MAX_DOC, NULL, SOA, SOH, TEXT,
};

use crate::fmi::FmIndex;

/// An immutable, self-contained indexed batch of documents.
#[derive(Debug)]
pub struct IndexedBlock {
    pub id: u64,
    /// Byte offset of each document's start in the entity stream; ascending,
    /// `entity_id[0] == 0`, and the bytes before `entity_id[i+1]` end with
    /// `SOH EOO`.
    pub entity_id: Vec<u32>,
    pub meta: PathDict,
    pub entity: Option<FmIndex>,
    /// Typed value arrays, reordered into the rank order of each value-type
    /// marker in the entity index.
    pub columnar: Columnar,
    pub content: Option<FmIndex>,
    pub hlt: HeaderLookupTable,
    /// Rank of an SOH in the content index -> index of the string before it.
    pub header_da: Vec<u32>,
    /// Rank of a FRAG in the content index -> index of its string.
    pub frag_da: Vec<u32>,
    /// Start offset of each string in the content heap; derived, not stored.
    pub strings: Vec<u32>,
}

impl IndexedBlock {
    /// Number of documents.
    pub fn count(&self) -> usize {
        self.entity_id.len()
    }

    /// Bytes of string `idx` (0-based), FRAG markers included.
    pub fn string_bytes(&self, idx: usize) -> &[u8] {
        let Some(content) = &self.content else { return &[] };
        let beg = self.strings[idx] as usize;
        content.extract_to_char(beg, SOH)
    }

    /// Restores the text at 1-based heap `offset`, FRAG markers stripped.
    pub fn restore_text(&self, offset: u32) -> Vec<u8> {
        if offset == 0 {
            return Vec::new();
        }
        self.string_bytes(offset as usize - 1)
            .iter()
            .copied()
            .filter(|&b| b != FRAG)
            .collect()
    }

    /// Entity-stream bytes of document `entity`, trailing separator trimmed.
    pub fn entity_bytes(&self, entity: u16) -> &[u8] {
        let Some(fmi) = &self.entity else { return &[] };
        let text = fmi.text();
        let beg = self.entity_id[entity as usize] as usize;
        let end = match self.entity_id.get(entity as usize + 1) {
            Some(&next) => next as usize - 2,
            None => text.len(),
        };
        &text[beg..end]
    }
}

/// Builds the indexed form of `parsed` with block id `id`.
pub fn build(parsed: &ParsedBlock, id: u64) -> Result<IndexedBlock> {
    if parsed.count as usize > MAX_DOC {
        return Err(WaveError::BatchOverflow(parsed.count as usize));
    }

    let mut indexed = IndexedBlock {
        id,
        entity_id: vec![0; parsed.count as usize],
        meta: parsed.meta.clone(),
        entity: None,
        columnar: Columnar::default(),
        content: None,
        hlt: HeaderLookupTable::default(),
        header_da: Vec::new(),
        frag_da: Vec::new(),
        strings: Vec::new(),
    };

    if !parsed.content.is_empty() {
        let content = FmIndex::from_text(parsed.content.bytes().to_vec());
        fill_document_arrays(&content, &mut indexed);
        indexed.content = Some(content);
    }

    if !parsed.entity.is_empty() {
        let entity = FmIndex::from_text(parsed.entity.clone());
        fill_hlt(parsed, &entity, &mut indexed)?;
        indexed.entity = Some(entity);
    }

    Ok(indexed)
}

/// Walks the content heap once, mapping each SOH and FRAG rank back to the
/// string it belongs to, and recording string start offsets.
fn fill_document_arrays(content: &FmIndex, indexed: &mut IndexedBlock) {
    let soh_count = content.get_bound(SOH).map(|(s, e)| e - s).unwrap_or(0);
    let frag_count = content.get_bound(FRAG).map(|(s, e)| e - s).unwrap_or(0);
    indexed.header_da = vec![0; soh_count];
    indexed.frag_da = vec![0; frag_count];
    indexed.strings = Vec::with_capacity(soh_count + 1);
    indexed.strings.push(0);

    let mut string_idx = 0u32;
    for (pos, &b) in content.text().iter().enumerate() {
        match b {
            SOH => {
                let rank = content.class_rank_of_pos(pos) as usize;
                indexed.header_da[rank - 1] = string_idx;
                string_idx += 1;
                indexed.strings.push(pos as u32 + 1);
            }
            FRAG => {
                let rank = content.class_rank_of_pos(pos) as usize;
                indexed.frag_da[rank - 1] = string_idx;
            }
            _ => {}
        }
    }
}

/// Walks the entity stream segment by segment, assigning each value-type
/// occurrence its (document, attribute-offset) pair and moving the parsed
/// columnar value into its rank slot.
fn fill_hlt(parsed: &ParsedBlock, entity: &FmIndex, indexed: &mut IndexedBlock) -> Result<()> {
    let class_len = |c: u8| entity.get_bound(c).map(|(s, e)| e - s).unwrap_or(0);

    indexed.columnar.text = vec![0; class_len(TEXT)];
    indexed.columnar.float64 = vec![0.0; class_len(FLT64)];
    indexed.columnar.int64 = vec![0; class_len(INT64)];
    indexed.columnar.bool = vec![false; class_len(BOOL)];
    let hlt = &mut indexed.hlt;
    for (c, isa) in [
        (TEXT, &mut hlt.text),
        (FLT64, &mut hlt.float64),
        (INT64, &mut hlt.int64),
        (BOOL, &mut hlt.bool),
        (NULL, &mut hlt.null),
    ] {
        let len = class_len(c);
        isa.entity = vec![0; len];
        isa.attribute = vec![0; len];
    }

    let text = entity.text();
    let mut doc = 0usize;
    let mut doc_start_seg = 0usize;
    let mut attr = 0u16;
    let mut nested: Vec<u16> = Vec::new();
    // Per-type cursor into the parsed (reading-order) columnar arrays.
    let mut row = [0usize; 256];

    for (seg, range) in segments(text).enumerate() {
        let bytes = &text[range.clone()];
        if bytes.is_empty() {
            continue;
        }

        match *bytes.last().unwrap() {
            EOO => {
                doc += 1;
                indexed.entity_id[doc] = range.start as u32 + 1;
                doc_start_seg = seg + 1;
                attr = 0;
                nested.clear();
            }
            AED => {
                attr = offset16(seg, doc_start_seg)?;
                if let Some(last) = nested.last_mut() {
                    *last = attr;
                }
            }
            SOA => {
                attr = offset16(seg + 1, doc_start_seg)?;
                nested.push(attr);
            }
            EOA => {
                nested.pop();
                attr = nested.last().copied().unwrap_or(0);
            }
            marker @ (TEXT | FLT64 | INT64 | BOOL | NULL) => {
                let pos = range.end - 1;
                let slot = entity.class_rank_of_pos(pos) as usize - 1;
                let i = row[marker as usize];
                row[marker as usize] += 1;
                let doc16 = doc as u16;
                match marker {
                    TEXT => {
                        indexed.columnar.text[slot] = parsed.columnar.text[i];
                        indexed.hlt.text.entity[slot] = doc16;
                        indexed.hlt.text.attribute[slot] = attr;
                    }
                    FLT64 => {
                        indexed.columnar.float64[slot] = parsed.columnar.float64[i];
                        indexed.hlt.float64.entity[slot] = doc16;
                        indexed.hlt.float64.attribute[slot] = attr;
                    }
                    INT64 => {
                        indexed.columnar.int64[slot] = parsed.columnar.int64[i];
                        indexed.hlt.int64.entity[slot] = doc16;
                        indexed.hlt.int64.attribute[slot] = attr;
                    }
                    BOOL => {
                        indexed.columnar.bool[slot] = parsed.columnar.bool[i];
                        indexed.hlt.bool.entity[slot] = doc16;
                        indexed.hlt.bool.attribute[slot] = attr;
                    }
                    _ => {
                        indexed.hlt.null.entity[slot] = doc16;
                        indexed.hlt.null.attribute[slot] = attr;
                    }
                }
            }
            other => {
                return Err(WaveError::Internal(format!(
                    "unexpected segment terminator {other} in entity stream"
                )));
            }
        }
    }

    Ok(())
}

/// Attribute offsets are segment ordinals relative to the document start.
fn offset16(seg: usize, doc_start_seg: usize) -> Result<u16> {
    let diff = seg - doc_start_seg;
    if diff >= 1 << 16 {
        return Err(WaveError::DocumentOverflow(diff));
    }
    Ok(diff as u16)
}

/// Byte ranges of the SOH-separated segments, in stream order. The first
/// segment starts at byte 0 (no leading SOH); each later segment starts
/// right after its SOH.
fn segments(text: &[u8]) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
    let mut start = 0usize;
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        match text[start..].iter().position(|&b| b == SOH) {
            Some(at) => {
                let range = start..start + at;
                start += at + 1;
                Some(range)
            }
            None => {
                done = true;
                Some(start..text.len())
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wave_core::json::{parse_json, FRAGMENT_SIZE};

    fn build_json(json: &str) -> IndexedBlock {
        let parsed = parse_json(json.as_bytes(), FRAGMENT_SIZE).expect("parse");
        build(&parsed, 0).expect("build")
    }

    #[test]
    fn entity_ids_are_document_byte_offsets() {
        let indexed = build_json(r#"[{ "d": "c"}, {"a": "c"}, {"d" : "f"}]"#);
        // Stream: [32 T | 1 6 | 1 33 T | 1 6 | 1 32 T]
        assert_eq!(indexed.entity_id, vec![0, 4, 9]);
        assert_eq!(indexed.entity_bytes(0), &[32, TEXT]);
        assert_eq!(indexed.entity_bytes(1), &[SOH, 33, TEXT]);
        assert_eq!(indexed.entity_bytes(2), &[SOH, 32, TEXT]);
    }

    #[test]
    fn hlt_and_columnar_are_aligned_per_type() {
        let indexed = build_json(r#"[{ "d": "c"}, {"a": "c"}, {"d" : "f"}]"#);
        let entity = indexed.entity.as_ref().unwrap();
        let (s, e) = entity.get_bound(TEXT).unwrap();
        assert_eq!(e - s, 3);
        assert_eq!(indexed.hlt.text.entity.len(), 3);
        assert_eq!(indexed.hlt.text.attribute, vec![0, 0, 0]);
        assert_eq!(indexed.columnar.text.len(), 3);

        // Each slot's columnar value matches the document the HLT points at.
        for slot in 0..3 {
            let doc = indexed.hlt.text.entity[slot];
            let offset = indexed.columnar.text[slot];
            let expect: &[u8] = if doc == 2 { b"f" } else { b"c" };
            assert_eq!(indexed.restore_text(offset), expect, "slot {slot}");
        }
    }

    #[test]
    fn scalar_attributes_have_offset_zero() {
        let indexed = build_json(r#"{"a": 1, "b": 2.5, "c": true, "d": null}"#);
        assert_eq!(indexed.hlt.int64.attribute, vec![0]);
        assert_eq!(indexed.hlt.float64.attribute, vec![0]);
        assert_eq!(indexed.hlt.bool.attribute, vec![0]);
        assert_eq!(indexed.hlt.null.attribute, vec![0]);
        assert_eq!(indexed.columnar.int64, vec![1]);
        assert_eq!(indexed.columnar.float64, vec![2.5]);
        assert_eq!(indexed.columnar.bool, vec![true]);
    }

    #[test]
    fn array_elements_share_an_attribute_offset() {
        let indexed = build_json(r#"{"a": [{"b": 1, "c": 3}, {"b": 2, "c": 4}]}"#);
        // Both values of an element share one offset, elements differ.
        let hlt = &indexed.hlt.int64;
        assert_eq!(hlt.entity, vec![0, 0, 0, 0]);
        let mut by_value = std::collections::HashMap::new();
        for slot in 0..4 {
            by_value.insert(indexed.columnar.int64[slot], hlt.attribute[slot]);
        }
        assert_eq!(by_value[&1], by_value[&3], "first element");
        assert_eq!(by_value[&2], by_value[&4], "second element");
        assert_ne!(by_value[&1], by_value[&2], "elements are distinct");
    }

    #[test]
    fn header_da_maps_soh_rank_to_preceding_string() {
        let indexed = build_json(r#"[{ "d": "c"}, {"a": "c"}, {"d" : "f"}]"#);
        // Heap "c SOH f": one SOH, preceded by string 0.
        assert_eq!(indexed.header_da, vec![0]);
        assert_eq!(indexed.strings, vec![0, 2]);
        assert_eq!(indexed.restore_text(1), b"c");
        assert_eq!(indexed.restore_text(2), b"f");
    }

    #[test]
    fn frag_da_points_into_its_string() {
        let text = "y".repeat(300);
        let indexed = build_json(&format!(r#"[{{"a": "x"}}, {{"a": "{text}"}}]"#));
        assert_eq!(indexed.frag_da.len(), 2);
        assert!(indexed.frag_da.iter().all(|&s| s == 1));
        assert_eq!(indexed.restore_text(2), text.as_bytes());
    }

    #[test]
    fn document_overflow_is_fatal() {
        let values: Vec<String> = (0..70_000).map(|i| i.to_string()).collect();
        let doc = format!(r#"{{"a": [{}]}}"#, values.join(","));
        let parsed = parse_json(doc.as_bytes(), FRAGMENT_SIZE).unwrap();
        match build(&parsed, 0) {
            Err(WaveError::DocumentOverflow(_)) => {}
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[test]
    fn alignment_invariant_holds_across_types() {
        let indexed = build_json(
            r#"[{"t": "x", "f": 1.5, "i": 7, "b": false, "n": null},
                {"t": "y", "i": 9}]"#,
        );
        let entity = indexed.entity.as_ref().unwrap();
        for (marker, len) in [
            (TEXT, indexed.columnar.text.len()),
            (FLT64, indexed.columnar.float64.len()),
            (INT64, indexed.columnar.int64.len()),
            (BOOL, indexed.columnar.bool.len()),
        ] {
            let bound = entity.get_bound(marker).map(|(s, e)| e - s).unwrap_or(0);
            assert_eq!(bound, len, "marker {marker}");
        }
        assert_eq!(indexed.hlt.null.entity.len(), 1);
    }
}
