//! Serialized block layout, version 0. Little-endian throughout.

use wave_core::{Columnar, HeaderIsa, HeaderLookupTable, PathDict, Result, WaveError};

use crate::build::IndexedBlock;
use crate::fmi::FmIndex;

const VERSION: u8 = 0;

/// Serializes `block` into the version-0 layout.
pub fn encode_block(block: &IndexedBlock) -> Vec<u8> {
    let meta = block.meta.to_bytes();
    let mut out = Vec::with_capacity(1024 + meta.len());

    out.push(VERSION);
    out.extend_from_slice(&block.id.to_le_bytes());

    put_u32(&mut out, block.entity_id.len() as u32);
    for &v in &block.entity_id {
        put_u32(&mut out, v);
    }

    put_u32(&mut out, meta.len() as u32);
    out.extend_from_slice(&meta);

    put_fmi(&mut out, block.entity.as_ref());

    let col = &block.columnar;
    put_u32(&mut out, col.float64.len() as u32 * 8);
    put_u32(&mut out, col.int64.len() as u32 * 8);
    put_u32(&mut out, col.bool.len() as u32);
    put_u32(&mut out, col.text.len() as u32 * 4);
    for &v in &col.float64 {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for &v in &col.int64 {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for &v in &col.bool {
        out.push(v as u8);
    }
    for &v in &col.text {
        put_u32(&mut out, v);
    }

    put_fmi(&mut out, block.content.as_ref());

    for isa in hlt_pairs(&block.hlt) {
        put_u32(&mut out, isa.entity.len() as u32);
    }
    for isa in hlt_pairs(&block.hlt) {
        for &v in &isa.entity {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for &v in &isa.attribute {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    put_u32(&mut out, block.header_da.len() as u32);
    for &v in &block.header_da {
        put_u32(&mut out, v);
    }
    put_u32(&mut out, block.frag_da.len() as u32);
    for &v in &block.frag_da {
        put_u32(&mut out, v);
    }

    out
}

/// Decodes a version-0 block. Any inconsistency yields
/// [`WaveError::BlockCorrupt`].
pub fn decode_block(data: &[u8]) -> Result<IndexedBlock> {
    let mut r = Reader { data, at: 0 };

    let version = r.u8()?;
    if version != VERSION {
        return Err(WaveError::BlockCorrupt(format!("unsupported version {version}")));
    }
    let id = r.u64()?;

    let count = r.u32()? as usize;
    let mut entity_id = Vec::with_capacity(count);
    for _ in 0..count {
        entity_id.push(r.u32()?);
    }

    let meta_len = r.u32()? as usize;
    let meta = PathDict::from_bytes(r.bytes(meta_len)?)?;

    let entity = read_fmi(&mut r)?;

    let sz_f64 = r.u32()? as usize;
    let sz_i64 = r.u32()? as usize;
    let sz_bool = r.u32()? as usize;
    let sz_text = r.u32()? as usize;
    if sz_f64 % 8 != 0 || sz_i64 % 8 != 0 || sz_text % 4 != 0 {
        return Err(WaveError::BlockCorrupt("misaligned columnar sizes".into()));
    }

    let mut columnar = Columnar::default();
    for _ in 0..sz_f64 / 8 {
        columnar.float64.push(f64::from_le_bytes(r.bytes(8)?.try_into().unwrap()));
    }
    for _ in 0..sz_i64 / 8 {
        columnar.int64.push(i64::from_le_bytes(r.bytes(8)?.try_into().unwrap()));
    }
    for _ in 0..sz_bool {
        columnar.bool.push(r.u8()? != 0);
    }
    for _ in 0..sz_text / 4 {
        columnar.text.push(r.u32()?);
    }

    let content = read_fmi(&mut r)?;

    let mut sizes = [0usize; 5];
    for s in &mut sizes {
        *s = r.u32()? as usize;
    }
    let mut hlt = HeaderLookupTable::default();
    for (i, isa) in hlt_pairs_mut(&mut hlt).into_iter().enumerate() {
        *isa = read_isa(&mut r, sizes[i])?;
    }

    let header_da_len = r.u32()? as usize;
    let mut header_da = Vec::with_capacity(header_da_len);
    for _ in 0..header_da_len {
        header_da.push(r.u32()?);
    }
    let frag_da_len = r.u32()? as usize;
    let mut frag_da = Vec::with_capacity(frag_da_len);
    for _ in 0..frag_da_len {
        frag_da.push(r.u32()?);
    }

    let strings = match &content {
        Some(fmi) => string_starts(fmi.text()),
        None => Vec::new(),
    };

    Ok(IndexedBlock {
        id,
        entity_id,
        meta,
        entity,
        columnar,
        content,
        hlt,
        header_da,
        frag_da,
        strings,
    })
}

fn string_starts(heap: &[u8]) -> Vec<u32> {
    let mut starts = vec![0u32];
    for (pos, &b) in heap.iter().enumerate() {
        if b == wave_core::SOH {
            starts.push(pos as u32 + 1);
        }
    }
    starts
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// FM-index section: original length (with sentinel), BWT length, dictionary
/// length, BWT bytes, dictionary bytes. An absent index writes three zeros.
fn put_fmi(out: &mut Vec<u8>, fmi: Option<&FmIndex>) {
    match fmi {
        Some(fmi) => {
            let dict = fmi.alphabet();
            put_u32(out, fmi.len() as u32);
            put_u32(out, fmi.bwt().len() as u32);
            put_u32(out, dict.len() as u32);
            out.extend_from_slice(fmi.bwt());
            out.extend_from_slice(&dict);
        }
        None => {
            put_u32(out, 0);
            put_u32(out, 0);
            put_u32(out, 0);
        }
    }
}

fn read_fmi(r: &mut Reader<'_>) -> Result<Option<FmIndex>> {
    let orig_len = r.u32()? as usize;
    let bwt_len = r.u32()? as usize;
    let dict_len = r.u32()? as usize;
    let bwt = r.bytes(bwt_len)?.to_vec();
    let dict = r.bytes(dict_len)?.to_vec();
    if bwt_len == 0 {
        return Ok(None);
    }

    let fmi = FmIndex::from_bwt(orig_len, &bwt)?;
    if fmi.alphabet() != dict {
        return Err(WaveError::BlockCorrupt("alphabet mismatch".into()));
    }
    Ok(Some(fmi))
}

fn read_isa(r: &mut Reader<'_>, len: usize) -> Result<HeaderIsa> {
    let mut isa = HeaderIsa {
        entity: Vec::with_capacity(len),
        attribute: Vec::with_capacity(len),
    };
    for _ in 0..len {
        isa.entity.push(r.u16()?);
    }
    for _ in 0..len {
        isa.attribute.push(r.u16()?);
    }
    Ok(isa)
}

fn hlt_pairs(hlt: &HeaderLookupTable) -> [&HeaderIsa; 5] {
    [&hlt.text, &hlt.float64, &hlt.int64, &hlt.bool, &hlt.null]
}

fn hlt_pairs_mut(hlt: &mut HeaderLookupTable) -> [&mut HeaderIsa; 5] {
    [
        &mut hlt.text,
        &mut hlt.float64,
        &mut hlt.int64,
        &mut hlt.bool,
        &mut hlt.null,
    ]
}

struct Reader<'a> {
    data: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .at
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| WaveError::BlockCorrupt("short read".into()))?;
        let out = &self.data[self.at..end];
        self.at = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build;
    use wave_core::json::{parse_json, FRAGMENT_SIZE};

    fn round_trip(json: &str) -> (IndexedBlock, IndexedBlock) {
        let parsed = parse_json(json.as_bytes(), FRAGMENT_SIZE).unwrap();
        let built = build(&parsed, 42).unwrap();
        let data = encode_block(&built);
        let loaded = decode_block(&data).unwrap();
        (built, loaded)
    }

    #[test]
    fn encode_decode_round_trips_field_for_field() {
        let (built, loaded) = round_trip(
            r#"[{"url": "/x", "hit": 10, "duration": 1.5, "ok": true, "gone": null},
                {"url": "/y", "hit": 20, "tags": ["a", "b"]}]"#,
        );
        assert_eq!(loaded.id, built.id);
        assert_eq!(loaded.entity_id, built.entity_id);
        assert_eq!(loaded.columnar, built.columnar);
        assert_eq!(loaded.hlt, built.hlt);
        assert_eq!(loaded.header_da, built.header_da);
        assert_eq!(loaded.frag_da, built.frag_da);
        assert_eq!(loaded.strings, built.strings);
        assert_eq!(
            loaded.entity.as_ref().unwrap().text(),
            built.entity.as_ref().unwrap().text()
        );
        assert_eq!(
            loaded.content.as_ref().unwrap().text(),
            built.content.as_ref().unwrap().text()
        );
    }

    #[test]
    fn numeric_only_block_omits_content_index() {
        let (built, loaded) = round_trip(r#"{"a": 1, "b": 2.5}"#);
        assert!(built.content.is_none());
        assert!(loaded.content.is_none());
        assert!(loaded.strings.is_empty());
    }

    #[test]
    fn bad_version_is_corrupt() {
        let (built, _) = round_trip(r#"{"a": 1}"#);
        let mut data = encode_block(&built);
        data[0] = 9;
        assert!(matches!(decode_block(&data), Err(WaveError::BlockCorrupt(_))));
    }

    #[test]
    fn truncated_block_is_corrupt() {
        let (built, _) = round_trip(r#"{"a": 1}"#);
        let data = encode_block(&built);
        for cut in [0, 1, 9, data.len() / 2, data.len() - 1] {
            assert!(
                matches!(decode_block(&data[..cut]), Err(WaveError::BlockCorrupt(_))),
                "cut at {cut}"
            );
        }
    }
}
