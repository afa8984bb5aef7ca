//! JSON ingestion: flattens documents into the entity stream, the typed
//! columnar arrays, and the text heap.

use serde_json::Value;

use crate::block::ParsedBlock;
use crate::controls::{is_control_character, AED, BOOL, EOA, EOO, FLT64, FRAG, INT64, NULL, SOA, SOH, TEXT};
use crate::error::{Result, WaveError};

/// Default window between FRAG markers in long text.
pub const FRAGMENT_SIZE: usize = 128;

/// Parses a batch of JSON documents into a [`ParsedBlock`].
///
/// The input may hold several top-level values back to back. A top-level
/// object is one document; a top-level array contributes one document per
/// object element; any other top-level value is ignored.
pub fn parse_json(data: &[u8], frag_size: usize) -> Result<ParsedBlock> {
    let mut block = ParsedBlock::new();

    for value in serde_json::Deserializer::from_slice(data).into_iter::<Value>() {
        match value? {
            Value::Object(fields) => parse_document(&mut block, &fields, frag_size)?,
            Value::Array(items) => {
                for item in &items {
                    if let Value::Object(fields) = item {
                        parse_document(&mut block, fields, frag_size)?;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(block)
}

fn parse_document(
    block: &mut ParsedBlock,
    fields: &serde_json::Map<String, Value>,
    frag_size: usize,
) -> Result<()> {
    if block.count > 0 {
        block.entity.push(SOH);
        block.entity.push(EOO);
    }
    block.count += 1;

    let mut path: Vec<Vec<u8>> = Vec::new();
    for (key, value) in fields {
        path.push(sanitize_key(key.as_bytes()));
        parse_value(block, &mut path, value, frag_size)?;
        path.pop();
    }
    Ok(())
}

fn parse_value(
    block: &mut ParsedBlock,
    path: &mut Vec<Vec<u8>>,
    value: &Value,
    frag_size: usize,
) -> Result<()> {
    match value {
        Value::String(s) => {
            write_path(block, path);
            block.entity.push(TEXT);
            if s.is_empty() {
                block.columnar.text.push(0);
            } else {
                let fragmented = fragment_long_text(s.as_bytes(), frag_size);
                let offset = block.content.add(&fragmented);
                block.columnar.text.push(offset);
            }
        }
        Value::Number(n) => {
            write_path(block, path);
            let token = n.as_str();
            // A zero popcount of `b ^ '.'` marks the dot itself; a dot in the
            // literal selects float parsing, anything else must be an i64.
            if token.bytes().any(|b| (b ^ b'.').count_ones() == 0) {
                let v = token.parse::<f64>().map_err(|e| invalid_number(token, &e))?;
                block.entity.push(FLT64);
                block.columnar.float64.push(v);
            } else {
                let v = token.parse::<i64>().map_err(|e| invalid_number(token, &e))?;
                block.entity.push(INT64);
                block.columnar.int64.push(v);
            }
        }
        Value::Bool(b) => {
            write_path(block, path);
            block.entity.push(BOOL);
            block.columnar.bool.push(*b);
        }
        Value::Null => {
            write_path(block, path);
            block.entity.push(NULL);
        }
        Value::Object(fields) => {
            for (key, nested) in fields {
                path.push(sanitize_key(key.as_bytes()));
                parse_value(block, path, nested, frag_size)?;
                path.pop();
            }
        }
        Value::Array(items) => parse_array(block, path, items, frag_size)?,
    }
    Ok(())
}

fn invalid_number(token: &str, cause: &dyn std::fmt::Display) -> WaveError {
    WaveError::InvalidInput(format!("invalid number '{token}': {cause}"))
}

/// Arrays keep their parent's code: `code SOA`, elements split by `SOH AED`,
/// closed with `SOH code EOA`.
fn parse_array(
    block: &mut ParsedBlock,
    path: &mut Vec<Vec<u8>>,
    items: &[Value],
    frag_size: usize,
) -> Result<()> {
    let code = code_of(block, path);
    if !block.entity.is_empty() {
        block.entity.push(SOH);
    }
    block.entity.extend_from_slice(&code);
    block.entity.push(SOA);

    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            block.entity.push(SOH);
            block.entity.push(AED);
        }
        parse_value(block, path, item, frag_size)?;
    }

    block.entity.push(SOH);
    block.entity.extend_from_slice(&code);
    block.entity.push(EOA);
    Ok(())
}

fn write_path(block: &mut ParsedBlock, path: &[Vec<u8>]) {
    let code = code_of(block, path);
    if !block.entity.is_empty() {
        block.entity.push(SOH);
    }
    block.entity.extend_from_slice(&code);
}

fn code_of(block: &mut ParsedBlock, path: &[Vec<u8>]) -> Vec<u8> {
    let segments: Vec<&[u8]> = path.iter().map(|p| p.as_slice()).collect();
    block.meta.generate_code(&segments)
}

/// Slashes and low control bytes in original keys become underscores before
/// codes are assigned.
fn sanitize_key(key: &[u8]) -> Vec<u8> {
    key.iter()
        .map(|&b| if b == b'/' || b <= EOA { b'_' } else { b })
        .collect()
}

/// Replaces control bytes with spaces and, for text longer than `frag_size`,
/// inserts a FRAG marker every `frag_size` original bytes. The marker does
/// not count toward the next window.
pub fn fragment_long_text(value: &[u8], frag_size: usize) -> Vec<u8> {
    let fragments = value.len().saturating_sub(1) / frag_size.max(1);
    let mut out = Vec::with_capacity(value.len() + fragments);
    for (i, &b) in value.iter().enumerate() {
        if i > 0 && i % frag_size == 0 {
            out.push(FRAG);
        }
        out.push(if is_control_character(b) { b' ' } else { b });
    }
    out
}
