//! Path dictionary: a tree of labels mapping attribute paths to multi-byte
//! UTF-8 codes and back.
//!
//! Each distinct label gets a code point assigned globally on first sight,
//! starting at 32 so single bytes of a code never collide with the control
//! alphabet. The code of a full path is the concatenation of the codes along
//! the tree walk, which keeps the same label distinct under different parents.

use std::collections::HashMap;

use crate::error::{Result, WaveError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    name: Vec<u8>,
    code: Vec<u8>,
    children: Vec<Node>,
}

/// Bidirectional path <-> code dictionary, serialized into every block.
#[derive(Debug, Clone, Default)]
pub struct PathDict {
    root: Node,
    codes: HashMap<Vec<u8>, u32>,
}

impl PathDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the code for `path`, creating tree nodes for any missing tail.
    pub fn generate_code(&mut self, path: &[&[u8]]) -> Vec<u8> {
        let mut code = Vec::new();
        let mut parent = &mut self.root;
        let mut i = 0;
        while i < path.len() {
            match parent.children.iter().position(|n| n.name == path[i]) {
                Some(at) => {
                    parent = &mut parent.children[at];
                    code.extend_from_slice(&parent.code);
                    i += 1;
                }
                None => break,
            }
        }

        for label in &path[i..] {
            let point = match self.codes.get(*label) {
                Some(&c) => c,
                None => {
                    let c = next_code_point(32 + self.codes.len() as u32);
                    self.codes.insert(label.to_vec(), c);
                    c
                }
            };
            let mut buf = [0u8; 4];
            let encoded = char::from_u32(point)
                .unwrap_or(char::REPLACEMENT_CHARACTER)
                .encode_utf8(&mut buf);
            parent.children.push(Node {
                name: label.to_vec(),
                code: encoded.as_bytes().to_vec(),
                children: Vec::new(),
            });
            parent = parent.children.last_mut().unwrap();
            code.extend_from_slice(&parent.code);
        }

        code
    }

    /// Returns the existing code for `path`, or `None` if any segment is
    /// unknown. Empty segments (from leading or doubled slashes) are skipped.
    pub fn get_code(&self, path: &[&[u8]]) -> Option<Vec<u8>> {
        let mut code = Vec::new();
        let mut parent = &self.root;
        for p in path {
            if p.is_empty() {
                continue;
            }
            let node = parent.children.iter().find(|n| n.name == **p)?;
            code.extend_from_slice(&node.code);
            parent = node;
        }
        Some(code)
    }

    /// Decodes `code` back into path labels by walking the tree along UTF-8
    /// rune boundaries.
    pub fn get_path(&self, mut code: &[u8]) -> Option<Vec<&[u8]>> {
        let mut path = Vec::new();
        let mut parent = &self.root;
        while !code.is_empty() {
            let sz = utf8_len(code[0]);
            if sz > code.len() {
                return None;
            }
            let node = parent.children.iter().find(|n| n.code == code[..sz])?;
            path.push(node.name.as_slice());
            code = &code[sz..];
            parent = node;
        }
        Some(path)
    }

    /// Serializes the tree: per node a u16 label length, the label, a u8 code
    /// length, the code, a u32 child count, then the children.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        write_node(&self.root, &mut out);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut at = 0usize;
        let root = read_node(data, &mut at)?;
        let mut codes = HashMap::new();
        collect_codes(&root, &mut codes);
        Ok(Self { root, codes })
    }
}

/// Code points are assigned densely from 32, skipping the surrogate range.
fn next_code_point(candidate: u32) -> u32 {
    if (0xD800..=0xDFFF).contains(&candidate) {
        candidate + 0x800
    } else {
        candidate
    }
}

fn utf8_len(b: u8) -> usize {
    match b {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

fn write_node(node: &Node, out: &mut Vec<u8>) {
    out.extend_from_slice(&(node.name.len() as u16).to_le_bytes());
    out.extend_from_slice(&node.name);
    out.push(node.code.len() as u8);
    out.extend_from_slice(&node.code);
    out.extend_from_slice(&(node.children.len() as u32).to_le_bytes());
    for child in &node.children {
        write_node(child, out);
    }
}

fn read_node(data: &[u8], at: &mut usize) -> Result<Node> {
    let short = || WaveError::BlockCorrupt("short path dictionary".into());

    let name_len = u16::from_le_bytes(take(data, at, 2).ok_or_else(short)?.try_into().unwrap());
    let name = take(data, at, name_len as usize).ok_or_else(short)?.to_vec();
    let code_len = take(data, at, 1).ok_or_else(short)?[0] as usize;
    let code = take(data, at, code_len).ok_or_else(short)?.to_vec();
    let count = u32::from_le_bytes(take(data, at, 4).ok_or_else(short)?.try_into().unwrap());

    let mut children = Vec::with_capacity(count as usize);
    for _ in 0..count {
        children.push(read_node(data, at)?);
    }

    Ok(Node { name, code, children })
}

fn take<'a>(data: &'a [u8], at: &mut usize, n: usize) -> Option<&'a [u8]> {
    let end = at.checked_add(n)?;
    if end > data.len() {
        return None;
    }
    let slice = &data[*at..end];
    *at = end;
    Some(slice)
}

fn collect_codes(node: &Node, codes: &mut HashMap<Vec<u8>, u32>) {
    for child in &node.children {
        if let Some(text) = std::str::from_utf8(&child.code).ok().and_then(|s| s.chars().next()) {
            codes.insert(child.name.clone(), text as u32);
        }
        collect_codes(child, codes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_code_assigns_dense_runes() {
        let mut dict = PathDict::new();
        assert_eq!(dict.generate_code(&[b"abc"]), vec![32u8]);
        assert_eq!(dict.generate_code(&[b"abc", b"abc"]), vec![32u8, 32]);
        assert_eq!(dict.generate_code(&[b"abc", b"bcd"]), vec![32u8, 33]);
    }

    #[test]
    fn get_code_skips_empty_segments() {
        let mut dict = PathDict::new();
        dict.generate_code(&[b"abc", b"abc"]);
        dict.generate_code(&[b"bcd", b"abc"]);
        dict.generate_code(&[b"abc", b"bcd"]);

        assert_eq!(dict.get_code(&[b"abc"]), Some(vec![32u8]));
        assert_eq!(dict.get_code(&[b"abd"]), None);
        assert_eq!(dict.get_code(&[b"bcd", b"abc"]), Some(vec![33u8, 32]));
        assert_eq!(
            dict.get_code(&[b"".as_slice(), b"bcd", b"", b"abc"]),
            Some(vec![33u8, 32])
        );
        assert_eq!(dict.get_code(&[b"abc", b"abcd"]), None);
    }

    #[test]
    fn empty_path_resolves_to_empty_code() {
        let dict = PathDict::new();
        assert_eq!(dict.get_code(&[b"".as_slice(), b""]), Some(vec![]));
    }

    #[test]
    fn get_path_round_trips_through_bytes() {
        let mut dict = PathDict::new();
        dict.generate_code(&[b"abc", b"abc"]);
        dict.generate_code(&[b"bcd", b"abc"]);
        dict.generate_code(&[b"abc", b"bcd"]);

        let data = dict.to_bytes();
        let loaded = PathDict::from_bytes(&data).expect("round trip");

        assert_eq!(loaded.get_path(&[33]), Some(vec![b"bcd".as_slice()]));
        assert_eq!(
            loaded.get_path(&[33, 32]),
            Some(vec![b"bcd".as_slice(), b"abc".as_slice()])
        );
        assert_eq!(loaded.get_path(&[33, 33]), None);
    }

    #[test]
    fn multibyte_codes_decode_on_rune_boundaries() {
        let mut dict = PathDict::new();
        // Push the code space past one byte.
        for i in 0..100u32 {
            let label = format!("k{i}");
            dict.generate_code(&[label.as_bytes()]);
        }
        let code = dict.generate_code(&[b"k99", b"k1"]);
        assert!(code.len() > 2);
        let path = dict.get_path(&code).expect("path");
        assert_eq!(path, vec![b"k99".as_slice(), b"k1".as_slice()]);
    }

    #[test]
    fn same_label_under_two_parents_keeps_one_rune() {
        let mut dict = PathDict::new();
        let a = dict.generate_code(&[b"x", b"shared"]);
        let b = dict.generate_code(&[b"y", b"shared"]);
        // Last rune identical, full codes distinct.
        assert_eq!(a.last(), b.last());
        assert_ne!(a, b);
    }

    #[test]
    fn loaded_dict_continues_code_assignment() {
        let mut dict = PathDict::new();
        dict.generate_code(&[b"a"]);
        dict.generate_code(&[b"b"]);
        let mut loaded = PathDict::from_bytes(&dict.to_bytes()).unwrap();
        // "a" keeps its rune, new labels do not collide with existing ones.
        assert_eq!(loaded.generate_code(&[b"a"]), vec![32u8]);
        let fresh = loaded.generate_code(&[b"c"]);
        assert_ne!(fresh, vec![32u8]);
        assert_ne!(fresh, vec![33u8]);
    }
}
