//! Metadata heap builders: #Strings, #Blob and #GUID.
//!
//! Each heap interns its content and hands back the byte offset that table
//! rows store. Offsets are stable across the build; the heaps are finished
//! exactly once, 4-aligned, when the metadata root is assembled.

use std::collections::HashMap;

/// The #Strings heap: null-terminated UTF-8, deduplicated, offset 0 is the
/// empty string.
pub struct StringsHeap {
    bytes: Vec<u8>,
    interned: HashMap<String, u32>,
}

impl StringsHeap {
    pub fn new() -> Self {
        Self {
            bytes: vec![0],
            interned: HashMap::new(),
        }
    }

    /// Interns a string, returning its heap offset. The empty string is
    /// always offset 0.
    pub fn add(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&off) = self.interned.get(s) {
            return off;
        }
        let off = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self.interned.insert(s.to_string(), off);
        off
    }

    /// Interns an optional name; `None` maps to the empty string.
    pub fn add_opt(&mut self, s: Option<&str>) -> u32 {
        self.add(s.unwrap_or(""))
    }

    pub fn finish(mut self) -> Vec<u8> {
        align4(&mut self.bytes);
        self.bytes
    }

    /// True when offsets no longer fit a 2-byte index.
    pub fn wide(&self) -> bool {
        self.bytes.len() > 0xFFFF
    }
}

/// The #Blob heap: length-prefixed byte runs, deduplicated, offset 0 is the
/// empty blob.
pub struct BlobHeap {
    bytes: Vec<u8>,
    interned: HashMap<Vec<u8>, u32>,
}

impl BlobHeap {
    pub fn new() -> Self {
        Self {
            bytes: vec![0],
            interned: HashMap::new(),
        }
    }

    /// Interns a blob, returning its heap offset.
    pub fn add(&mut self, blob: &[u8]) -> u32 {
        if blob.is_empty() {
            return 0;
        }
        if let Some(&off) = self.interned.get(blob) {
            return off;
        }
        let off = self.bytes.len() as u32;
        write_compressed_u32(&mut self.bytes, blob.len() as u32);
        self.bytes.extend_from_slice(blob);
        self.interned.insert(blob.to_vec(), off);
        off
    }

    pub fn finish(mut self) -> Vec<u8> {
        align4(&mut self.bytes);
        self.bytes
    }

    pub fn wide(&self) -> bool {
        self.bytes.len() > 0xFFFF
    }
}

/// The #GUID heap: one zero module version id. Indexed 1-based by the Module
/// row.
pub fn guid_heap() -> Vec<u8> {
    vec![0u8; 16]
}

/// ECMA-335 II.23.2 compressed unsigned integer.
pub fn write_compressed_u32(out: &mut Vec<u8>, value: u32) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.push(0x80 | (value >> 8) as u8);
        out.push(value as u8);
    } else {
        out.push(0xC0 | (value >> 24) as u8);
        out.push((value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    }
}

fn align4(bytes: &mut Vec<u8>) {
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_dedup_and_offsets() {
        let mut heap = StringsHeap::new();
        let a = heap.add("Alpha");
        let b = heap.add("Beta");
        assert_eq!(a, 1);
        assert_eq!(b, 7);
        assert_eq!(heap.add("Alpha"), a);
        assert_eq!(heap.add(""), 0);
        assert_eq!(heap.add_opt(None), 0);

        let bytes = heap.finish();
        assert_eq!(&bytes[1..6], b"Alpha");
        assert_eq!(bytes.len() % 4, 0);
    }

    #[test]
    fn blob_length_prefix() {
        let mut heap = BlobHeap::new();
        let off = heap.add(&[1, 2, 3]);
        assert_eq!(off, 1);
        assert_eq!(heap.add(&[1, 2, 3]), off);
        let bytes = heap.finish();
        assert_eq!(bytes[1], 3);
        assert_eq!(&bytes[2..5], &[1, 2, 3]);
    }

    #[test]
    fn compressed_widths() {
        let mut out = Vec::new();
        write_compressed_u32(&mut out, 0x03);
        write_compressed_u32(&mut out, 0x3FFF);
        write_compressed_u32(&mut out, 0x4000);
        assert_eq!(out[0], 0x03);
        assert_eq!(&out[1..3], &[0xBF, 0xFF]);
        assert_eq!(&out[3..7], &[0xC0, 0x00, 0x40, 0x00]);
    }
}
