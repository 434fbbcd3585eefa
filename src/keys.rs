//! Composite key codec for the ordered URL store.
//!
//! The key under which a URL is stored determines the order in which it is
//! crawled: lower keys are crawled earlier. Keys are 10 bytes. The first
//! byte is the priority, biased so that the binary sort order matches the
//! signed order. The second byte is the crawl depth, clamped at 255. The
//! remaining 8 bytes are the docid, big-endian, so URLs discovered earlier
//! win the final tie-break.

pub const COMPOSITE_KEY_LEN: usize = 10;

/// Binary-sortable key over (priority, depth, docid).
pub type CompositeKey = [u8; COMPOSITE_KEY_LEN];

/// Encode the ordering key for a URL.
pub fn composite_key(priority: i8, depth: u16, docid: u64) -> CompositeKey {
    let mut key = [0u8; COMPOSITE_KEY_LEN];
    // Bias the signed priority so that i8::MIN maps to 0x00 and i8::MAX to
    // 0xFF; plain two's complement would sort negative priorities last.
    key[0] = (priority as i16 - i8::MIN as i16) as u8;
    key[1] = depth.min(u8::MAX as u16) as u8;
    key[2..].copy_from_slice(&docid.to_be_bytes());
    key
}

/// Decode a composite key back into (priority, clamped depth, docid).
pub fn decode_composite_key(key: &CompositeKey) -> (i8, u16, u64) {
    let priority = (key[0] as i16 + i8::MIN as i16) as i8;
    let depth = key[1] as u16;
    let mut docid = [0u8; 8];
    docid.copy_from_slice(&key[2..]);
    (priority, depth, u64::from_be_bytes(docid))
}

/// Key for the companion seed-count store.
pub fn seed_key(seed_docid: u64) -> [u8; 8] {
    seed_docid.to_be_bytes()
}
