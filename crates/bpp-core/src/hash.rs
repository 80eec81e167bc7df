//! Separate-chaining label → value index.
//!
//! Mirrors the hash table used throughout the original engine to look up
//! species names and alias definitions: fixed bucket count chosen by the
//! caller up front (no resize), insertion rejects duplicate keys, and both
//! the hash function and the key comparator are pluggable. The C original
//! threaded function pointers and a `void *` payload through every call;
//! here the choice is expressed as two traits so the monomorphized code has
//! no indirection and the compiler can check that a [`HashIndex`]'s hasher
//! and comparator agree on what a "key" is.

use bpp_error::{BppError, BppResult};

/// A 64-bit string hash.
pub trait KeyHasher {
    fn hash(bytes: &[u8]) -> u64;
}

/// FNV-1a, 64-bit variant.
pub struct Fnv1a;

impl KeyHasher for Fnv1a {
    fn hash(bytes: &[u8]) -> u64 {
        const OFFSET: u64 = 0xcbf29ce484222325;
        const PRIME: u64 = 0x100000001b3;
        let mut h = OFFSET;
        for &b in bytes {
            h ^= b as u64;
            h = h.wrapping_mul(PRIME);
        }
        h
    }
}

/// DJB2a (the xor variant of Bernstein's hash).
pub struct Djb2a;

impl KeyHasher for Djb2a {
    fn hash(bytes: &[u8]) -> u64 {
        let mut h: u64 = 5381;
        for &b in bytes {
            h = h.wrapping_mul(33) ^ b as u64;
        }
        h
    }
}

/// A key comparator, decoupled from the hasher so callers can choose
/// byte-equality on labels or identity comparison on already-interned keys.
pub trait KeyEq {
    fn eq(a: &str, b: &str) -> bool;
}

/// Plain byte-for-byte string equality; the default and almost-always-right
/// choice for label lookups.
pub struct ByteEq;

impl KeyEq for ByteEq {
    fn eq(a: &str, b: &str) -> bool {
        a == b
    }
}

/// Identity comparison by string pointer/length, for keys that are known to
/// be interned (e.g. labels borrowed from a single arena). Two distinct
/// allocations holding equal bytes compare unequal under this comparator.
pub struct PointerEq;

impl KeyEq for PointerEq {
    fn eq(a: &str, b: &str) -> bool {
        std::ptr::eq(a, b)
    }
}

/// A separate-chaining map from string label to `V`, with a fixed number of
/// buckets selected at construction. There is no incremental resize: choose
/// `capacity` at least as large as the expected number of entries.
pub struct HashIndex<V> {
    buckets: Vec<Vec<(String, u64, V)>>,
    capacity: usize,
    len: usize,
}

impl<V> HashIndex<V> {
    pub fn create(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        HashIndex {
            buckets: (0..capacity).map(|_| Vec::new()).collect(),
            capacity,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of<H: KeyHasher>(&self, key: &str) -> (usize, u64) {
        let h = H::hash(key.as_bytes());
        ((h as usize) % self.capacity, h)
    }

    /// Inserts `key -> value`. Fails if an equal key (per `C`) is already
    /// present in the same bucket.
    pub fn insert<H: KeyHasher, C: KeyEq>(&mut self, key: &str, value: V) -> BppResult<()> {
        let (bucket, h) = self.bucket_of::<H>(key);
        if self.buckets[bucket]
            .iter()
            .any(|(k, kh, _)| *kh == h && C::eq(k, key))
        {
            return Err(BppError::semantic(
                bpp_error::Provenance::none(),
                format!("duplicate key '{key}' in hash index"),
            ));
        }
        self.buckets[bucket].push((key.to_string(), h, value));
        self.len += 1;
        Ok(())
    }

    pub fn find<H: KeyHasher, C: KeyEq>(&self, key: &str) -> Option<&V> {
        let (bucket, h) = self.bucket_of::<H>(key);
        self.buckets[bucket]
            .iter()
            .find(|(k, kh, _)| *kh == h && C::eq(k, key))
            .map(|(_, _, v)| v)
    }

    pub fn find_mut<H: KeyHasher, C: KeyEq>(&mut self, key: &str) -> Option<&mut V> {
        let (bucket, h) = self.bucket_of::<H>(key);
        self.buckets[bucket]
            .iter_mut()
            .find(|(k, kh, _)| *kh == h && C::eq(k, key))
            .map(|(_, _, v)| v)
    }
}

/// Convenience alias for the common case: FNV-1a hashing with byte equality.
pub type LabelIndex<V> = HashIndex<V>;

impl<V> HashIndex<V> {
    pub fn insert_label(&mut self, key: &str, value: V) -> BppResult<()> {
        self.insert::<Fnv1a, ByteEq>(key, value)
    }

    pub fn find_label(&self, key: &str) -> Option<&V> {
        self.find::<Fnv1a, ByteEq>(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_find_roundtrip() {
        let mut idx: HashIndex<usize> = HashIndex::create(8);
        idx.insert_label("A", 0).unwrap();
        idx.insert_label("B", 1).unwrap();
        assert_eq!(idx.find_label("A"), Some(&0));
        assert_eq!(idx.find_label("B"), Some(&1));
        assert_eq!(idx.find_label("C"), None);
    }

    #[test]
    fn duplicate_insert_fails() {
        let mut idx: HashIndex<usize> = HashIndex::create(4);
        idx.insert_label("A", 0).unwrap();
        assert!(idx.insert_label("A", 1).is_err());
    }

    #[test]
    fn djb2a_and_fnv_agree_on_membership() {
        let mut idx: HashIndex<usize> = HashIndex::create(8);
        idx.insert::<Djb2a, ByteEq>("x", 42).unwrap();
        assert_eq!(idx.find::<Djb2a, ByteEq>("x"), Some(&42));
        assert_eq!(idx.find::<Fnv1a, ByteEq>("x"), None);
    }
}
