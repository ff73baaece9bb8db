//! Key-to-partition hashing for broker records.
//!
//! Records are keyed by correlation id. The key only gives partition affinity;
//! replies are matched by envelope content, never by partition. The hash is
//! 32-bit FNV-1a over the raw key bytes, so every producer in every process
//! places a given key on the same partition.

/// FNV-1a offset basis (32-bit).
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a prime (32-bit).
const FNV_PRIME: u32 = 0x0100_0193;

/// Computes the 32-bit FNV-1a hash of `bytes`.
///
/// # Examples
///
/// ```
/// use topicrpc_core::partition::fnv1a;
///
/// assert_eq!(fnv1a(b""), 0x811c_9dc5);
/// assert_eq!(fnv1a(b"a"), 0xe40c_292c);
/// ```
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Picks the partition for a record key.
///
/// Keyless records and single-partition topics always land on partition 0.
#[must_use]
pub fn partition_for_key(key: Option<&[u8]>, partitions: u32) -> u32 {
    match key {
        Some(key) if partitions > 1 => fnv1a(key) % partitions,
        _ => 0,
    }
}
