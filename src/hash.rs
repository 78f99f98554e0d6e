//! Domain identifier hashing
//!
//! Produces the same per-host identifier the vendor's client script computes,
//! so cookies written here are recognised by the script and vice versa.

const LOW_28_BITS: u32 = 0x0FFF_FFFF;
const HIGH_7_BITS: u32 = 0x0FE0_0000;

/// Hash a hostname into the domain identifier stored as the first field of
/// every tracking cookie.
///
/// Bytes are consumed from last to first. An empty hostname hashes to `1`.
pub fn domain_hash(hostname: &str) -> u32 {
    if hostname.is_empty() {
        return 1;
    }

    let mut a: u32 = 0;
    for &byte in hostname.as_bytes().iter().rev() {
        let o = u32::from(byte);
        a = ((a << 6) & LOW_28_BITS) + o + (o << 14);
        let c = a & HIGH_7_BITS;
        if c != 0 {
            a ^= c >> 21;
        }
    }
    a
}
