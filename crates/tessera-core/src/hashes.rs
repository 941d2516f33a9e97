//! Hash primitives: double SHA-256 and HASH160.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Double SHA-256: `SHA256(SHA256(data))`.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// `RIPEMD160(SHA256(data))`, the 20-byte address-form hash.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// First four bytes of the double SHA-256, used as a payload checksum.
pub fn checksum4(data: &[u8]) -> [u8; 4] {
    let full = sha256d(data);
    [full[0], full[1], full[2], full[3]]
}
