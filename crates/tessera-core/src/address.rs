//! Base58Check rendering of 20-byte participant addresses.
//!
//! Layout: `version(1) || hash160(20) || checksum(4)` where the checksum is
//! the first four bytes of the double SHA-256 of the versioned payload.

use crate::error::AddressError;
use crate::hashes::checksum4;

/// Version byte for Tessera pay-to-pubkey-hash addresses.
pub const ADDRESS_VERSION: u8 = 0x41;

/// Encode a 20-byte pubkey hash as a Base58Check address string.
pub fn encode_address(hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(hash);
    let checksum = checksum4(&payload);
    payload.extend_from_slice(&checksum);
    bs58::encode(payload).into_string()
}

/// Decode a Base58Check address string back to its 20-byte pubkey hash.
pub fn decode_address(s: &str) -> Result<[u8; 20], AddressError> {
    let payload = bs58::decode(s)
        .into_vec()
        .map_err(|_| AddressError::InvalidBase58)?;

    if payload.len() != 25 {
        return Err(AddressError::InvalidLength(payload.len()));
    }
    if payload[0] != ADDRESS_VERSION {
        return Err(AddressError::InvalidVersion(payload[0]));
    }

    let (body, checksum) = payload.split_at(21);
    if checksum != checksum4(body) {
        return Err(AddressError::InvalidChecksum);
    }

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&body[1..]);
    Ok(hash)
}
