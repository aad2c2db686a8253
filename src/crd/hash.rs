//! # Spec Fingerprint
//!
//! Change detection for `JwkerSpec`. The value is compatible with the hashes already
//! stored in `status.synchronizationHash` by earlier controller versions: the compact
//! JSON encoding is walked byte by byte, every byte is hashed with 64-bit FNV-1 and
//! folded into the running value by hashing both little-endian words again.
//! Not a cryptographic hash.

use serde::Serialize;

const FNV1_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV1_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Fingerprint any serializable value, printed as unpadded lowercase hex
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(format!("{:x}", fold_bytes(&bytes)))
}

fn fold_bytes(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, byte| {
        let element = fnv1(&[*byte]);
        let mut pair = [0u8; 16];
        pair[..8].copy_from_slice(&acc.to_le_bytes());
        pair[8..].copy_from_slice(&element.to_le_bytes());
        fnv1(&pair)
    })
}

fn fnv1(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV1_OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(FNV1_PRIME) ^ u64::from(*byte)
    })
}
