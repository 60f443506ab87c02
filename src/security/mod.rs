//! Seed-to-key algorithms for UDS SecurityAccess (0x27).
//!
//! Two families are in service. The legacy bit-manipulation algorithms
//! operate on 32-bit seeds with per-algorithm secret constants. The ZCU
//! bootloaders use AES-128-CMAC over a 16 byte seed, keyed per zone and
//! security level.

pub mod error;

use aes::Aes128;
use cmac::{Cmac, Mac};

pub use error::Error;

/// Target ECU family. Selects the diagnostic addresses and the security
/// access key profile.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Zone {
    /// Right zone control unit
    Rzcu,
    /// Left zone control unit
    Lzcu,
}

/// Secret constant of the legacy level 2 algorithm.
pub const SECURITY_KKEY_L2: u32 = 0x0000_cdca;
/// Secret constant of the legacy level 4 algorithm.
pub const SECURITY_KKEY_L4: u32 = 0x0000_1d5c;

const BDU_MIN_PAR: u32 = 0x9212_0273;
const BDU_EOR_PAR: u32 = 0x1220_0107;
const BDU_PLU_PAR: u32 = 0x0508_1829;

pub const RZCU_AES128_KEY_01: [u8; 16] = [
    0x27, 0xbb, 0x7b, 0x9f, 0xaa, 0x4d, 0xec, 0x13, 0x32, 0x7a, 0x7c, 0x2f, 0xf7, 0xfa, 0xa1, 0x9a,
];
pub const RZCU_AES128_KEY_11: [u8; 16] = [
    0xa7, 0x34, 0xd1, 0x55, 0xa9, 0x6a, 0xa4, 0x09, 0xdb, 0x93, 0x3f, 0x74, 0x75, 0xf9, 0x35, 0xe9,
];
pub const LZCU_AES128_KEY_01: [u8; 16] = [
    0x5c, 0x82, 0x0e, 0x6d, 0x1b, 0xc0, 0x99, 0x4e, 0x27, 0x61, 0x8f, 0x35, 0xd2, 0x4a, 0xb3, 0x70,
];
pub const LZCU_AES128_KEY_11: [u8; 16] = [
    0xe3, 0x19, 0x57, 0xc8, 0x64, 0x0d, 0xfb, 0x22, 0x90, 0xae, 0x41, 0x7c, 0x06, 0xd5, 0x38, 0xbf,
];

/// Legacy level 2 algorithm: conditional feedback over 32 rounds.
pub fn compute_level2(seed: u32, key_k: u32) -> u32 {
    let mut key = seed ^ key_k;
    for _ in 0..32 {
        key = if key & 1 != 0 {
            (key >> 1) ^ seed
        } else {
            (key >> 1) ^ key_k
        };
    }
    key
}

/// Legacy level 4 algorithm: rotate-left-7 and XOR over 32 rounds.
pub fn compute_level4(seed: u32, key_k: u32) -> u32 {
    let mut key = seed ^ key_k;
    for _ in 0..32 {
        key = key.rotate_left(7) ^ key_k;
    }
    key
}

/// BDU variant: six rounds of rotate, subtract-with-borrow, XOR and add.
/// The seed is interpreted as a 32-bit big-endian value.
pub fn compute_bdu(seed: [u8; 4]) -> u32 {
    let mut key = u32::from_be_bytes(seed);

    for _ in 0..6 {
        key = key.rotate_right(1);

        let borrow = BDU_MIN_PAR > key;
        key = key.wrapping_sub(BDU_MIN_PAR);
        if borrow {
            key = key.rotate_left(1);
        }

        key ^= BDU_EOR_PAR;
        key = key.rotate_right(1);
        key = key.wrapping_add(BDU_PLU_PAR);
    }

    key.rotate_left(1)
}

/// AES-128-CMAC of `message` under `key`, per RFC 4493.
pub fn aes128_cmac(key: &[u8; 16], message: &[u8]) -> Result<[u8; 16], Error> {
    let mut mac = Cmac::<Aes128>::new_from_slice(key).map_err(|_| Error::CryptoFailure)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Compute the SecurityAccess key for a seed handed out by the given zone
/// at the given request-seed level. The ZCU profiles expect a 16 byte seed.
pub fn compute_key(zone: Zone, level: u8, seed: &[u8]) -> Result<Vec<u8>, Error> {
    let key = match (zone, level) {
        (Zone::Rzcu, 0x01) => &RZCU_AES128_KEY_01,
        (Zone::Rzcu, 0x11) => &RZCU_AES128_KEY_11,
        (Zone::Lzcu, 0x01) => &LZCU_AES128_KEY_01,
        (Zone::Lzcu, 0x11) => &LZCU_AES128_KEY_11,
        _ => return Err(Error::UnknownProfile { zone, level }),
    };

    if seed.len() != 16 {
        return Err(Error::CryptoFailure);
    }

    Ok(aes128_cmac(key, seed)?.to_vec())
}
