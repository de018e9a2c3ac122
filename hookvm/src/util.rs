// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hashing, address codec, signature verification and small byte helpers
//! shared by the host functions.

use sha2::{Digest, Sha512};

use hookvm_abi::ReturnCode;

use crate::ledger::{AccountId, Hash256};

/// Hash prefix mixed into transaction ids.
const TXN_PREFIX: &[u8; 4] = b"TXN\0";

/// Hash prefix mixed into emission nonces.
pub(crate) const NONCE_PREFIX: &[u8; 4] = b"ETXN";

/// SHA-512 truncated to its first 32 bytes, the ledger's standard digest.
pub fn sha512h(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    Hash256(out)
}

/// Identifying hash of a serialized transaction.
pub fn txn_id(blob: &[u8]) -> Hash256 {
    sha512h(&[TXN_PREFIX, blob])
}

/// Interpret up to 8 bytes as a big-endian integer. Longer inputs and
/// values that would not fit a non-negative `i64` return `TooBig`.
pub fn data_as_int64(data: &[u8]) -> Result<i64, ReturnCode> {
    if data.len() > 8 {
        return Err(ReturnCode::TooBig);
    }
    let mut out: u64 = 0;
    for &b in data {
        out = (out << 8) | b as u64;
    }
    if out & (1 << 63) != 0 {
        return Err(ReturnCode::TooBig);
    }
    Ok(out as i64)
}

/// Returns true iff every even byte is nonzero and every odd byte is zero.
/// Only a heuristic for UTF-16LE text, may be inaccurate in edge cases.
pub fn is_utf16le(buf: &[u8]) -> bool {
    if buf.is_empty() || buf.len() % 2 != 0 {
        return false;
    }
    buf.chunks_exact(2).all(|c| c[0] != 0 && c[1] == 0)
}

/// Narrow a UTF-16LE buffer by taking its even bytes.
pub fn utf16_narrow(buf: &[u8]) -> Vec<u8> {
    buf.iter().step_by(2).copied().collect()
}

/// Uppercase hex rendering used by the trace sinks.
pub fn hex_upper(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        out.push(char::from_digit((b >> 4) as u32, 16).unwrap().to_ascii_uppercase());
        out.push(char::from_digit((b & 0xF) as u32, 16).unwrap().to_ascii_uppercase());
    }
    out
}

/// Base-58-check encode a 20-byte account id into an r-address.
pub fn encode_raddr(account: &AccountId) -> String {
    bs58::encode(account.0)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check_version(0)
        .into_string()
}

/// Decode an r-address back into a 20-byte account id.
pub fn decode_raddr(raddr: &str) -> Option<AccountId> {
    let decoded = bs58::decode(raddr)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check(Some(0))
        .into_vec()
        .ok()?;
    // the version byte survives decoding
    if decoded.len() != 21 {
        return None;
    }
    let mut id = [0u8; 20];
    id.copy_from_slice(&decoded[1..]);
    Some(AccountId(id))
}

/// Verify a signature using the ledger's key-type convention: a 33-byte key
/// starting `0xED` is ed25519 over the raw message, a 33-byte key starting
/// `0x02`/`0x03` is secp256k1 ECDSA (DER signature) over the SHA-512-half
/// of the message.
pub fn verify(key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    if key.len() != 33 {
        return false;
    }
    match key[0] {
        0xED => {
            let Ok(key_bytes) = <[u8; 32]>::try_from(&key[1..]) else {
                return false;
            };
            let Ok(vk) = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes) else {
                return false;
            };
            let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
                return false;
            };
            vk.verify_strict(message, &sig).is_ok()
        }
        0x02 | 0x03 => {
            let Ok(pk) = secp256k1::PublicKey::from_slice(key) else {
                return false;
            };
            let Ok(sig) = secp256k1::ecdsa::Signature::from_der(signature) else {
                return false;
            };
            let digest = sha512h(&[message]);
            let msg = secp256k1::Message::from_digest(digest.0);
            secp256k1::Secp256k1::verification_only()
                .verify_ecdsa(&msg, &sig, &pk)
                .is_ok()
        }
        _ => false,
    }
}
