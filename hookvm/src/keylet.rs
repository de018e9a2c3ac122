// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Keylets: `(ledger entry type, 256-bit key)` pairs identifying ledger
//! objects, with the typed constructors behind `util_keylet`.

use crate::ledger::{AccountId, Hash256};
use crate::util::sha512h;

/// Serialized keylet length: a big-endian `u16` type and a 32-byte key.
pub const KEYLET_LEN: usize = 34;

// Ledger entry type codes.
pub const LT_ANY: u16 = 0x0000;
pub const LT_ACCOUNT_ROOT: u16 = 0x0061;
pub const LT_DIR_NODE: u16 = 0x0064;
pub const LT_RIPPLE_STATE: u16 = 0x0072;
pub const LT_OFFER: u16 = 0x006F;
pub const LT_SIGNER_LIST: u16 = 0x0053;
pub const LT_ESCROW: u16 = 0x0075;
pub const LT_PAYCHAN: u16 = 0x0078;
pub const LT_CHECK: u16 = 0x0043;
pub const LT_DEPOSIT_PREAUTH: u16 = 0x0070;
pub const LT_LEDGER_HASHES: u16 = 0x0068;
pub const LT_AMENDMENTS: u16 = 0x0066;
pub const LT_FEE_SETTINGS: u16 = 0x0073;
pub const LT_NEGATIVE_UNL: u16 = 0x004E;
pub const LT_HOOK: u16 = 0x0048;
pub const LT_HOOK_STATE: u16 = 0x0076;
pub const LT_EMITTED_TXN: u16 = 0x0045;
pub const LT_CHILD: u16 = 0x1CD2;

// Hash namespace bytes keeping the constructor families disjoint.
mod ns {
    pub const ACCOUNT: u8 = b'a';
    pub const OWNER_DIR: u8 = b'O';
    pub const DIR_PAGE: u8 = b'd';
    pub const SIGNERS: u8 = b'S';
    pub const LINE: u8 = b'r';
    pub const OFFER: u8 = b'o';
    pub const ESCROW: u8 = b'u';
    pub const PAYCHAN: u8 = b'x';
    pub const CHECK: u8 = b'C';
    pub const DEPOSIT_PREAUTH: u8 = b'p';
    pub const SKIP: u8 = b's';
    pub const AMENDMENTS: u8 = b'f';
    pub const FEES: u8 = b'e';
    pub const NEGATIVE_UNL: u8 = b'N';
    pub const HOOK: u8 = b'H';
    pub const HOOK_STATE: u8 = b'v';
    pub const EMITTED_TXN: u8 = b'm';
    pub const EMITTED_DIR: u8 = b'E';
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Keylet {
    pub ty: u16,
    pub key: Hash256,
}

impl Keylet {
    pub fn new(ty: u16, key: Hash256) -> Self {
        Keylet { ty, key }
    }

    /// Serialize into the 34-byte wire form.
    pub fn to_bytes(&self) -> [u8; KEYLET_LEN] {
        let mut out = [0u8; KEYLET_LEN];
        out[..2].copy_from_slice(&self.ty.to_be_bytes());
        out[2..].copy_from_slice(&self.key.0);
        out
    }

    /// Reconstruct from the 34-byte wire form.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEYLET_LEN {
            return None;
        }
        let ty = u16::from_be_bytes([bytes[0], bytes[1]]);
        Some(Keylet {
            ty,
            key: Hash256::from_slice(&bytes[2..])?,
        })
    }
}

fn indexed(ty: u16, namespace: u8, parts: &[&[u8]]) -> Keylet {
    let mut inputs: Vec<&[u8]> = Vec::with_capacity(parts.len() + 1);
    let ns = [namespace];
    inputs.push(&ns);
    inputs.extend_from_slice(parts);
    Keylet::new(ty, sha512h(&inputs))
}

pub fn account(id: &AccountId) -> Keylet {
    indexed(LT_ACCOUNT_ROOT, ns::ACCOUNT, &[&id.0])
}

pub fn owner_dir(id: &AccountId) -> Keylet {
    indexed(LT_DIR_NODE, ns::OWNER_DIR, &[&id.0])
}

pub fn hook(id: &AccountId) -> Keylet {
    indexed(LT_HOOK, ns::HOOK, &[&id.0])
}

pub fn signers(id: &AccountId) -> Keylet {
    indexed(LT_SIGNER_LIST, ns::SIGNERS, &[&id.0])
}

pub fn hook_state(owner: &AccountId, key: &Hash256) -> Keylet {
    indexed(LT_HOOK_STATE, ns::HOOK_STATE, &[&owner.0, &key.0])
}

pub fn amendments() -> Keylet {
    indexed(LT_AMENDMENTS, ns::AMENDMENTS, &[])
}

pub fn fees() -> Keylet {
    indexed(LT_FEE_SETTINGS, ns::FEES, &[])
}

pub fn negative_unl() -> Keylet {
    indexed(LT_NEGATIVE_UNL, ns::NEGATIVE_UNL, &[])
}

pub fn emitted_dir() -> Keylet {
    indexed(LT_DIR_NODE, ns::EMITTED_DIR, &[])
}

pub fn emitted(id: &Hash256) -> Keylet {
    indexed(LT_EMITTED_TXN, ns::EMITTED_TXN, &[&id.0])
}

pub fn skip(seq: Option<u32>) -> Keylet {
    match seq {
        None => indexed(LT_LEDGER_HASHES, ns::SKIP, &[]),
        Some(seq) => indexed(LT_LEDGER_HASHES, ns::SKIP, &[&seq.to_be_bytes()]),
    }
}

pub fn child(key: &Hash256) -> Keylet {
    Keylet::new(LT_CHILD, *key)
}

pub fn unchecked(key: &Hash256) -> Keylet {
    Keylet::new(LT_ANY, *key)
}

/// Trust lines hash the two accounts in canonical (byte-wise) order.
pub fn line(a: &AccountId, b: &AccountId, currency: &[u8; 20]) -> Keylet {
    let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
    indexed(LT_RIPPLE_STATE, ns::LINE, &[&lo.0, &hi.0, currency])
}

pub fn offer(id: &AccountId, seq: u32) -> Keylet {
    indexed(LT_OFFER, ns::OFFER, &[&id.0, &seq.to_be_bytes()])
}

pub fn escrow(id: &AccountId, seq: u32) -> Keylet {
    indexed(LT_ESCROW, ns::ESCROW, &[&id.0, &seq.to_be_bytes()])
}

pub fn check(id: &AccountId, seq: u32) -> Keylet {
    indexed(LT_CHECK, ns::CHECK, &[&id.0, &seq.to_be_bytes()])
}

pub fn deposit_preauth(owner: &AccountId, preauthorized: &AccountId) -> Keylet {
    indexed(LT_DEPOSIT_PREAUTH, ns::DEPOSIT_PREAUTH, &[&owner.0, &preauthorized.0])
}

pub fn paychan(source: &AccountId, destination: &AccountId, seq: u32) -> Keylet {
    indexed(LT_PAYCHAN, ns::PAYCHAN, &[&source.0, &destination.0, &seq.to_be_bytes()])
}

/// Directory page: page zero is the directory root itself.
pub fn page(root: &Hash256, index: u64) -> Keylet {
    if index == 0 {
        Keylet::new(LT_DIR_NODE, *root)
    } else {
        indexed(LT_DIR_NODE, ns::DIR_PAGE, &[&root.0, &index.to_be_bytes()])
    }
}

/// A quality-ordered directory page: the base directory key with its low
/// eight bytes replaced by the quality.
pub fn quality(dir: &Keylet, quality: u64) -> Keylet {
    let mut key = dir.key;
    key.0[24..].copy_from_slice(&quality.to_be_bytes());
    Keylet::new(dir.ty, key)
}
