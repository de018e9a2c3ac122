// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The emission subsystem: reservation, burden/generation bookkeeping,
//! nonce issuance, `EmitDetails` construction and the seven-rule
//! validation of candidate child transactions.

use std::collections::BTreeSet;

use hookvm_abi::{
    ReturnCode, DROPS_PER_BYTE, EMIT_DETAILS_SIZE, FEE_BASE_MULTIPLIER_DEN,
    FEE_BASE_MULTIPLIER_NUM, MAX_EMIT, MAX_NONCE, SF_EMIT_BURDEN, SF_EMIT_CALLBACK,
    SF_EMIT_DETAILS, SF_EMIT_GENERATION, SF_EMIT_NONCE, SF_EMIT_PARENT_TXN_ID, SF_FEE,
    SF_FIRST_LEDGER_SEQUENCE, SF_LAST_LEDGER_SEQUENCE, SF_SEQUENCE, SF_SIGNING_PUB_KEY,
    SF_TXN_SIGNATURE,
};

use crate::context::HookContext;
use crate::ledger::Hash256;
use crate::{sto, util};

/// Per-invocation emission bookkeeping.
#[derive(Debug)]
pub(crate) struct EmissionState {
    /// -1 until `etxn_reserve` runs.
    pub expected_count: i64,
    pub nonce_counter: u32,
    pub nonces: BTreeSet<Hash256>,
    /// Cached `base fee x burden`, zero until first computed.
    pub fee_base: u64,
    /// Cached burden of the originating transaction, zero until parsed.
    pub burden: u64,
    /// Cached generation of the originating transaction, zero until
    /// parsed.
    pub generation: u32,
}

impl EmissionState {
    pub fn new() -> Self {
        EmissionState {
            expected_count: -1,
            nonce_counter: 0,
            nonces: BTreeSet::new(),
            fee_base: 0,
            burden: 0,
            generation: 0,
        }
    }
}

macro_rules! emit_fail {
    ($($why:tt)*) => {{
        tracing::trace!(target: "hook", $($why)*);
        return Err(ReturnCode::EmissionFailure);
    }};
}

impl HookContext<'_> {
    /// Burden of the originating transaction: its `EmitBurden` with the
    /// top bit wiped, or 1 when it was not itself emitted.
    pub(crate) fn otxn_burden(&mut self) -> i64 {
        if self.emission.burden != 0 {
            return self.emission.burden as i64;
        }
        let Ok(details) = sto::subfield(&self.otxn, SF_EMIT_DETAILS) else {
            return 1;
        };
        let region = &self.otxn[details.payload_start..details.payload_end()];
        let Ok(bounds) = sto::subfield(region, SF_EMIT_BURDEN) else {
            tracing::warn!(target: "hook", "EmitDetails present but EmitBurden missing");
            return 1;
        };
        let burden = sto::uint_payload(region, &bounds) & !(1 << 63);
        self.emission.burden = burden;
        burden as i64
    }

    /// Generation of the chain this transaction sits in: `EmitGeneration`
    /// plus one, or 1 when the originator was not emitted.
    pub(crate) fn otxn_generation(&mut self) -> i64 {
        if self.emission.generation != 0 {
            return self.emission.generation as i64;
        }
        let Ok(details) = sto::subfield(&self.otxn, SF_EMIT_DETAILS) else {
            return 1;
        };
        let region = &self.otxn[details.payload_start..details.payload_end()];
        let Ok(bounds) = sto::subfield(region, SF_EMIT_GENERATION) else {
            tracing::warn!(target: "hook", "EmitDetails present but EmitGeneration missing");
            return 1;
        };
        let generation = (sto::uint_payload(region, &bounds) as u32).saturating_add(1);
        self.emission.generation = generation;
        generation as i64
    }

    pub(crate) fn etxn_generation(&mut self) -> i64 {
        self.otxn_generation() + 1
    }

    /// Burden carried by a transaction emitted from this invocation.
    pub(crate) fn etxn_burden(&mut self) -> Result<u64, ReturnCode> {
        if self.emission.expected_count < 0 {
            return Err(ReturnCode::PrerequisiteNotMet);
        }
        let last = self.otxn_burden() as u64;
        last.checked_mul(self.emission.expected_count as u64)
            .ok_or(ReturnCode::FeeTooLarge)
    }

    /// Declare how many transactions this invocation will emit. Callable
    /// exactly once.
    pub(crate) fn etxn_reserve(&mut self, count: u32) -> Result<i64, ReturnCode> {
        if self.emission.expected_count > -1 {
            return Err(ReturnCode::AlreadySet);
        }
        if count > MAX_EMIT {
            return Err(ReturnCode::TooBig);
        }
        self.emission.expected_count = count as i64;
        Ok(count as i64)
    }

    /// The ledger base fee with the emission markup applied.
    pub(crate) fn fee_base(&self) -> u64 {
        self.view.base_fee() * FEE_BASE_MULTIPLIER_NUM / FEE_BASE_MULTIPLIER_DEN
    }

    /// Minimum fee for an emitted transaction of `byte_count` bytes.
    pub(crate) fn etxn_fee_base(&mut self, byte_count: u32) -> Result<u64, ReturnCode> {
        if self.emission.expected_count < 0 {
            return Err(ReturnCode::PrerequisiteNotMet);
        }
        let burden = self.etxn_burden()?;
        if burden < 1 {
            return Err(ReturnCode::FeeTooLarge);
        }
        let fee = self
            .fee_base()
            .checked_mul(burden)
            .ok_or(ReturnCode::FeeTooLarge)?;
        if fee & (3 << 62) != 0 {
            return Err(ReturnCode::FeeTooLarge);
        }
        self.emission.fee_base = fee;

        fee.checked_mul(DROPS_PER_BYTE)
            .and_then(|f| f.checked_mul(byte_count as u64))
            .ok_or(ReturnCode::FeeTooLarge)
    }

    /// Issue a deterministic nonce and remember it for emission
    /// validation.
    pub(crate) fn new_nonce(&mut self) -> Result<Hash256, ReturnCode> {
        if self.emission.nonce_counter > MAX_NONCE {
            return Err(ReturnCode::TooManyNonces);
        }
        let counter = self.emission.nonce_counter.to_be_bytes();
        let nonce = util::sha512h(&[
            util::NONCE_PREFIX,
            &self.result.otxn_id.0,
            &counter,
            &self.result.account.0,
        ]);
        self.emission.nonce_counter += 1;
        self.emission.nonces.insert(nonce);
        Ok(nonce)
    }

    /// A fully-formed `EmitDetails` object carrying the values `emit`
    /// validates against.
    pub(crate) fn emit_details(&mut self) -> Result<[u8; EMIT_DETAILS_SIZE], ReturnCode> {
        if self.emission.expected_count < 0 {
            return Err(ReturnCode::PrerequisiteNotMet);
        }
        let generation = self.etxn_generation() as u32;
        let burden = self.etxn_burden()?;
        if burden < 1 {
            return Err(ReturnCode::FeeTooLarge);
        }
        let nonce = self.new_nonce()?;

        let mut out = [0u8; EMIT_DETAILS_SIZE];
        out[0] = 0xEC; // begin EmitDetails
        out[1] = 0x20; // EmitGeneration
        out[2] = 0x2B;
        out[3..7].copy_from_slice(&generation.to_be_bytes());
        out[7] = 0x3C; // EmitBurden
        out[8..16].copy_from_slice(&burden.to_be_bytes());
        out[16] = 0x5A; // EmitParentTxnID
        out[17..49].copy_from_slice(&self.result.otxn_id.0);
        out[49] = 0x5B; // EmitNonce
        out[50..82].copy_from_slice(&nonce.0);
        out[82] = 0x89; // EmitCallback
        out[83] = 0x14;
        out[84..104].copy_from_slice(&self.result.account.0);
        out[104] = 0xE1; // end object
        Ok(out)
    }

    /// Validate a candidate child transaction and append it to the
    /// emission queue. Returns the bytes accepted.
    pub(crate) fn emit(&mut self, blob: &[u8]) -> Result<i64, ReturnCode> {
        if self.emission.expected_count < 0 {
            return Err(ReturnCode::PrerequisiteNotMet);
        }
        if self.result.emitted.len() as i64 >= self.emission.expected_count {
            return Err(ReturnCode::TooManyEmittedTxn);
        }

        if !sto::validate(blob) {
            emit_fail!("emitted txn does not parse");
        }

        // rule 1: Sequence present and zero
        match sto::subfield(blob, SF_SEQUENCE) {
            Ok(b) if sto::uint_payload(blob, &b) == 0 => {}
            _ => emit_fail!("Sequence missing or non-zero"),
        }

        // rule 2: SigningPubKey present, empty or 33 zero bytes
        match sto::subfield(blob, SF_SIGNING_PUB_KEY) {
            Ok(b) => {
                let key = &blob[b.payload_start..b.payload_end()];
                if !key.is_empty() && key.len() != 33 {
                    emit_fail!("SigningPubKey present but wrong size, expecting 33 bytes");
                }
                if key.iter().any(|&byte| byte != 0) {
                    emit_fail!("SigningPubKey present but non-zero");
                }
            }
            _ => emit_fail!("SigningPubKey missing"),
        }

        // rule 3: EmitDetails present with matching values
        let Ok(details) = sto::subfield(blob, SF_EMIT_DETAILS) else {
            emit_fail!("EmitDetails missing");
        };
        let region = blob[details.payload_start..details.payload_end()].to_vec();

        let generation = match sto::subfield(&region, SF_EMIT_GENERATION) {
            Ok(b) => sto::uint_payload(&region, &b) as u32,
            _ => emit_fail!("EmitDetails malformed"),
        };
        let burden = match sto::subfield(&region, SF_EMIT_BURDEN) {
            Ok(b) => sto::uint_payload(&region, &b),
            _ => emit_fail!("EmitDetails malformed"),
        };
        let parent = match sto::subfield(&region, SF_EMIT_PARENT_TXN_ID) {
            Ok(b) => Hash256::from_slice(&region[b.payload_start..b.payload_end()]),
            _ => emit_fail!("EmitDetails malformed"),
        };
        let nonce = match sto::subfield(&region, SF_EMIT_NONCE) {
            Ok(b) => Hash256::from_slice(&region[b.payload_start..b.payload_end()]),
            _ => emit_fail!("EmitDetails malformed"),
        };
        let callback = match sto::subfield(&region, SF_EMIT_CALLBACK) {
            Ok(b) => &region[b.payload_start..b.payload_end()],
            _ => emit_fail!("EmitDetails malformed"),
        };

        if generation != self.etxn_generation() as u32 {
            emit_fail!(generation, "EmitGeneration is not correct");
        }
        if burden != self.etxn_burden()? {
            emit_fail!(burden, "EmitBurden is not correct");
        }
        if parent != Some(self.result.otxn_id) {
            emit_fail!("EmitParentTxnID is not correct");
        }
        match nonce {
            Some(n) if self.emission.nonces.contains(&n) => {}
            _ => emit_fail!("EmitNonce was not generated by the nonce api"),
        }
        if callback != self.result.account.0 {
            emit_fail!("EmitCallback must be the account of the emitting hook");
        }

        // rule 4: no signature
        if sto::subfield(blob, SF_TXN_SIGNATURE).is_ok() {
            emit_fail!("Signature is present but should not be");
        }

        // rule 5: LastLedgerSequence present and after the current ledger
        let lls = match sto::subfield(blob, SF_LAST_LEDGER_SEQUENCE) {
            Ok(b) => sto::uint_payload(blob, &b) as u32,
            _ => emit_fail!("LastLedgerSequence missing"),
        };
        if lls < self.view.seq() + 1 {
            emit_fail!(lls, "LastLedgerSequence invalid");
        }

        // rule 6: FirstLedgerSequence present and not after the last
        match sto::subfield(blob, SF_FIRST_LEDGER_SEQUENCE) {
            Ok(b) if sto::uint_payload(blob, &b) as u32 <= lls => {}
            _ => emit_fail!("FirstLedgerSequence must be present and <= LastLedgerSequence"),
        }

        // rule 7: fee at least the computed minimum
        let min_fee = self.etxn_fee_base(blob.len() as u32)? as i64;
        if min_fee < 0 {
            emit_fail!("fee could not be calculated");
        }
        let fee = match sto::subfield(blob, SF_FEE) {
            Ok(b) if b.payload_len == 8 => {
                let word = u64::from_be_bytes(
                    blob[b.payload_start..b.payload_end()]
                        .try_into()
                        .expect("8-byte amount"),
                );
                // fee must be a non-negative native amount
                if word >> 62 != 1 {
                    emit_fail!("Fee is not a native amount");
                }
                (word & ((1 << 62) - 1)) as i64
            }
            Ok(_) => emit_fail!("Fee is not a native amount"),
            _ => emit_fail!("Fee missing from emitted tx"),
        };
        if fee < min_fee {
            emit_fail!(fee, min_fee, "Fee on emitted txn is less than the minimum required fee");
        }

        let id = util::txn_id(blob);
        tracing::trace!(target: "hook", ?id, "emit accepted");
        self.result.emitted.push_back((id, blob.to_vec()));
        Ok(blob.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HookContext, HookParams};
    use crate::ledger::{AccountId, MemoryLedger};
    use hookvm_abi::field_id;

    const ACCOUNT: AccountId = AccountId([0x11; 20]);

    fn params() -> HookParams {
        HookParams {
            hook_set_txn_id: Hash256::ZERO,
            hook_hash: Hash256([0xAB; 32]),
            account: ACCOUNT,
        }
    }

    fn ledger() -> MemoryLedger {
        let mut ledger = MemoryLedger::new();
        ledger.install_hook(ACCOUNT, 128);
        ledger
    }

    fn payment() -> Vec<u8> {
        let mut txn = vec![0x24, 0, 0, 0, 1];
        txn.push(0x81);
        txn.push(20);
        txn.extend_from_slice(&ACCOUNT.0);
        txn
    }

    /// A candidate child transaction passing all seven rules when `fee` is
    /// sufficient. Always 133 bytes.
    fn candidate(ctx: &mut HookContext, fee: u64) -> Vec<u8> {
        let mut txn = vec![0x24, 0, 0, 0, 0]; // Sequence 0
        txn.extend_from_slice(&[0x20, 0x1A, 0, 0, 0, 1]); // FirstLedgerSequence
        txn.extend_from_slice(&[0x20, 0x1B, 0, 0, 1, 0]); // LastLedgerSequence
        txn.push(0x68); // Fee, native
        txn.extend_from_slice(&((1u64 << 62) | fee).to_be_bytes());
        txn.extend_from_slice(&[0x73, 0x00]); // empty SigningPubKey
        txn.extend_from_slice(&ctx.emit_details().unwrap());
        assert_eq!(txn.len(), 133);
        txn
    }

    // default base fee 10, marked up to 11; burden 1
    fn min_fee(byte_count: u64) -> u64 {
        11 * DROPS_PER_BYTE * byte_count
    }

    #[test]
    fn emit_respects_the_reservation() {
        let mut ledger = ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        let txn = {
            // no reservation yet
            assert_eq!(ctx.emit(&[0x24, 0, 0, 0, 0]), Err(ReturnCode::PrerequisiteNotMet));
            ctx.etxn_reserve(1).unwrap();
            candidate(&mut ctx, min_fee(133))
        };

        assert_eq!(ctx.emit(&txn), Ok(133));
        assert_eq!(ctx.result.emitted.len(), 1);

        // the reservation is exhausted
        assert_eq!(ctx.emit(&txn), Err(ReturnCode::TooManyEmittedTxn));
    }

    #[test]
    fn reserve_is_single_shot() {
        let mut ledger = ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        assert_eq!(ctx.etxn_reserve(MAX_EMIT + 1), Err(ReturnCode::TooBig));
        assert_eq!(ctx.etxn_reserve(2), Ok(2));
        assert_eq!(ctx.etxn_reserve(1), Err(ReturnCode::AlreadySet));
    }

    #[test]
    fn underpaid_fee_is_rejected() {
        let mut ledger = ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());
        ctx.etxn_reserve(1).unwrap();

        let txn = candidate(&mut ctx, min_fee(133) - 1);
        assert_eq!(ctx.emit(&txn), Err(ReturnCode::EmissionFailure));
        assert!(ctx.result.emitted.is_empty());
    }

    #[test]
    fn rule_violations_are_rejected() {
        let mut ledger = ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());
        ctx.etxn_reserve(1).unwrap();
        let good = candidate(&mut ctx, min_fee(133));

        // rule 1: non-zero sequence
        let mut txn = good.clone();
        txn[4] = 1;
        assert_eq!(ctx.emit(&txn), Err(ReturnCode::EmissionFailure));

        // rule 4: signature present (134 bytes, so a higher fee)
        let sig = [0x74, 0x00];
        let with_sig = sto::emplace(&good, &sig, SF_TXN_SIGNATURE).unwrap();
        assert_eq!(ctx.emit(&with_sig), Err(ReturnCode::EmissionFailure));

        // rule 5: LastLedgerSequence at the current ledger
        let mut txn = good.clone();
        txn[13..17].copy_from_slice(&5u32.to_be_bytes());
        assert_eq!(ctx.emit(&txn), Err(ReturnCode::EmissionFailure));

        // rule 3: nonce not issued by the nonce api
        let mut txn = good.clone();
        txn[78] ^= 0xFF;
        assert_eq!(ctx.emit(&txn), Err(ReturnCode::EmissionFailure));

        // the untampered candidate still passes
        assert_eq!(ctx.emit(&good), Ok(133));
    }

    #[test]
    fn nonces_are_limited_and_remembered() {
        let mut ledger = ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        let first = ctx.new_nonce().unwrap();
        assert!(ctx.emission.nonces.contains(&first));

        for _ in 1..=MAX_NONCE {
            ctx.new_nonce().unwrap();
        }
        assert_eq!(ctx.new_nonce(), Err(ReturnCode::TooManyNonces));
    }

    #[test]
    fn details_layout_is_canonical() {
        let mut ledger = ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());
        ctx.etxn_reserve(1).unwrap();

        let details = ctx.emit_details().unwrap();
        assert_eq!(details[0], 0xEC);
        assert_eq!(details[104], 0xE1);
        assert!(sto::validate(&details));

        let bounds = sto::subfield(&details, SF_EMIT_DETAILS).unwrap();
        assert_eq!(bounds.len(), EMIT_DETAILS_SIZE);

        let region = &details[bounds.payload_start..bounds.payload_end()];
        let gen = sto::subfield(region, SF_EMIT_GENERATION).unwrap();
        assert_eq!(sto::uint_payload(region, &gen), 2);
        let burden = sto::subfield(region, SF_EMIT_BURDEN).unwrap();
        assert_eq!(sto::uint_payload(region, &burden), 1);
        let callback = sto::subfield(region, SF_EMIT_CALLBACK).unwrap();
        assert_eq!(&region[callback.payload_start..callback.payload_end()], &ACCOUNT.0);
    }

    #[test]
    fn burden_and_generation_follow_the_parent() {
        // an originating transaction that was itself emitted
        let mut details = vec![0xEC, 0x20, 0x2B];
        details.extend_from_slice(&3u32.to_be_bytes());
        details.push(0x3C);
        details.extend_from_slice(&4u64.to_be_bytes());
        details.push(0x5A);
        details.extend_from_slice(&[0; 32]);
        details.push(0x5B);
        details.extend_from_slice(&[0; 32]);
        details.extend_from_slice(&[0x89, 0x14]);
        details.extend_from_slice(&[0x22; 20]);
        details.push(0xE1);
        let otxn = sto::emplace(&payment(), &details, SF_EMIT_DETAILS).unwrap();

        let mut ledger = ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), otxn);
        assert!(ctx.result.otxn_is_emitted);

        assert_eq!(ctx.otxn_burden(), 4);
        assert_eq!(ctx.otxn_generation(), 4); // parsed 3, stepped once
        assert_eq!(ctx.etxn_generation(), 5);

        ctx.etxn_reserve(2).unwrap();
        assert_eq!(ctx.etxn_burden(), Ok(8));
    }

    #[test]
    fn non_emitted_parent_defaults() {
        let mut ledger = ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        assert_eq!(ctx.otxn_burden(), 1);
        assert_eq!(ctx.otxn_generation(), 1);
        assert_eq!(ctx.etxn_generation(), 2);
        assert_eq!(ctx.etxn_burden(), Err(ReturnCode::PrerequisiteNotMet));
    }

    #[test]
    fn fee_base_scales_with_size_and_burden() {
        let mut ledger = ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        assert_eq!(ctx.fee_base(), 11);
        assert_eq!(ctx.etxn_fee_base(10), Err(ReturnCode::PrerequisiteNotMet));

        ctx.etxn_reserve(3).unwrap();
        assert_eq!(ctx.etxn_fee_base(10), Ok(11 * 3 * DROPS_PER_BYTE * 10));
        assert_eq!(ctx.emission.fee_base, 33);
    }

    #[test]
    fn details_tag_bytes_match_field_ids() {
        // EmitGeneration's tag bytes 0x20 0x2B decode to its field id
        assert_eq!(field_id(2, 0x2B), SF_EMIT_GENERATION);
    }
}
