// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The slot subsystem: integer handles over loaded ledger objects and
//! transactions, with cursors descending into their fields.
//!
//! A cursor never stores a pointer into the object. It records the owning
//! bytes (shared `Arc`) plus the path of field codes and array indices
//! that led to it, and re-walks the path on each access. A sub-field slot
//! therefore shares its parent's owning allocation and stays valid for as
//! long as any holder keeps the slot alive.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use hookvm_abi::{ReturnCode, MAX_SLOTS, ST_AMOUNT, ST_ARRAY, ST_OBJECT};

use crate::context::HookContext;
use crate::float;
use crate::keylet::Keylet;
use crate::ledger::Hash256;
use crate::sto::{self, FieldBounds};

/// One step of a cursor path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Field(u32),
    Index(u32),
}

/// A held reference to a serialized object, or to a sub-field of one.
#[derive(Debug, Clone)]
pub(crate) struct SlotEntry {
    /// The 32/34-byte identifier the object was loaded by.
    pub id: Vec<u8>,
    pub obj: Arc<Vec<u8>>,
    pub path: Vec<Step>,
}

impl SlotEntry {
    /// Re-walk the cursor path. `None` bounds denote the object root.
    fn resolve(&self) -> Result<Option<FieldBounds>, ReturnCode> {
        let buf = self.obj.as_slice();
        let mut current: Option<FieldBounds> = None;

        for step in &self.path {
            let (start, end, ty) = match &current {
                // the root is a bare field sequence, walked like an
                // object body
                None => (0, buf.len(), ST_OBJECT),
                Some(b) => (b.payload_start, b.payload_end(), b.type_code()),
            };
            let region = &buf[start..end];

            let relative = match step {
                Step::Field(field_id) => {
                    if ty != ST_OBJECT {
                        return Err(ReturnCode::NotAnObject);
                    }
                    sto::subfield(region, *field_id)?
                }
                Step::Index(index) => {
                    if ty != ST_ARRAY {
                        return Err(ReturnCode::NotAnArray);
                    }
                    nth_field(region, *index)?
                }
            };

            current = Some(FieldBounds {
                start: relative.start + start,
                payload_start: relative.payload_start + start,
                end: relative.end + start,
                ..relative
            });
        }
        Ok(current)
    }

    /// The byte range `slot`/`slot_size` expose: the whole object at the
    /// root, the field view otherwise.
    fn view_range(&self, bounds: &Option<FieldBounds>) -> std::ops::Range<usize> {
        match bounds {
            None => 0..self.obj.len(),
            Some(b) => sto::view_range(b),
        }
    }
}

fn nth_field(region: &[u8], index: u32) -> Result<FieldBounds, ReturnCode> {
    for (i, bounds) in sto::fields(region).enumerate() {
        let bounds = bounds?;
        if i as u32 == index {
            return Ok(bounds);
        }
    }
    Err(ReturnCode::DoesntExist)
}

/// Slot handles `1..=MAX_SLOTS` with a FIFO free queue behind a
/// monotonically increasing counter.
pub(crate) struct SlotTable {
    entries: BTreeMap<u32, SlotEntry>,
    free: VecDeque<u32>,
    counter: u32,
}

impl SlotTable {
    pub fn new() -> Self {
        SlotTable {
            entries: BTreeMap::new(),
            free: VecDeque::new(),
            counter: 1,
        }
    }

    pub fn no_free_slots(&self) -> bool {
        self.counter > MAX_SLOTS && self.free.is_empty()
    }

    fn alloc(&mut self) -> u32 {
        if let Some(slot) = self.free.pop_front() {
            return slot;
        }
        let slot = self.counter;
        self.counter += 1;
        slot
    }

    fn get(&self, slot: u32) -> Result<&SlotEntry, ReturnCode> {
        self.entries.get(&slot).ok_or(ReturnCode::DoesntExist)
    }
}

impl HookContext<'_> {
    /// Load a ledger object (34-byte keylet) or a transaction (32-byte id)
    /// into `into`, or into a fresh slot when `into` is zero.
    pub(crate) fn slot_set(&mut self, id: &[u8], into: i32) -> Result<i64, ReturnCode> {
        if (id.len() != 32 && id.len() != 34) || into < 0 || into as u32 > MAX_SLOTS {
            return Err(ReturnCode::InvalidArgument);
        }
        if into == 0 && self.slots.no_free_slots() {
            return Err(ReturnCode::NoFreeSlots);
        }

        let blob = if id.len() == 34 {
            let keylet = Keylet::from_bytes(id).ok_or(ReturnCode::DoesntExist)?;
            self.view.peek(&keylet).ok_or(ReturnCode::DoesntExist)?
        } else {
            let hash = Hash256::from_slice(id).ok_or(ReturnCode::InvalidArgument)?;
            self.view.txn(&hash).ok_or(ReturnCode::DoesntExist)?
        };

        let slot = if into == 0 { self.slots.alloc() } else { into as u32 };
        self.slots.entries.insert(
            slot,
            SlotEntry {
                id: id.to_vec(),
                obj: Arc::new(blob),
                path: Vec::new(),
            },
        );
        Ok(slot as i64)
    }

    /// Place the originating transaction into a slot.
    pub(crate) fn otxn_slot(&mut self, into: u32) -> Result<i64, ReturnCode> {
        if into > MAX_SLOTS {
            return Err(ReturnCode::InvalidArgument);
        }
        if into == 0 && self.slots.no_free_slots() {
            return Err(ReturnCode::NoFreeSlots);
        }

        let slot = if into == 0 { self.slots.alloc() } else { into };
        self.slots.entries.insert(
            slot,
            SlotEntry {
                id: self.result.otxn_id.0.to_vec(),
                obj: Arc::clone(&self.otxn),
                path: Vec::new(),
            },
        );
        Ok(slot as i64)
    }

    /// Serialize the slotted object (or its sub-cursor).
    pub(crate) fn slot_serialized(&self, slot: u32) -> Result<Vec<u8>, ReturnCode> {
        let entry = self.slots.get(slot)?;
        let bounds = entry.resolve()?;
        Ok(entry.obj[entry.view_range(&bounds)].to_vec())
    }

    /// Serialized length of the slotted object, computed from the parse
    /// walk without serializing.
    pub(crate) fn slot_size(&self, slot: u32) -> Result<i64, ReturnCode> {
        let entry = self.slots.get(slot)?;
        let bounds = entry.resolve()?;
        Ok(entry.view_range(&bounds).len() as i64)
    }

    /// The identifier bytes the slot was loaded by.
    pub(crate) fn slot_id(&self, slot: u32) -> Result<&[u8], ReturnCode> {
        Ok(&self.slots.get(slot)?.id)
    }

    /// Drop a slot, returning its number to the free queue.
    pub(crate) fn slot_clear(&mut self, slot: u32) -> Result<i64, ReturnCode> {
        if self.slots.entries.remove(&slot).is_none() {
            return Err(ReturnCode::DoesntExist);
        }
        self.slots.free.push_back(slot);
        Ok(1)
    }

    /// Number of elements of a slotted array.
    pub(crate) fn slot_count(&self, slot: u32) -> Result<i64, ReturnCode> {
        let entry = self.slots.get(slot)?;
        let bounds = entry.resolve()?;
        let bounds = bounds.ok_or(ReturnCode::NotAnArray)?;
        if bounds.type_code() != ST_ARRAY {
            return Err(ReturnCode::NotAnArray);
        }
        let region = &entry.obj[bounds.payload_start..bounds.payload_end()];
        let mut count = 0i64;
        for field in sto::fields(region) {
            field?;
            count += 1;
        }
        Ok(count)
    }

    /// Descend to a named field of the slotted object. The new slot shares
    /// the parent's owning allocation.
    pub(crate) fn slot_subfield(
        &mut self,
        parent: u32,
        field_id: u32,
        new_slot: u32,
    ) -> Result<i64, ReturnCode> {
        if new_slot > MAX_SLOTS {
            return Err(ReturnCode::InvalidArgument);
        }
        if field_id == 0 {
            return Err(ReturnCode::InvalidField);
        }
        let entry = self.slots.get(parent)?;
        if new_slot == 0 && self.slots.no_free_slots() {
            return Err(ReturnCode::NoFreeSlots);
        }

        // type-check the descent before touching the table so a fresh
        // slot never needs rolling back
        let bounds = entry.resolve()?;
        let (start, end, ty) = match &bounds {
            None => (0, entry.obj.len(), ST_OBJECT),
            Some(b) => (b.payload_start, b.payload_end(), b.type_code()),
        };
        if ty != ST_OBJECT {
            return Err(ReturnCode::NotAnObject);
        }
        sto::subfield(&entry.obj[start..end], field_id)?;

        let mut entry = entry.clone();
        entry.path.push(Step::Field(field_id));
        let slot = if new_slot == 0 { self.slots.alloc() } else { new_slot };
        self.slots.entries.insert(slot, entry);
        Ok(slot as i64)
    }

    /// Descend to the `index`-th element of a slotted array.
    pub(crate) fn slot_subarray(
        &mut self,
        parent: u32,
        index: u32,
        new_slot: u32,
    ) -> Result<i64, ReturnCode> {
        if new_slot > MAX_SLOTS {
            return Err(ReturnCode::InvalidArgument);
        }
        let entry = self.slots.get(parent)?;
        if new_slot == 0 && self.slots.no_free_slots() {
            return Err(ReturnCode::NoFreeSlots);
        }

        let bounds = entry.resolve()?;
        let bounds = bounds.ok_or(ReturnCode::NotAnArray)?;
        if bounds.type_code() != ST_ARRAY {
            return Err(ReturnCode::NotAnArray);
        }
        nth_field(&entry.obj[bounds.payload_start..bounds.payload_end()], index)?;

        let mut entry = entry.clone();
        entry.path.push(Step::Index(index));
        let slot = if new_slot == 0 { self.slots.alloc() } else { new_slot };
        self.slots.entries.insert(slot, entry);
        Ok(slot as i64)
    }

    /// With `flags == 0` the cursor's packed field identifier (zero at the
    /// root); with `flags == 1` whether a slotted amount is in native
    /// form: 1 for XRP, 0 for an issued asset.
    pub(crate) fn slot_type(&self, slot: u32, flags: u32) -> Result<i64, ReturnCode> {
        let entry = self.slots.get(slot)?;
        let bounds = entry.resolve()?;
        match flags {
            0 => Ok(bounds.map_or(0, |b| b.field_id as i64)),
            1 => {
                let b = bounds.ok_or(ReturnCode::NotAnAmount)?;
                if b.type_code() != ST_AMOUNT {
                    return Err(ReturnCode::NotAnAmount);
                }
                Ok((b.payload_len == 8) as i64)
            }
            _ => Err(ReturnCode::InvalidArgument),
        }
    }

    /// Convert a slotted amount into the hook float encoding.
    pub(crate) fn slot_float(&self, slot: u32) -> Result<i64, ReturnCode> {
        let entry = self.slots.get(slot)?;
        let bounds = entry.resolve()?;
        let b = bounds.ok_or(ReturnCode::NotAnAmount)?;
        if b.type_code() != ST_AMOUNT {
            return Err(ReturnCode::NotAnAmount);
        }
        let payload = &entry.obj[b.payload_start..b.payload_end()];
        if payload.len() == 8 {
            let word = u64::from_be_bytes(payload.try_into().expect("8-byte native amount"));
            let negative = word >> 62 & 1 == 0;
            let drops = (word & ((1 << 62) - 1)) as i64;
            float::set(-6, if negative { -drops } else { drops })
        } else {
            float::sto_set(&payload[..8])
        }
    }

    /// Serialize the slot id for the trace sink: hex of the first 32
    /// identifier bytes.
    pub(crate) fn slot_id_hex(&self, slot: u32) -> Result<String, ReturnCode> {
        let id = self.slot_id(slot)?;
        let capped = &id[..id.len().min(32)];
        Ok(crate::util::hex_upper(capped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HookContext, HookParams};
    use crate::keylet;
    use crate::ledger::{AccountId, MemoryLedger};
    use hookvm_abi::{SF_ACCOUNT, SF_AMOUNT, SF_SIGNER_ENTRIES, SF_SIGNER_ENTRY, SF_SIGNER_WEIGHT};

    const ACCOUNT: AccountId = AccountId([0x11; 20]);
    const SIGNER_A: [u8; 20] = [0xA1; 20];
    const SIGNER_B: [u8; 20] = [0xB2; 20];

    fn params() -> HookParams {
        HookParams {
            hook_set_txn_id: Hash256::ZERO,
            hook_hash: Hash256([0xAB; 32]),
            account: ACCOUNT,
        }
    }

    fn payment() -> Vec<u8> {
        let mut txn = vec![0x24, 0, 0, 0, 1];
        txn.push(0x81);
        txn.push(20);
        txn.extend_from_slice(&ACCOUNT.0);
        txn
    }

    fn signer_entry(account: &[u8; 20], weight: u16) -> Vec<u8> {
        let mut entry = vec![0xEB]; // SignerEntry
        entry.extend_from_slice(&[0x13, (weight >> 8) as u8, weight as u8]);
        entry.push(0x81);
        entry.push(20);
        entry.extend_from_slice(account);
        entry.push(0xE1);
        entry
    }

    /// A signer-list entry: Flags, then a two-element SignerEntries array.
    fn signer_list() -> Vec<u8> {
        let mut blob = vec![0x22, 0, 0, 0, 0]; // Flags
        blob.push(0xF4);
        blob.extend_from_slice(&signer_entry(&SIGNER_A, 1));
        blob.extend_from_slice(&signer_entry(&SIGNER_B, 2));
        blob.push(0xF1);
        blob
    }

    fn seeded_ledger() -> MemoryLedger {
        let mut ledger = MemoryLedger::new();
        ledger.install_hook(ACCOUNT, 128);
        ledger.put_entry(keylet::signers(&ACCOUNT), signer_list());
        ledger
    }

    #[test]
    fn descends_through_arrays_to_fields() {
        let mut ledger = seeded_ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        let keylet = keylet::signers(&ACCOUNT).to_bytes();
        let root = ctx.slot_set(&keylet, 0).unwrap() as u32;
        assert_eq!(root, 1);
        assert_eq!(ctx.slot_id(root).unwrap(), keylet);

        let entries = ctx.slot_subfield(root, SF_SIGNER_ENTRIES, 0).unwrap() as u32;
        assert_eq!(ctx.slot_count(entries), Ok(2));
        assert_eq!(ctx.slot_type(entries, 0), Ok(SF_SIGNER_ENTRIES as i64));

        let second = ctx.slot_subarray(entries, 1, 0).unwrap() as u32;
        assert_eq!(ctx.slot_type(second, 0), Ok(SF_SIGNER_ENTRY as i64));

        let signer = ctx.slot_subfield(second, SF_ACCOUNT, 0).unwrap() as u32;
        // account cursors serialize without the length prefix
        assert_eq!(ctx.slot_serialized(signer).unwrap(), SIGNER_B);
        assert_eq!(ctx.slot_size(signer), Ok(20));

        let weight = ctx.slot_subfield(second, SF_SIGNER_WEIGHT, 0).unwrap() as u32;
        assert_eq!(ctx.slot_serialized(weight).unwrap(), vec![0, 2]);
    }

    #[test]
    fn descent_type_checks() {
        let mut ledger = seeded_ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        let keylet = keylet::signers(&ACCOUNT).to_bytes();
        let root = ctx.slot_set(&keylet, 0).unwrap() as u32;

        // the root is not an array
        assert_eq!(ctx.slot_count(root), Err(ReturnCode::NotAnArray));
        assert_eq!(ctx.slot_subarray(root, 0, 0), Err(ReturnCode::NotAnArray));

        let entries = ctx.slot_subfield(root, SF_SIGNER_ENTRIES, 0).unwrap() as u32;
        // an array is not an object
        assert_eq!(
            ctx.slot_subfield(entries, SF_ACCOUNT, 0),
            Err(ReturnCode::NotAnObject)
        );
        // beyond the last element
        assert_eq!(ctx.slot_subarray(entries, 2, 0), Err(ReturnCode::DoesntExist));
        // absent field
        assert_eq!(ctx.slot_subfield(root, SF_AMOUNT, 0), Err(ReturnCode::DoesntExist));

        assert_eq!(ctx.slot_set(&[0; 16], 0), Err(ReturnCode::InvalidArgument));
        assert_eq!(ctx.slot_set(&[0; 34], 0), Err(ReturnCode::DoesntExist));
    }

    #[test]
    fn amounts_expose_form_and_float() {
        let mut ledger = MemoryLedger::new();
        ledger.install_hook(ACCOUNT, 128);

        // an entry with a native and an issued amount
        let drops = 7u64 | (1 << 62);
        let mut blob = vec![0x61];
        blob.extend_from_slice(&drops.to_be_bytes());
        let issued = float::set(-2, 314).unwrap();
        let mut wrapped = vec![0x68]; // Fee, issued form
        wrapped.extend_from_slice(&float::sto_bytes(issued, &float::StoForm::Short).unwrap());
        wrapped.extend_from_slice(&[0xCC; 20]);
        wrapped.extend_from_slice(&[0x1D; 20]);
        blob.extend_from_slice(&wrapped);
        ledger.put_entry(keylet::account(&ACCOUNT), blob);

        let mut ctx = HookContext::new(&mut ledger, &params(), payment());
        let keylet = keylet::account(&ACCOUNT).to_bytes();
        let root = ctx.slot_set(&keylet, 0).unwrap() as u32;

        let native = ctx.slot_subfield(root, SF_AMOUNT, 0).unwrap() as u32;
        assert_eq!(ctx.slot_type(native, 1), Ok(1));
        assert_eq!(ctx.slot_float(native), float::set(-6, 7));

        let fee = ctx.slot_subfield(root, hookvm_abi::SF_FEE, 0).unwrap() as u32;
        assert_eq!(ctx.slot_type(fee, 1), Ok(0));
        assert_eq!(ctx.slot_float(fee), Ok(issued));

        // flag 1 on a non-amount
        assert_eq!(ctx.slot_type(root, 1), Err(ReturnCode::NotAnAmount));
        assert_eq!(ctx.slot_float(root), Err(ReturnCode::NotAnAmount));
    }

    #[test]
    fn otxn_slot_holds_the_whole_transaction() {
        let mut ledger = seeded_ledger();
        let txn = payment();
        let mut ctx = HookContext::new(&mut ledger, &params(), txn.clone());

        let slot = ctx.otxn_slot(0).unwrap() as u32;
        assert_eq!(ctx.slot_serialized(slot).unwrap(), txn);
        assert_eq!(ctx.slot_id(slot).unwrap(), ctx.result.otxn_id.0);
    }

    #[test]
    fn cleared_slots_are_reused_fifo() {
        let mut ledger = seeded_ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        let first = ctx.otxn_slot(0).unwrap() as u32;
        let second = ctx.otxn_slot(0).unwrap() as u32;
        assert_eq!((first, second), (1, 2));

        ctx.slot_clear(first).unwrap();
        assert_eq!(ctx.slot_clear(first), Err(ReturnCode::DoesntExist));

        // the freed number is handed out before the counter moves on
        assert_eq!(ctx.otxn_slot(0).unwrap() as u32, first);
        assert_eq!(ctx.otxn_slot(0).unwrap() as u32, 3);
    }

    #[test]
    fn the_slot_space_is_bounded() {
        let mut ledger = seeded_ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        for _ in 0..MAX_SLOTS {
            ctx.otxn_slot(0).unwrap();
        }
        assert_eq!(ctx.otxn_slot(0), Err(ReturnCode::NoFreeSlots));

        // explicit targets still overwrite
        assert_eq!(ctx.otxn_slot(40), Ok(40));
        // and clearing frees capacity
        ctx.slot_clear(7).unwrap();
        assert_eq!(ctx.otxn_slot(0), Ok(7));
    }

    #[test]
    fn descending_into_the_same_slot_replaces_it() {
        let mut ledger = seeded_ledger();
        let mut ctx = HookContext::new(&mut ledger, &params(), payment());

        let keylet = keylet::signers(&ACCOUNT).to_bytes();
        let root = ctx.slot_set(&keylet, 0).unwrap() as u32;
        let entries = ctx.slot_subfield(root, SF_SIGNER_ENTRIES, root).unwrap() as u32;
        assert_eq!(entries, root);
        assert_eq!(ctx.slot_count(root), Ok(2));
    }
}
