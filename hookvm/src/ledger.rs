// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The ledger capability surface the runtime executes against, and an
//! in-memory implementation for tests and embedders.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use hookvm_abi::ExitType;

use crate::keylet::Keylet;

/// A 20-byte ledger account identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub [u8; 20]);

/// A 256-bit identifying hash: transaction ids, hook hashes, state keys
/// and nonces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash256(pub [u8; 32]);

impl AccountId {
    pub const ZERO: AccountId = AccountId([0; 20]);

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 20]>::try_from(bytes).ok().map(AccountId)
    }
}

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Hash256)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Failures surfaced by a [`LedgerView`] or by commit-time state policy.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("directory is full")]
    DirectoryFull,
    #[error("account balance below the reserve for the new owner count")]
    InsufficientReserve,
    #[error("state value exceeds the configured maximum")]
    DataTooLarge,
    #[error("no hook object for the account")]
    NoHook,
    #[error("ledger corruption detected")]
    BadLedger,
}

/// One execution-metadata record, appended per hook invocation.
#[derive(Debug, Clone)]
pub struct HookExecution {
    pub result: ExitType,
    pub hook_hash: Hash256,
    pub account: AccountId,
    /// Signed exit code re-encoded: negative values carry the magnitude
    /// with the high bit set.
    pub return_code: u64,
    pub return_string: Vec<u8>,
    pub instruction_count: u64,
    pub emit_count: u16,
    pub execution_index: u16,
    pub state_change_count: u16,
}

/// What the runtime needs from the ledger.
///
/// The invoker owns the view exclusively for the duration of an
/// invocation; the runtime only mutates it during commit.
pub trait LedgerView: Send {
    /// Sequence number of the in-progress ledger.
    fn seq(&self) -> u32;

    /// Base transaction fee in drops, before the emission markup.
    fn base_fee(&self) -> u64;

    /// Serialized ledger entry under a keylet, if present.
    fn peek(&self, keylet: &Keylet) -> Option<Vec<u8>>;

    /// Serialized transaction by id, if known.
    fn txn(&self, id: &Hash256) -> Option<Vec<u8>>;

    /// Value of a hook state entry.
    fn hook_state(&self, account: &AccountId, key: &Hash256) -> Option<Vec<u8>>;

    /// Create or overwrite a hook state entry.
    fn hook_state_insert(
        &mut self,
        account: &AccountId,
        key: &Hash256,
        value: Vec<u8>,
    ) -> Result<(), LedgerError>;

    /// Drop a hook state entry.
    fn hook_state_remove(&mut self, account: &AccountId, key: &Hash256) -> Result<(), LedgerError>;

    /// Number of state entries the account currently owns.
    fn hook_state_count(&self, account: &AccountId) -> u32;

    /// Per-hook configured maximum state value size; `None` when the
    /// account has no hook installed.
    fn hook_state_data_max(&self, account: &AccountId) -> Option<u32>;

    fn owner_count(&self, account: &AccountId) -> u32;

    fn adjust_owner_count(&mut self, account: &AccountId, delta: i32);

    /// Spendable balance in drops.
    fn balance(&self, account: &AccountId) -> u64;

    /// Reserve requirement for an owner count.
    fn reserve(&self, owner_count: u32) -> u64;

    /// Insert an emitted transaction into the emission directory.
    fn emitted_insert(&mut self, id: Hash256, txn: Vec<u8>) -> Result<(), LedgerError>;

    fn emitted_contains(&self, id: &Hash256) -> bool;

    /// Remove an emission-directory entry; false when absent.
    fn emitted_remove(&mut self, id: &Hash256) -> bool;

    /// Index assigned to the next hook execution this apply.
    fn next_execution_index(&mut self) -> u16;

    /// Append an execution-metadata record.
    fn record_execution(&mut self, execution: HookExecution);
}

const BASE_RESERVE_DROPS: u64 = 10_000_000;
const OWNER_RESERVE_DROPS: u64 = 2_000_000;

/// An in-memory [`LedgerView`]: everything a test or an embedder needs,
/// nothing persisted.
pub struct MemoryLedger {
    seq: u32,
    base_fee: u64,
    entries: BTreeMap<Keylet, Vec<u8>>,
    txns: BTreeMap<Hash256, Vec<u8>>,
    states: BTreeMap<(AccountId, Hash256), Vec<u8>>,
    hooks: BTreeMap<AccountId, u32>,
    owner_counts: BTreeMap<AccountId, u32>,
    balances: BTreeMap<AccountId, u64>,
    emitted: BTreeMap<Hash256, Vec<u8>>,
    emitted_capacity: usize,
    execution_index: u16,
    executions: Vec<HookExecution>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        MemoryLedger {
            seq: 5,
            base_fee: 10,
            entries: BTreeMap::new(),
            txns: BTreeMap::new(),
            states: BTreeMap::new(),
            hooks: BTreeMap::new(),
            owner_counts: BTreeMap::new(),
            balances: BTreeMap::new(),
            emitted: BTreeMap::new(),
            emitted_capacity: usize::MAX,
            execution_index: 0,
            executions: Vec::new(),
        }
    }

    pub fn set_seq(&mut self, seq: u32) {
        self.seq = seq;
    }

    pub fn set_base_fee(&mut self, drops: u64) {
        self.base_fee = drops;
    }

    /// Install a hook object on `account` with the given state-value cap.
    pub fn install_hook(&mut self, account: AccountId, state_data_max: u32) {
        self.hooks.insert(account, state_data_max);
    }

    pub fn fund(&mut self, account: AccountId, drops: u64) {
        self.balances.insert(account, drops);
    }

    pub fn put_entry(&mut self, keylet: Keylet, blob: Vec<u8>) {
        self.entries.insert(keylet, blob);
    }

    pub fn put_txn(&mut self, id: Hash256, blob: Vec<u8>) {
        self.txns.insert(id, blob);
    }

    /// Cap the emission directory, for exercising the directory-full path.
    pub fn set_emitted_capacity(&mut self, capacity: usize) {
        self.emitted_capacity = capacity;
    }

    pub fn emitted(&self) -> impl Iterator<Item = (&Hash256, &Vec<u8>)> {
        self.emitted.iter()
    }

    pub fn executions(&self) -> &[HookExecution] {
        &self.executions
    }
}

impl LedgerView for MemoryLedger {
    fn seq(&self) -> u32 {
        self.seq
    }

    fn base_fee(&self) -> u64 {
        self.base_fee
    }

    fn peek(&self, keylet: &Keylet) -> Option<Vec<u8>> {
        self.entries.get(keylet).cloned()
    }

    fn txn(&self, id: &Hash256) -> Option<Vec<u8>> {
        self.txns.get(id).cloned()
    }

    fn hook_state(&self, account: &AccountId, key: &Hash256) -> Option<Vec<u8>> {
        self.states.get(&(*account, *key)).cloned()
    }

    fn hook_state_insert(
        &mut self,
        account: &AccountId,
        key: &Hash256,
        value: Vec<u8>,
    ) -> Result<(), LedgerError> {
        self.states.insert((*account, *key), value);
        Ok(())
    }

    fn hook_state_remove(&mut self, account: &AccountId, key: &Hash256) -> Result<(), LedgerError> {
        self.states.remove(&(*account, *key));
        Ok(())
    }

    fn hook_state_count(&self, account: &AccountId) -> u32 {
        self.states.range((*account, Hash256::ZERO)..).take_while(|((a, _), _)| a == account).count()
            as u32
    }

    fn hook_state_data_max(&self, account: &AccountId) -> Option<u32> {
        self.hooks.get(account).copied()
    }

    fn owner_count(&self, account: &AccountId) -> u32 {
        self.owner_counts.get(account).copied().unwrap_or(0)
    }

    fn adjust_owner_count(&mut self, account: &AccountId, delta: i32) {
        let count = self.owner_counts.entry(*account).or_insert(0);
        *count = count.saturating_add_signed(delta);
    }

    fn balance(&self, account: &AccountId) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn reserve(&self, owner_count: u32) -> u64 {
        BASE_RESERVE_DROPS + owner_count as u64 * OWNER_RESERVE_DROPS
    }

    fn emitted_insert(&mut self, id: Hash256, txn: Vec<u8>) -> Result<(), LedgerError> {
        if self.emitted.len() >= self.emitted_capacity {
            return Err(LedgerError::DirectoryFull);
        }
        self.emitted.insert(id, txn);
        Ok(())
    }

    fn emitted_contains(&self, id: &Hash256) -> bool {
        self.emitted.contains_key(id)
    }

    fn emitted_remove(&mut self, id: &Hash256) -> bool {
        self.emitted.remove(id).is_some()
    }

    fn next_execution_index(&mut self) -> u16 {
        let index = self.execution_index;
        self.execution_index += 1;
        index
    }

    fn record_execution(&mut self, execution: HookExecution) {
        self.executions.push(execution);
    }
}
