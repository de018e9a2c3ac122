// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The commit step: apply or discard an invocation's staged side effects
//! and record its execution metadata.

use hookvm_abi::STATE_ENTRIES_PER_RESERVE;

use crate::context::HookResult;
use crate::ledger::{AccountId, Hash256, HookExecution, LedgerError, LedgerView};

/// Apply staged state changes and enqueue emitted transactions.
pub const APPLY: u8 = 0b01;

/// Remove the originating transaction's own emission-directory entry.
pub const REMOVE: u8 = 0b10;

/// Owner-reserve units consumed by a number of state entries.
fn state_reserve_units(state_count: u32) -> u32 {
    state_count.div_ceil(STATE_ENTRIES_PER_RESERVE)
}

/// Write one state entry with owner-reserve accounting: growing into a new
/// reserve allotment requires the balance to cover the next owner-count
/// unit; deleting out of one releases it.
pub(crate) fn set_hook_state(
    view: &mut dyn LedgerView,
    account: &AccountId,
    key: &Hash256,
    value: &[u8],
) -> Result<(), LedgerError> {
    let data_max = view.hook_state_data_max(account).ok_or(LedgerError::NoHook)?;
    if value.len() > data_max as usize {
        return Err(LedgerError::DataTooLarge);
    }

    let state_count = view.hook_state_count(account);
    let old_units = state_reserve_units(state_count);
    let exists = view.hook_state(account, key).is_some();

    if value.is_empty() {
        // deleting a non-existent entry is defined as success
        if !exists {
            return Ok(());
        }
        view.hook_state_remove(account, key)?;
        let remaining = state_count.saturating_sub(1);
        if state_reserve_units(remaining) < old_units {
            view.adjust_owner_count(account, -1);
        }
        return Ok(());
    }

    if !exists && state_reserve_units(state_count + 1) > old_units {
        // the account used up its allotment, charge another owner unit
        let owner_count = view.owner_count(account);
        if view.balance(account) < view.reserve(owner_count + 1) {
            return Err(LedgerError::InsufficientReserve);
        }
        view.adjust_owner_count(account, 1);
    }

    view.hook_state_insert(account, key, value.to_vec())
}

/// Atomically apply the deferred side effects of an invocation.
///
/// `mode` is `APPLY`, `REMOVE` or both; zero is invalid and does nothing.
/// A metadata record is appended in every case.
pub fn commit_changes(view: &mut dyn LedgerView, result: &mut HookResult, mode: u8) {
    if mode == 0 {
        tracing::warn!(target: "hook", "commit_changes called with invalid mode (00)");
        return;
    }

    let mut change_count: u16 = 0;
    if mode & APPLY != 0 {
        for (key, (dirty, value)) in std::mem::take(&mut result.changed_state) {
            if !dirty {
                continue;
            }
            change_count += 1;
            if let Err(err) = set_hook_state(view, &result.account, &key, &value) {
                tracing::warn!(target: "hook", ?key, %err, "state write failed at commit");
            }
        }
    }

    let execution_index = view.next_execution_index();

    let mut emit_count: u16 = 0;
    if mode & APPLY != 0 {
        while let Some((id, blob)) = result.emitted.pop_front() {
            tracing::trace!(target: "hook", ?id, "enqueueing emitted txn");
            if view.emitted_contains(&id) {
                continue;
            }
            match view.emitted_insert(id, blob) {
                Ok(()) => emit_count += 1,
                Err(LedgerError::DirectoryFull) => {
                    tracing::warn!(target: "hook", ?id, "emission directory full");
                    break;
                }
                Err(err) => {
                    tracing::warn!(target: "hook", ?id, %err, "emitted txn insert failed");
                    break;
                }
            }
        }
    }

    if mode & REMOVE != 0 && result.otxn_is_emitted {
        if !view.emitted_remove(&result.otxn_id) {
            tracing::warn!(
                target: "hook",
                id = ?result.otxn_id,
                "tried to remove an already removed emitted txn"
            );
        }
    }

    view.record_execution(HookExecution {
        result: result.exit_type,
        hook_hash: result.hook_hash,
        account: result.account,
        return_code: encode_return_code(result.exit_code),
        return_string: result.exit_reason.clone(),
        instruction_count: result.instruction_count,
        emit_count,
        execution_index,
        state_change_count: change_count,
    });
}

/// Re-encode a signed exit code with the high bit as the negative flag, so
/// the metadata field is a plain `u64` on every architecture.
fn encode_return_code(code: i64) -> u64 {
    if code >= 0 {
        code as u64
    } else {
        0x8000_0000_0000_0000u64 + code.unsigned_abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HookContext, HookParams};
    use crate::ledger::MemoryLedger;
    use crate::state::make_state_key;
    use crate::{sto, util};
    use hookvm_abi::{ExitType, SF_EMIT_DETAILS};

    const ACCOUNT: AccountId = AccountId([0x11; 20]);

    fn params() -> HookParams {
        HookParams {
            hook_set_txn_id: Hash256::ZERO,
            hook_hash: Hash256([0xAB; 32]),
            account: ACCOUNT,
        }
    }

    fn funded_ledger() -> MemoryLedger {
        let mut ledger = MemoryLedger::new();
        ledger.install_hook(ACCOUNT, 128);
        ledger.fund(ACCOUNT, 100_000_000);
        ledger
    }

    fn payment() -> Vec<u8> {
        let mut txn = vec![0x24, 0, 0, 0, 1];
        txn.push(0x81);
        txn.push(20);
        txn.extend_from_slice(&ACCOUNT.0);
        txn
    }

    #[test]
    fn return_code_re_encoding() {
        assert_eq!(encode_return_code(0), 0);
        assert_eq!(encode_return_code(20), 20);
        assert_eq!(encode_return_code(-1), 0x8000_0000_0000_0001);
        assert_eq!(encode_return_code(-15), 0x8000_0000_0000_000F);
    }

    #[test]
    fn reserve_units_step_in_fives() {
        assert_eq!(state_reserve_units(0), 0);
        assert_eq!(state_reserve_units(1), 1);
        assert_eq!(state_reserve_units(5), 1);
        assert_eq!(state_reserve_units(6), 2);
    }

    #[test]
    fn dirty_entries_are_flushed_on_apply() {
        let mut ledger = funded_ledger();
        let mut result = {
            let mut ctx = HookContext::new(&mut ledger, &params(), payment());
            ctx.state_write(&[1, 2], b"k").unwrap();
            ctx.result.exit_type = ExitType::Accept;
            ctx.result.exit_code = 20;
            ctx.result
        };

        commit_changes(&mut ledger, &mut result, APPLY);

        let key = make_state_key(b"k").unwrap();
        assert_eq!(ledger.hook_state(&ACCOUNT, &key), Some(vec![1, 2]));
        // the first entry claims an owner-reserve unit
        assert_eq!(ledger.owner_count(&ACCOUNT), 1);

        let execution = &ledger.executions()[0];
        assert_eq!(execution.result, ExitType::Accept);
        assert_eq!(execution.return_code, 20);
        assert_eq!(execution.state_change_count, 1);
        assert_eq!(execution.emit_count, 0);
        assert_eq!(execution.execution_index, 0);
    }

    #[test]
    fn clean_cache_entries_are_not_written() {
        let mut ledger = funded_ledger();
        let key = make_state_key(b"k").unwrap();
        ledger.hook_state_insert(&ACCOUNT, &key, vec![9]).unwrap();

        let mut result = {
            let mut ctx = HookContext::new(&mut ledger, &params(), payment());
            // a read populates the cache clean
            assert_eq!(ctx.state_read(b"k", None), Ok(vec![9]));
            ctx.result
        };

        commit_changes(&mut ledger, &mut result, APPLY);
        assert_eq!(ledger.executions()[0].state_change_count, 0);
        assert_eq!(ledger.hook_state(&ACCOUNT, &key), Some(vec![9]));
    }

    #[test]
    fn insufficient_reserve_skips_the_write() {
        let mut ledger = funded_ledger();
        ledger.fund(ACCOUNT, 1);

        let mut result = {
            let mut ctx = HookContext::new(&mut ledger, &params(), payment());
            ctx.state_write(&[1], b"k").unwrap();
            ctx.result
        };

        commit_changes(&mut ledger, &mut result, APPLY);
        assert_eq!(ledger.hook_state(&ACCOUNT, &make_state_key(b"k").unwrap()), None);
        assert_eq!(ledger.owner_count(&ACCOUNT), 0);
    }

    #[test]
    fn deleting_the_last_entry_releases_the_reserve_unit() {
        let mut ledger = funded_ledger();
        let mut result = {
            let mut ctx = HookContext::new(&mut ledger, &params(), payment());
            ctx.state_write(&[1], b"k").unwrap();
            ctx.result
        };
        commit_changes(&mut ledger, &mut result, APPLY);
        assert_eq!(ledger.owner_count(&ACCOUNT), 1);

        let mut result = {
            let mut ctx = HookContext::new(&mut ledger, &params(), payment());
            ctx.state_write(&[], b"k").unwrap();
            ctx.result
        };
        commit_changes(&mut ledger, &mut result, APPLY);
        assert_eq!(ledger.hook_state(&ACCOUNT, &make_state_key(b"k").unwrap()), None);
        assert_eq!(ledger.owner_count(&ACCOUNT), 0);

        // deleting a non-existent entry is success and changes nothing
        assert_eq!(set_hook_state(&mut ledger, &ACCOUNT, &Hash256([7; 32]), &[]), Ok(()));
    }

    #[test]
    fn directory_full_keeps_prior_insertions() {
        let mut ledger = funded_ledger();
        ledger.set_emitted_capacity(1);

        let mut result = {
            let mut ctx = HookContext::new(&mut ledger, &params(), payment());
            ctx.result.emitted.push_back((Hash256([1; 32]), vec![0x24, 0, 0, 0, 0]));
            ctx.result.emitted.push_back((Hash256([2; 32]), vec![0x24, 0, 0, 0, 0]));
            ctx.result
        };

        commit_changes(&mut ledger, &mut result, APPLY);
        assert!(ledger.emitted_contains(&Hash256([1; 32])));
        assert!(!ledger.emitted_contains(&Hash256([2; 32])));
        assert_eq!(ledger.executions()[0].emit_count, 1);
    }

    #[test]
    fn remove_drops_the_originating_emission_entry() {
        // an originating transaction that was itself emitted
        let mut details = vec![0xEC, 0x20, 0x2B];
        details.extend_from_slice(&2u32.to_be_bytes());
        details.push(0x3C);
        details.extend_from_slice(&1u64.to_be_bytes());
        details.push(0x5A);
        details.extend_from_slice(&[0; 32]);
        details.push(0x5B);
        details.extend_from_slice(&[0; 32]);
        details.extend_from_slice(&[0x89, 0x14]);
        details.extend_from_slice(&ACCOUNT.0);
        details.push(0xE1);
        let otxn = sto::emplace(&payment(), &details, SF_EMIT_DETAILS).unwrap();
        let otxn_id = util::txn_id(&otxn);

        let mut ledger = funded_ledger();
        ledger.emitted_insert(otxn_id, otxn.clone()).unwrap();

        let mut result = HookContext::new(&mut ledger, &params(), otxn).result;
        commit_changes(&mut ledger, &mut result, REMOVE);

        assert!(!ledger.emitted_contains(&otxn_id));
        // rollback metadata still lands
        assert_eq!(ledger.executions()[0].result, ExitType::Rollback);
        assert_eq!(ledger.executions()[0].return_code, 0x8000_0000_0000_0001);
    }

    #[test]
    fn invalid_mode_is_inert() {
        let mut ledger = funded_ledger();
        let mut result = HookContext::new(&mut ledger, &params(), payment()).result;
        commit_changes(&mut ledger, &mut result, 0);
        assert!(ledger.executions().is_empty());
    }
}
