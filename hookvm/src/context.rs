// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-invocation execution context.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use hookvm_abi::{ExitType, ReturnCode, SF_ACCOUNT, SF_EMIT_DETAILS, SF_TRANSACTION_TYPE};

use crate::emit::EmissionState;
use crate::ledger::{AccountId, Hash256, LedgerView};
use crate::slots::SlotTable;
use crate::{sto, util};

/// Identity of the hook being invoked.
#[derive(Debug, Clone)]
pub struct HookParams {
    /// Transaction that installed the hook.
    pub hook_set_txn_id: Hash256,
    /// Content hash of the hook bytecode.
    pub hook_hash: Hash256,
    /// The account the hook is installed on, not necessarily the
    /// originating account.
    pub account: AccountId,
}

/// Everything one hook invocation owns: identity, the working-set tables,
/// staged side effects and the exit state. Created by the invoker, mutated
/// only through host calls, consumed by the commit step.
pub struct HookContext<'a> {
    pub(crate) view: &'a mut dyn LedgerView,
    pub(crate) otxn: Arc<Vec<u8>>,
    pub(crate) slots: SlotTable,
    pub(crate) emission: EmissionState,
    pub(crate) guards: BTreeMap<u32, u32>,
    pub result: HookResult,
}

/// The outcome of an invocation, including its staged side effects.
#[derive(Debug)]
pub struct HookResult {
    pub hook_set_txn_id: Hash256,
    pub hook_hash: Hash256,
    pub account: AccountId,
    pub otxn_account: AccountId,
    pub otxn_id: Hash256,
    pub(crate) otxn_is_emitted: bool,
    pub exit_type: ExitType,
    pub exit_reason: Vec<u8>,
    pub exit_code: i64,
    pub instruction_count: u64,
    /// State cache: key -> (dirty, value). Only dirty entries are written
    /// at commit; an empty dirty value is a delete.
    pub(crate) changed_state: BTreeMap<Hash256, (bool, Vec<u8>)>,
    /// Prepared child transactions, in emission order.
    pub(crate) emitted: VecDeque<(Hash256, Vec<u8>)>,
}

impl HookResult {
    pub fn emitted_txns(&self) -> impl Iterator<Item = (&Hash256, &Vec<u8>)> {
        self.emitted.iter().map(|(id, blob)| (id, blob))
    }

    /// Number of dirty entries staged in the state cache.
    pub fn state_change_count(&self) -> u16 {
        self.changed_state.values().filter(|(dirty, _)| *dirty).count() as u16
    }
}

impl<'a> HookContext<'a> {
    pub fn new(view: &'a mut dyn LedgerView, params: &HookParams, otxn_blob: Vec<u8>) -> Self {
        let otxn_id = util::txn_id(&otxn_blob);
        let otxn_account = sto::subfield(&otxn_blob, SF_ACCOUNT)
            .ok()
            .and_then(|b| AccountId::from_slice(&otxn_blob[b.payload_start..b.payload_end()]))
            .unwrap_or(AccountId::ZERO);
        let otxn_is_emitted = sto::subfield(&otxn_blob, SF_EMIT_DETAILS).is_ok();

        HookContext {
            view,
            otxn: Arc::new(otxn_blob),
            slots: SlotTable::new(),
            emission: EmissionState::new(),
            guards: BTreeMap::new(),
            result: HookResult {
                hook_set_txn_id: params.hook_set_txn_id,
                hook_hash: params.hook_hash,
                account: params.account,
                otxn_account,
                otxn_id,
                otxn_is_emitted,
                // rollback unless the hook calls accept
                exit_type: ExitType::Rollback,
                exit_reason: Vec::new(),
                exit_code: -1,
                instruction_count: 0,
                changed_state: BTreeMap::new(),
                emitted: VecDeque::new(),
            },
        }
    }

    pub(crate) fn otxn_type(&self) -> Result<i64, ReturnCode> {
        let bounds = sto::subfield(&self.otxn, SF_TRANSACTION_TYPE)?;
        Ok(sto::uint_payload(&self.otxn, &bounds) as i64)
    }

    /// Record a terminal exit. The dispatcher turns this into an engine
    /// abort, the reserved `RC_ACCEPT`/`RC_ROLLBACK` codes, so no further
    /// guest code runs.
    pub(crate) fn exit(&mut self, exit_type: ExitType, code: i64, reason: Vec<u8>) {
        self.result.exit_type = exit_type;
        self.result.exit_code = code;
        self.result.exit_reason = reason;
    }

    /// Guard metering: count an iteration of guard `id`, rolling the hook
    /// back once `max_iterations` is exceeded.
    pub(crate) fn guard(&mut self, id: u32, max_iterations: u32) -> bool {
        let count = self.guards.entry(id).or_insert(0);
        *count += 1;
        if *count <= max_iterations {
            return true;
        }

        if id > 0xFFFF {
            tracing::trace!(
                target: "hook",
                src_line = id & 0xFFFF,
                macro_line = id >> 16,
                iterations = *count,
                "macro guard violation"
            );
        } else {
            tracing::trace!(target: "hook", src_line = id, iterations = *count, "guard violation");
        }
        self.result.exit_type = ExitType::Rollback;
        self.result.exit_code = ReturnCode::GuardViolation.code();
        false
    }
}
