// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The invoker: build a context, run the guest, interpret its exit.

use hookvm_abi::ExitType;

use crate::commit::{commit_changes, APPLY, REMOVE};
use crate::context::{HookContext, HookParams, HookResult};
use crate::error::Error;
use crate::imports::HostEnv;
use crate::instance::WrappedInstance;
use crate::ledger::LedgerView;

/// Execute a hook against the view and the originating transaction.
///
/// The primary entry point is the guest's `hook` export; a `callback`
/// invocation runs `cbak` instead and commits its own changes (always
/// removing the emitted-directory entry, applying state only on accept).
/// For primary invocations the caller decides when to call
/// [`commit_changes`], after inspecting the exit type.
pub fn apply(
    view: &mut dyn LedgerView,
    params: &HookParams,
    bytecode: &[u8],
    otxn_blob: &[u8],
    callback: bool,
) -> HookResult {
    let mut ctx = HookContext::new(view, params, otxn_blob.to_vec());

    // # Safety
    // The engine requires host-function environments to be 'static. The
    // env cannot outlive the context: it lives inside the instance, and
    // the instance is dropped before the context is read or returned.
    // Hence the lifetime can be erased for the duration of the call.
    let env_ctx = unsafe {
        std::mem::transmute::<&mut HookContext, &'static mut HookContext<'static>>(&mut ctx)
    };

    let entry = if callback { "cbak" } else { "hook" };
    tracing::trace!(target: "hook", entry, "creating wasm instance");

    match WrappedInstance::new(bytecode, HostEnv::new(env_ctx)) {
        Ok(mut instance) => {
            let call = instance.call_entry(entry);
            let spent = instance.spent_points();
            drop(instance);

            ctx.result.instruction_count = spent;
            match call {
                Ok(code) => {
                    // a callback that runs to completion has accepted
                    if callback {
                        ctx.result.exit_type = ExitType::Accept;
                        ctx.result.exit_code = code;
                    }
                }
                Err(Error::RuntimeError(trap)) => match trap.downcast::<Error>() {
                    // terminal accept/rollback/guard, already recorded
                    Ok(Error::Exited) => {}
                    Ok(err) => {
                        tracing::warn!(target: "hook", %err, "host error during execution");
                        ctx.result.exit_type = ExitType::WasmError;
                    }
                    Err(trap) => {
                        tracing::warn!(target: "hook", %trap, "guest trapped");
                        ctx.result.exit_type = ExitType::WasmError;
                    }
                },
                Err(err) => {
                    tracing::warn!(target: "hook", %err, "execution failed");
                    ctx.result.exit_type = ExitType::WasmError;
                }
            }
        }
        Err(err) => {
            tracing::warn!(target: "hook", %err, "instantiation failed");
            ctx.result.exit_type = ExitType::WasmError;
        }
    }

    tracing::trace!(
        target: "hook",
        exit = ?ctx.result.exit_type,
        code = ctx.result.exit_code,
        reason = %String::from_utf8_lossy(&ctx.result.exit_reason),
        "hook finished"
    );

    // the callback commits its own outcome
    if callback {
        let mode = if ctx.result.exit_type == ExitType::Accept {
            APPLY | REMOVE
        } else {
            REMOVE
        };
        let HookContext { view, result, .. } = &mut ctx;
        commit_changes(&mut **view, result, mode);
    }

    ctx.result
}
