// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use hookvm::{
    apply, commit_changes, txn_id, AccountId, ExitType, Hash256, HookParams, LedgerView,
    MemoryLedger, ReturnCode, APPLY, REMOVE, SF_ACCOUNT, SF_EMIT_DETAILS,
};

const ACCOUNT: AccountId = AccountId([0x11; 20]);
const OTHER: AccountId = AccountId([0x99; 20]);

fn params() -> HookParams {
    HookParams {
        hook_set_txn_id: Hash256([0x01; 32]),
        hook_hash: Hash256([0xAB; 32]),
        account: ACCOUNT,
    }
}

fn ledger() -> MemoryLedger {
    let mut ledger = MemoryLedger::new();
    ledger.install_hook(ACCOUNT, 128);
    ledger.fund(ACCOUNT, 100_000_000);
    ledger
}

fn payment_from(account: &AccountId) -> Vec<u8> {
    let mut txn = vec![0x24, 0, 0, 0, 1];
    txn.push(0x81);
    txn.push(20);
    txn.extend_from_slice(&account.0);
    txn
}

/// Accepts with "Outgoing"/20 when the transaction originates from the
/// hook's own account, rolls back with 1 otherwise.
fn outgoing_filter() -> Vec<u8> {
    let wat = format!(
        r#"
(module
  (import "env" "hook_account" (func $hook_account (param i32 i32) (result i64)))
  (import "env" "otxn_field" (func $otxn_field (param i32 i32 i32) (result i64)))
  (import "env" "accept" (func $accept (param i32 i32 i64) (result i64)))
  (import "env" "rollback" (func $rollback (param i32 i32 i64) (result i64)))
  (memory (export "memory") 1)
  (data (i32.const 64) "Outgoing")
  (func (export "hook") (param i64) (result i64)
    (drop (call $hook_account (i32.const 0) (i32.const 20)))
    (drop (call $otxn_field (i32.const 32) (i32.const 20) (i32.const {account_field})))
    (if (i32.and
          (i32.and
            (i64.eq (i64.load (i32.const 0)) (i64.load (i32.const 32)))
            (i64.eq (i64.load (i32.const 8)) (i64.load (i32.const 40))))
          (i32.eq (i32.load (i32.const 16)) (i32.load (i32.const 48))))
      (then (drop (call $accept (i32.const 64) (i32.const 8) (i64.const 20)))))
    (call $rollback (i32.const 0) (i32.const 0) (i64.const 1))))
"#,
        account_field = SF_ACCOUNT,
    );
    wat::parse_str(wat).expect("valid wat")
}

#[test]
fn accept_outgoing_payment() {
    let mut ledger = ledger();
    let bytecode = outgoing_filter();

    let mut result = apply(&mut ledger, &params(), &bytecode, &payment_from(&ACCOUNT), false);

    assert_eq!(result.exit_type, ExitType::Accept);
    assert_eq!(result.exit_code, 20);
    assert_eq!(result.exit_reason, b"Outgoing");
    assert!(result.instruction_count > 0);
    assert_eq!(result.state_change_count(), 0);
    assert_eq!(result.emitted_txns().count(), 0);

    commit_changes(&mut ledger, &mut result, APPLY | REMOVE);

    let executions = ledger.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].result, ExitType::Accept);
    assert_eq!(executions[0].return_code, 20);
    assert_eq!(executions[0].return_string, b"Outgoing");
    assert_eq!(executions[0].state_change_count, 0);
    assert_eq!(executions[0].emit_count, 0);
}

#[test]
fn rollback_incoming_payment() {
    let mut ledger = ledger();
    let bytecode = outgoing_filter();

    let result = apply(&mut ledger, &params(), &bytecode, &payment_from(&OTHER), false);

    assert_eq!(result.exit_type, ExitType::Rollback);
    assert_eq!(result.exit_code, 1);
}

#[test]
fn running_off_the_end_rolls_back() {
    let bytecode = wat::parse_str(
        r#"
(module
  (memory (export "memory") 1)
  (func (export "hook") (param i64) (result i64) (i64.const 0)))
"#,
    )
    .unwrap();

    let mut ledger = ledger();
    let result = apply(&mut ledger, &params(), &bytecode, &payment_from(&ACCOUNT), false);

    assert_eq!(result.exit_type, ExitType::Rollback);
    assert_eq!(result.exit_code, -1);
}

#[test]
fn a_trap_is_a_wasm_error() {
    let bytecode = wat::parse_str(
        r#"
(module
  (memory (export "memory") 1)
  (func (export "hook") (param i64) (result i64) (unreachable)))
"#,
    )
    .unwrap();

    let mut ledger = ledger();
    let result = apply(&mut ledger, &params(), &bytecode, &payment_from(&ACCOUNT), false);

    assert_eq!(result.exit_type, ExitType::WasmError);
}

#[test]
fn runaway_execution_exhausts_the_meter() {
    let bytecode = wat::parse_str(
        r#"
(module
  (memory (export "memory") 1)
  (func (export "hook") (param i64) (result i64)
    (loop $spin (br $spin))
    (i64.const 0)))
"#,
    )
    .unwrap();

    let mut ledger = ledger();
    let result = apply(&mut ledger, &params(), &bytecode, &payment_from(&ACCOUNT), false);

    assert_eq!(result.exit_type, ExitType::WasmError);
    assert!(result.instruction_count > 1_000_000);
}

#[test]
fn garbage_bytecode_is_a_wasm_error() {
    let mut ledger = ledger();
    let result = apply(&mut ledger, &params(), b"not wasm", &payment_from(&ACCOUNT), false);
    assert_eq!(result.exit_type, ExitType::WasmError);
}

#[test]
fn pure_float_imports_are_wired() {
    // float_one's mantissa is 10^15
    let bytecode = wat::parse_str(
        r#"
(module
  (import "env" "float_one" (func $float_one (result i64)))
  (import "env" "float_mantissa" (func $float_mantissa (param i64) (result i64)))
  (import "env" "accept" (func $accept (param i32 i32 i64) (result i64)))
  (memory (export "memory") 1)
  (func (export "hook") (param i64) (result i64)
    (call $accept (i32.const 0) (i32.const 0)
      (call $float_mantissa (call $float_one)))))
"#,
    )
    .unwrap();

    let mut ledger = ledger();
    let result = apply(&mut ledger, &params(), &bytecode, &payment_from(&ACCOUNT), false);

    assert_eq!(result.exit_type, ExitType::Accept);
    assert_eq!(result.exit_code, 1_000_000_000_000_000);
}

#[test]
fn out_of_bounds_pointers_are_refused() {
    // a trace pointer beyond the single memory page
    let bytecode = wat::parse_str(
        r#"
(module
  (import "env" "trace" (func $trace (param i32 i32 i32 i32 i32) (result i64)))
  (import "env" "accept" (func $accept (param i32 i32 i64) (result i64)))
  (memory (export "memory") 1)
  (func (export "hook") (param i64) (result i64)
    (call $accept (i32.const 0) (i32.const 0)
      (call $trace (i32.const 0) (i32.const 0) (i32.const 0xFFFF0000) (i32.const 64) (i32.const 0)))))
"#,
    )
    .unwrap();

    let mut ledger = ledger();
    let result = apply(&mut ledger, &params(), &bytecode, &payment_from(&ACCOUNT), false);

    assert_eq!(result.exit_type, ExitType::Accept);
    assert_eq!(result.exit_code, ReturnCode::OutOfBounds.code());
}

#[test]
fn callback_completion_accepts_and_commits() {
    // an originating transaction that was itself emitted by this hook
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
    let otxn = {
        let base = payment_from(&ACCOUNT);
        hookvm::sto::emplace(&base, &details, SF_EMIT_DETAILS).unwrap()
    };
    let otxn_id = txn_id(&otxn);

    let mut ledger = ledger();
    ledger.emitted_insert(otxn_id, otxn.clone()).unwrap();

    let bytecode = wat::parse_str(
        r#"
(module
  (memory (export "memory") 1)
  (func (export "cbak") (param i64) (result i64) (i64.const 0)))
"#,
    )
    .unwrap();

    let result = apply(&mut ledger, &params(), &bytecode, &otxn, true);

    // a callback that runs to completion has accepted, and commits itself
    assert_eq!(result.exit_type, ExitType::Accept);
    assert!(!ledger.emitted_contains(&otxn_id));
    assert_eq!(ledger.executions().len(), 1);
    assert_eq!(ledger.executions()[0].result, ExitType::Accept);
}
