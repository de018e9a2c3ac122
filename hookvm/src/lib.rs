// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! hookvm: a WASM smart-contract ("hook") execution runtime embedded in a
//! ledger transaction pipeline.
//!
//! When a transaction affects an account carrying an installed hook, the
//! enclosing transactor calls [`apply`] with the hook's bytecode, the
//! serialized originating transaction and a [`LedgerView`] over the open
//! ledger. The runtime instantiates the guest with the host-call ABI
//! registered, runs its `hook` (or `cbak`) export under instruction
//! metering, and collects its decision: accept or rollback, plus the side
//! effects it staged, which are state-key writes and newly-minted child
//! transactions.
//!
//! Side effects are deferred. Nothing touches the ledger until
//! [`commit_changes`] runs: on accept it flushes dirty state entries
//! (with owner-reserve accounting) and enqueues emitted transactions; on
//! rollback everything staged is discarded. One execution-metadata record
//! is appended either way.
//!
//! ```
//! use hookvm::{apply, commit_changes, AccountId, Hash256, HookParams, MemoryLedger};
//! use hookvm::{APPLY, REMOVE};
//!
//! let account = AccountId([0x11; 20]);
//! let mut ledger = MemoryLedger::new();
//! ledger.install_hook(account, 128);
//!
//! let params = HookParams {
//!     hook_set_txn_id: Hash256::ZERO,
//!     hook_hash: Hash256([0xAB; 32]),
//!     account,
//! };
//!
//! // a guest that accepts immediately with code 7
//! let bytecode = wat::parse_str(r#"
//!     (module
//!       (import "env" "accept" (func $accept (param i32 i32 i64) (result i64)))
//!       (memory (export "memory") 1)
//!       (func (export "hook") (param i64) (result i64)
//!         (call $accept (i32.const 0) (i32.const 0) (i64.const 7))))
//! "#).unwrap();
//!
//! let mut result = apply(&mut ledger, &params, &bytecode, &[0x24, 0, 0, 0, 1], false);
//! assert_eq!(result.exit_code, 7);
//! commit_changes(&mut ledger, &mut result, APPLY | REMOVE);
//! assert_eq!(ledger.executions().len(), 1);
//! ```

mod commit;
mod context;
mod emit;
mod error;
pub mod float;
mod imports;
mod instance;
mod keylet;
mod ledger;
mod slots;
mod state;
pub mod sto;
mod util;
mod vm;

pub use commit::{commit_changes, APPLY, REMOVE};
pub use context::{HookParams, HookResult};
pub use error::Error;
pub use keylet::Keylet;
pub use ledger::{AccountId, Hash256, HookExecution, LedgerError, LedgerView, MemoryLedger};
pub use state::make_state_key;
pub use util::{sha512h, txn_id};
pub use vm::apply;

// re-export the shared ABI constants wholesale, ensuring this is the only
// crate an embedder needs.
pub use hookvm_abi::*;

pub mod keylets {
    //! The typed keylet constructors, for hosts preparing ledger state.
    pub use crate::keylet::*;
}
