// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/// How a hook invocation ended.
///
/// Only `Accept` lets the commit step apply staged state changes and
/// emitted transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitType {
    Rollback = 0,
    Accept = 1,
    WasmError = 2,
}

/// Bitfield modes for `float_compare`. Combining `LESS | GREATER` means
/// "not equal"; combining all three is invalid.
pub mod compare_mode {
    pub const EQUAL: u32 = 1;
    pub const LESS: u32 = 2;
    pub const GREATER: u32 = 4;
}

/// Typed constructors accepted by `util_keylet`.
pub mod keylet_code {
    pub const HOOK: u32 = 1;
    pub const HOOK_STATE: u32 = 2;
    pub const ACCOUNT: u32 = 3;
    pub const AMENDMENTS: u32 = 4;
    pub const CHILD: u32 = 5;
    pub const SKIP: u32 = 6;
    pub const FEES: u32 = 7;
    pub const NEGATIVE_UNL: u32 = 8;
    pub const LINE: u32 = 9;
    pub const OFFER: u32 = 10;
    pub const QUALITY: u32 = 11;
    pub const EMITTED_DIR: u32 = 12;
    pub const SIGNERS: u32 = 13;
    pub const CHECK: u32 = 14;
    pub const DEPOSIT_PREAUTH: u32 = 15;
    pub const UNCHECKED: u32 = 16;
    pub const OWNER_DIR: u32 = 17;
    pub const PAGE: u32 = 18;
    pub const ESCROW: u32 = 19;
    pub const PAYCHAN: u32 = 20;
    pub const EMITTED: u32 = 21;

    pub const FIRST: u32 = HOOK;
    pub const LAST: u32 = EMITTED;
}
