// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The ABI dispatcher: every host function the guest can import.
//!
//! Guest pointers are 32-bit offsets into the instance's linear memory.
//! Each function verifies `offset + length <= memory length` in unsigned
//! 64-bit arithmetic before touching memory, performs its operation
//! through the context, and returns a signed 64-bit code: negative for an
//! error kind, non-negative for a length, handle or datum.

use hookvm_abi::{keylet_code, ExitType, ReturnCode, EMIT_DETAILS_SIZE, ST_ARRAY};
use wasmer::{imports, Function, FunctionEnv, FunctionEnvMut, Imports};

use crate::context::HookContext;
use crate::error::Error;
use crate::float::{self, StoForm};
use crate::keylet::{self, Keylet, KEYLET_LEN};
use crate::ledger::{AccountId, Hash256};
use crate::{sto, util};

const TRACE_LABEL_MAX: usize = 128;
const TRACE_DATA_MAX: usize = 1024;
const EXIT_REASON_MAX: usize = 64;
const STO_SOURCE_MAX: u32 = 16 * 1024;
const STO_FIELD_MAX: u32 = 4096;

/// Per-invocation host state captured by every host-function closure.
pub(crate) struct HostEnv {
    ctx: &'static mut HookContext<'static>,
    pub(crate) memory: Option<wasmer::Memory>,
}

impl HostEnv {
    pub(crate) fn new(ctx: &'static mut HookContext<'static>) -> Self {
        HostEnv { ctx, memory: None }
    }
}

/// Run `f` against the context and the guest's linear memory.
fn with_env<R>(
    fenv: &mut FunctionEnvMut<HostEnv>,
    f: impl FnOnce(&mut HookContext<'static>, &mut [u8]) -> R,
) -> Result<R, Error> {
    let (data, store) = fenv.data_and_store_mut();
    let HostEnv { ctx, memory } = data;
    let memory = memory.as_ref().ok_or(Error::MemoryNotAttached)?;
    let view = memory.view(&store);
    let mem = unsafe { view.data_unchecked_mut() };
    Ok(f(&mut **ctx, mem))
}

/// `offset + length <= memory length`, in unsigned 64-bit arithmetic so
/// the sum cannot wrap.
fn in_bounds(mem: &[u8], ptr: u32, len: u32) -> bool {
    ptr as u64 + len as u64 <= mem.len() as u64
}

fn guest_slice<'m>(mem: &'m [u8], ptr: u32, len: u32) -> Option<&'m [u8]> {
    in_bounds(mem, ptr, len).then(|| &mem[ptr as usize..(ptr + len) as usize])
}

/// Copy `src` into guest memory, saturated to the guest buffer length.
/// Returns bytes written, or `OutOfBounds` encoded.
fn write_to_guest(mem: &mut [u8], ptr: u32, guest_len: u32, src: &[u8]) -> i64 {
    let n = src.len().min(guest_len as usize);
    if ptr as u64 + n as u64 > mem.len() as u64 {
        return ReturnCode::OutOfBounds.code();
    }
    let ptr = ptr as usize;
    mem[ptr..ptr + n].copy_from_slice(&src[..n]);
    n as i64
}

fn flat(result: Result<i64, ReturnCode>) -> i64 {
    result.unwrap_or_else(|code| code.code())
}

const OOB: i64 = ReturnCode::OutOfBounds.code();

// -------------------------------------------------------------------------
// trace sinks

fn trace_line(ctx: &HookContext, label: &[u8], tail: &str) {
    let label = if util::is_utf16le(label) {
        util::utf16_narrow(label)
    } else {
        label.to_vec()
    };
    let label = String::from_utf8_lossy(&label[..label.len().min(TRACE_LABEL_MAX)]).into_owned();
    tracing::trace!(
        target: "hook",
        account = ?ctx.result.account,
        otxn_account = ?ctx.result.otxn_account,
        "{label} {tail}"
    );
}

fn trace(
    mut fenv: FunctionEnvMut<HostEnv>,
    mread_ptr: u32,
    mread_len: u32,
    dread_ptr: u32,
    dread_len: u32,
    as_hex: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if !in_bounds(mem, mread_ptr, mread_len) || !in_bounds(mem, dread_ptr, dread_len) {
            return OOB;
        }
        let mread_len = mread_len.min(TRACE_LABEL_MAX as u32);
        let dread_len = dread_len.min(TRACE_DATA_MAX as u32);
        let data = &mem[dread_ptr as usize..(dread_ptr + dread_len) as usize];

        let payload = if as_hex != 0 {
            util::hex_upper(data)
        } else if util::is_utf16le(data) {
            String::from_utf8_lossy(&util::utf16_narrow(data)).into_owned()
        } else {
            String::from_utf8_lossy(data).into_owned()
        };
        let label = &mem[mread_ptr as usize..(mread_ptr + mread_len) as usize];
        trace_line(ctx, label, &payload);
        0
    })
}

fn trace_num(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    number: i64,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        let Some(label) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        trace_line(ctx, label, &number.to_string());
        0
    })
}

fn trace_float(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    float1: i64,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        let Some(label) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        let tail = if float1 == 0 {
            "Float 0*10^(0) <ZERO>".to_string()
        } else if float::require_valid(float1).is_err() {
            "Float <INVALID>".to_string()
        } else {
            let sign = if float::is_negative(float1) { -1i64 } else { 1 };
            format!(
                "Float {}*10^({})",
                sign * float::mantissa(float1) as i64,
                float::exponent(float1)
            )
        };
        trace_line(ctx, label, &tail);
        0
    })
}

fn trace_slot(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    slot_no: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        let id = match ctx.slot_id_hex(slot_no) {
            Ok(id) => id,
            Err(code) => return code.code(),
        };
        let Some(label) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        trace_line(ctx, label, &format!("Slot {slot_no} - {id}"));
        0
    })
}

// -------------------------------------------------------------------------
// terminal exits and the guard meter

fn hook_exit(
    fenv: &mut FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    error_code: i64,
    exit_type: ExitType,
) -> Result<i64, Error> {
    let out = with_env(fenv, |ctx, mem| {
        let read_len = read_len.min(EXIT_REASON_MAX as u32);
        let mut reason = Vec::new();
        if read_ptr != 0 {
            let Some(bytes) = guest_slice(mem, read_ptr, read_len) else {
                tracing::warn!(
                    target: "hook",
                    "accept/rollback reason string outside of the wasm instance"
                );
                return Err(OOB);
            };
            // assembly script and some other languages use utf16 strings
            reason = if util::is_utf16le(bytes) {
                util::utf16_narrow(bytes)
            } else {
                bytes.to_vec()
            };
        }
        ctx.exit(exit_type, error_code, reason);
        Ok(())
    })?;
    match out {
        Ok(()) => Err(Error::Exited),
        Err(code) => Ok(code),
    }
}

fn accept(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    error_code: i64,
) -> Result<i64, Error> {
    hook_exit(&mut fenv, read_ptr, read_len, error_code, ExitType::Accept)
}

fn rollback(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    error_code: i64,
) -> Result<i64, Error> {
    hook_exit(&mut fenv, read_ptr, read_len, error_code, ExitType::Rollback)
}

fn guard(mut fenv: FunctionEnvMut<HostEnv>, id: u32, maxitr: u32) -> Result<i32, Error> {
    let ok = with_env(&mut fenv, |ctx, _mem| ctx.guard(id, maxitr))?;
    if ok {
        Ok(1)
    } else {
        Err(Error::Exited)
    }
}

// -------------------------------------------------------------------------
// identity and environment

fn hook_account(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    _write_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if !in_bounds(mem, write_ptr, 20) {
            return OOB;
        }
        let account = ctx.result.account;
        write_to_guest(mem, write_ptr, 20, &account.0)
    })
}

fn hook_hash(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if write_len < 32 {
            return ReturnCode::TooSmall.code();
        }
        if !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }
        let hash = ctx.result.hook_hash;
        write_to_guest(mem, write_ptr, 32, &hash.0)
    })
}

fn ledger_seq(mut fenv: FunctionEnvMut<HostEnv>) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| ctx.view.seq() as i64)
}

fn fee_base(mut fenv: FunctionEnvMut<HostEnv>) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| ctx.fee_base() as i64)
}

// -------------------------------------------------------------------------
// the originating transaction

fn otxn_id(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if write_len < 32 {
            return ReturnCode::TooSmall.code();
        }
        if !in_bounds(mem, write_ptr, 32) {
            return OOB;
        }
        let id = ctx.result.otxn_id;
        write_to_guest(mem, write_ptr, 32, &id.0)
    })
}

fn otxn_type(mut fenv: FunctionEnvMut<HostEnv>) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| flat(ctx.otxn_type()))
}

fn otxn_burden(mut fenv: FunctionEnvMut<HostEnv>) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| ctx.otxn_burden())
}

fn otxn_generation(mut fenv: FunctionEnvMut<HostEnv>) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| ctx.otxn_generation())
}

fn otxn_slot(mut fenv: FunctionEnvMut<HostEnv>, slot_into: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| flat(ctx.otxn_slot(slot_into)))
}

fn otxn_field(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    field_id: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if write_ptr != 0 && !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }
        if field_id == 0 {
            return ReturnCode::InvalidField.code();
        }
        let bounds = match sto::subfield(&ctx.otxn, field_id) {
            Ok(b) => b,
            Err(code) => return code.code(),
        };
        let data = ctx.otxn[sto::view_range(&bounds)].to_vec();

        if write_ptr == 0 {
            return flat(util::data_as_int64(&data));
        }
        if data.len() > write_len as usize {
            return ReturnCode::TooSmall.code();
        }
        write_to_guest(mem, write_ptr, write_len, &data)
    })
}

fn otxn_field_txt(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    field_id: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }
        if field_id == 0 {
            return ReturnCode::InvalidField.code();
        }
        let bounds = match sto::subfield(&ctx.otxn, field_id) {
            Ok(b) => b,
            Err(code) => return code.code(),
        };
        let payload = &ctx.otxn[bounds.payload_start..bounds.payload_end()];
        let text = match bounds.type_code() {
            1 | 2 | 3 | 16 => sto::uint_payload(&ctx.otxn, &bounds).to_string(),
            8 => match AccountId::from_slice(payload) {
                Some(account) => util::encode_raddr(&account),
                None => return ReturnCode::InvalidField.code(),
            },
            _ => util::hex_upper(payload),
        };

        if text.len() > write_len as usize {
            return ReturnCode::TooSmall.code();
        }
        write_to_guest(mem, write_ptr, write_len, text.as_bytes())
    })
}

// -------------------------------------------------------------------------
// slots

fn slot(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    slot_no: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if !(write_ptr == 0 && write_len == 0) && !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }
        if write_ptr != 0 && write_len == 0 {
            return ReturnCode::TooSmall.code();
        }
        let data = match ctx.slot_serialized(slot_no) {
            Ok(data) => data,
            Err(code) => return code.code(),
        };
        if write_ptr == 0 {
            return flat(util::data_as_int64(&data));
        }
        if data.len() > write_len as usize {
            return ReturnCode::TooSmall.code();
        }
        write_to_guest(mem, write_ptr, write_len, &data)
    })
}

fn slot_clear(mut fenv: FunctionEnvMut<HostEnv>, slot_no: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| flat(ctx.slot_clear(slot_no)))
}

fn slot_count(mut fenv: FunctionEnvMut<HostEnv>, slot_no: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| flat(ctx.slot_count(slot_no)))
}

fn slot_id(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    slot_no: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        let id = match ctx.slot_id(slot_no) {
            Ok(id) => id.to_vec(),
            Err(code) => return code.code(),
        };
        if (write_len as usize) < id.len() {
            return ReturnCode::TooSmall.code();
        }
        if !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }
        write_to_guest(mem, write_ptr, write_len, &id)
    })
}

fn slot_set(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    slot_into: i32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        let Some(id) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        let id = id.to_vec();
        flat(ctx.slot_set(&id, slot_into))
    })
}

fn slot_size(mut fenv: FunctionEnvMut<HostEnv>, slot_no: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| flat(ctx.slot_size(slot_no)))
}

fn slot_subarray(
    mut fenv: FunctionEnvMut<HostEnv>,
    parent_slot: u32,
    array_id: u32,
    new_slot: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| {
        flat(ctx.slot_subarray(parent_slot, array_id, new_slot))
    })
}

fn slot_subfield(
    mut fenv: FunctionEnvMut<HostEnv>,
    parent_slot: u32,
    field_id: u32,
    new_slot: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| {
        flat(ctx.slot_subfield(parent_slot, field_id, new_slot))
    })
}

fn slot_type(mut fenv: FunctionEnvMut<HostEnv>, slot_no: u32, flags: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| flat(ctx.slot_type(slot_no, flags)))
}

fn slot_float(mut fenv: FunctionEnvMut<HostEnv>, slot_no: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| flat(ctx.slot_float(slot_no)))
}

// -------------------------------------------------------------------------
// state

/// Shared body of `state` and `state_foreign`: a zero `aread_ptr` reads
/// local state, `aread_len` ignored.
fn state_read_into(
    ctx: &mut HookContext,
    mem: &mut [u8],
    write_ptr: u32,
    write_len: u32,
    kread_ptr: u32,
    kread_len: u32,
    aread_ptr: u32,
    aread_len: u32,
) -> i64 {
    if !in_bounds(mem, kread_ptr, kread_len)
        || !in_bounds(mem, aread_ptr, aread_len)
        || !in_bounds(mem, write_ptr, write_len)
    {
        return OOB;
    }
    if kread_len > 32 {
        return ReturnCode::TooBig.code();
    }
    let foreign = if aread_ptr == 0 {
        None
    } else {
        if aread_len != 20 {
            return ReturnCode::InvalidAccount.code();
        }
        AccountId::from_slice(&mem[aread_ptr as usize..(aread_ptr + 20) as usize])
    };

    let key = mem[kread_ptr as usize..(kread_ptr + kread_len) as usize].to_vec();
    let value = match ctx.state_read(&key, foreign) {
        Ok(value) => value,
        Err(code) => return code.code(),
    };

    if write_ptr == 0 {
        return flat(util::data_as_int64(&value));
    }
    if value.len() > write_len as usize {
        return ReturnCode::TooSmall.code();
    }
    write_to_guest(mem, write_ptr, write_len, &value)
}

fn state(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    kread_ptr: u32,
    kread_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        state_read_into(ctx, mem, write_ptr, write_len, kread_ptr, kread_len, 0, 0)
    })
}

fn state_foreign(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    kread_ptr: u32,
    kread_len: u32,
    aread_ptr: u32,
    aread_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        state_read_into(
            ctx, mem, write_ptr, write_len, kread_ptr, kread_len, aread_ptr, aread_len,
        )
    })
}

fn state_set(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    kread_ptr: u32,
    kread_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if !in_bounds(mem, kread_ptr, kread_len) {
            return OOB;
        }
        // a zero pointer and length is a delete
        if !(read_ptr == 0 && read_len == 0) && !in_bounds(mem, read_ptr, read_len) {
            return OOB;
        }
        if kread_len > 32 {
            return ReturnCode::TooBig.code();
        }
        if kread_len < 1 {
            return ReturnCode::TooSmall.code();
        }

        let key = mem[kread_ptr as usize..(kread_ptr + kread_len) as usize].to_vec();
        let value = mem[read_ptr as usize..(read_ptr + read_len) as usize].to_vec();
        flat(ctx.state_write(&value, &key))
    })
}

// -------------------------------------------------------------------------
// serialized-object parsing and editing

fn sto_subfield(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    field_id: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        let Some(buf) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        match sto::subfield(buf, field_id) {
            // arrays are returned fully formed, everything else as payload
            Ok(b) if b.type_code() == ST_ARRAY => ((b.start as i64) << 32) + b.len() as i64,
            Ok(b) => ((b.payload_start as i64) << 32) + b.payload_len as i64,
            Err(code) => code.code(),
        }
    })
}

fn sto_subarray(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
    index_id: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        let Some(buf) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        match sto::subarray(buf, index_id) {
            Ok(b) => ((b.start as i64) << 32) + b.len() as i64,
            Err(code) => code.code(),
        }
    })
}

fn sto_emplace(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    sread_ptr: u32,
    sread_len: u32,
    fread_ptr: u32,
    fread_len: u32,
    field_id: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        if !in_bounds(mem, write_ptr, write_len)
            || !in_bounds(mem, sread_ptr, sread_len)
            || !in_bounds(mem, fread_ptr, fread_len)
        {
            return OOB;
        }
        if write_len < sread_len + fread_len {
            return ReturnCode::TooSmall.code();
        }
        if sread_len > STO_SOURCE_MAX {
            return ReturnCode::TooBig.code();
        }
        if fread_len > STO_FIELD_MAX {
            return ReturnCode::TooBig.code();
        }

        let src = mem[sread_ptr as usize..(sread_ptr + sread_len) as usize].to_vec();
        let field = mem[fread_ptr as usize..(fread_ptr + fread_len) as usize].to_vec();
        match sto::emplace(&src, &field, field_id) {
            Ok(out) => write_to_guest(mem, write_ptr, write_len, &out),
            Err(code) => code.code(),
        }
    })
}

fn sto_erase(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    read_ptr: u32,
    read_len: u32,
    field_id: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        if !in_bounds(mem, write_ptr, write_len) || !in_bounds(mem, read_ptr, read_len) {
            return OOB;
        }
        if read_len > STO_SOURCE_MAX {
            return ReturnCode::TooBig.code();
        }
        if write_len < read_len {
            return ReturnCode::TooSmall.code();
        }

        let src = mem[read_ptr as usize..(read_ptr + read_len) as usize].to_vec();
        match sto::erase(&src, field_id) {
            Ok(out) => write_to_guest(mem, write_ptr, write_len, &out),
            Err(code) => code.code(),
        }
    })
}

fn sto_validate(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        let Some(buf) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        if buf.is_empty() {
            return ReturnCode::TooSmall.code();
        }
        sto::validate(buf) as i64
    })
}

// -------------------------------------------------------------------------
// emission

fn emit(mut fenv: FunctionEnvMut<HostEnv>, read_ptr: u32, read_len: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        let Some(blob) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        let blob = blob.to_vec();
        flat(ctx.emit(&blob))
    })
}

fn etxn_reserve(mut fenv: FunctionEnvMut<HostEnv>, count: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| flat(ctx.etxn_reserve(count)))
}

fn etxn_fee_base(mut fenv: FunctionEnvMut<HostEnv>, tx_byte_count: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| {
        flat(ctx.etxn_fee_base(tx_byte_count).map(|fee| fee as i64))
    })
}

fn etxn_burden(mut fenv: FunctionEnvMut<HostEnv>) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| {
        flat(ctx.etxn_burden().map(|burden| burden as i64))
    })
}

fn etxn_generation(mut fenv: FunctionEnvMut<HostEnv>) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, _mem| ctx.etxn_generation())
}

fn etxn_details(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }
        if (write_len as usize) < EMIT_DETAILS_SIZE {
            return ReturnCode::TooSmall.code();
        }
        let details = match ctx.emit_details() {
            Ok(details) => details,
            Err(code) => return code.code(),
        };
        write_to_guest(mem, write_ptr, write_len, &details)
    })
}

// -------------------------------------------------------------------------
// utilities

fn nonce(mut fenv: FunctionEnvMut<HostEnv>, write_ptr: u32, write_len: u32) -> Result<i64, Error> {
    with_env(&mut fenv, |ctx, mem| {
        if write_len < 32 {
            return ReturnCode::TooSmall.code();
        }
        if !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }
        match ctx.new_nonce() {
            Ok(nonce) => write_to_guest(mem, write_ptr, 32, &nonce.0),
            Err(code) => code.code(),
        }
    })
}

fn util_sha512h(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    read_ptr: u32,
    read_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        if write_len < 32 {
            return ReturnCode::TooSmall.code();
        }
        if !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }
        let Some(data) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        let hash = util::sha512h(&[data]);
        write_to_guest(mem, write_ptr, 32, &hash.0)
    })
}

fn util_verify(
    mut fenv: FunctionEnvMut<HostEnv>,
    dread_ptr: u32,
    dread_len: u32,
    sread_ptr: u32,
    sread_len: u32,
    kread_ptr: u32,
    kread_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        if !in_bounds(mem, dread_ptr, dread_len)
            || !in_bounds(mem, sread_ptr, sread_len)
            || !in_bounds(mem, kread_ptr, kread_len)
        {
            return OOB;
        }
        let data = mem[dread_ptr as usize..(dread_ptr + dread_len) as usize].to_vec();
        let sig = mem[sread_ptr as usize..(sread_ptr + sread_len) as usize].to_vec();
        let key = mem[kread_ptr as usize..(kread_ptr + kread_len) as usize].to_vec();
        util::verify(&key, &data, &sig) as i64
    })
}

fn util_raddr(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    read_ptr: u32,
    read_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        if !in_bounds(mem, write_ptr, write_len) || !in_bounds(mem, read_ptr, read_len) {
            return OOB;
        }
        if read_len != 20 {
            return ReturnCode::InvalidArgument.code();
        }
        let account =
            AccountId::from_slice(&mem[read_ptr as usize..(read_ptr + 20) as usize]).expect("20 bytes");
        let raddr = util::encode_raddr(&account);
        if (write_len as usize) < raddr.len() {
            return ReturnCode::TooSmall.code();
        }
        write_to_guest(mem, write_ptr, write_len, raddr.as_bytes())
    })
}

fn util_accid(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    read_ptr: u32,
    read_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        if !in_bounds(mem, write_ptr, write_len) || !in_bounds(mem, read_ptr, read_len) {
            return OOB;
        }
        if write_len < 20 {
            return ReturnCode::TooSmall.code();
        }
        if read_len > 49 {
            return ReturnCode::TooBig.code();
        }
        let raw = &mem[read_ptr as usize..(read_ptr + read_len) as usize];
        let Ok(raddr) = std::str::from_utf8(raw) else {
            return ReturnCode::InvalidArgument.code();
        };
        match util::decode_raddr(raddr) {
            Some(account) => write_to_guest(mem, write_ptr, 20, &account.0),
            None => ReturnCode::InvalidArgument.code(),
        }
    })
}

fn util_keylet(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    keylet_type: u32,
    a: u32,
    b: u32,
    c: u32,
    d: u32,
    e: u32,
    f: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        if !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }
        if write_len < KEYLET_LEN as u32 {
            return ReturnCode::TooSmall.code();
        }
        if !(keylet_code::FIRST..=keylet_code::LAST).contains(&keylet_type) {
            return ReturnCode::InvalidArgument.code();
        }

        let kl = match build_keylet(mem, keylet_type, [a, b, c, d, e, f]) {
            Ok(kl) => kl,
            Err(code) => return code.code(),
        };
        write_to_guest(mem, write_ptr, write_len, &kl.to_bytes())
    })
}

fn read_exact(mem: &[u8], ptr: u32, len: u32, expect: u32) -> Result<&[u8], ReturnCode> {
    if !in_bounds(mem, ptr, len) {
        return Err(ReturnCode::OutOfBounds);
    }
    if len != expect {
        return Err(ReturnCode::InvalidArgument);
    }
    Ok(&mem[ptr as usize..(ptr + len) as usize])
}

fn account_arg(mem: &[u8], ptr: u32, len: u32) -> Result<AccountId, ReturnCode> {
    let bytes = read_exact(mem, ptr, len, 20)?;
    AccountId::from_slice(bytes).ok_or(ReturnCode::InvalidArgument)
}

fn hash_arg(mem: &[u8], ptr: u32, len: u32) -> Result<Hash256, ReturnCode> {
    let bytes = read_exact(mem, ptr, len, 32)?;
    Hash256::from_slice(bytes).ok_or(ReturnCode::InvalidArgument)
}

fn require_zero(args: &[u32]) -> Result<(), ReturnCode> {
    if args.iter().any(|&v| v != 0) {
        return Err(ReturnCode::InvalidArgument);
    }
    Ok(())
}

fn require_nonzero(args: &[u32]) -> Result<(), ReturnCode> {
    if args.iter().any(|&v| v == 0) {
        return Err(ReturnCode::InvalidArgument);
    }
    Ok(())
}

/// The 21 typed keylet constructors, with runtime arity validation.
fn build_keylet(mem: &[u8], keylet_type: u32, args: [u32; 6]) -> Result<Keylet, ReturnCode> {
    use keylet_code::*;
    let [a, b, c, d, e, f] = args;

    match keylet_type {
        // a keylet and an 8-byte quality
        QUALITY => {
            require_nonzero(&[a, b, c, d])?;
            require_zero(&[e, f])?;
            let bytes = read_exact(mem, a, b, KEYLET_LEN as u32)?;
            let kl = Keylet::from_bytes(bytes).ok_or(ReturnCode::NoSuchKeylet)?;
            let quality = ((c as u64) << 32) + d as u64;
            Ok(keylet::quality(&kl, quality))
        }

        // a 32-byte key
        CHILD | EMITTED | UNCHECKED => {
            require_nonzero(&[a, b])?;
            require_zero(&[c, d, e, f])?;
            let key = hash_arg(mem, a, b)?;
            Ok(match keylet_type {
                CHILD => keylet::child(&key),
                EMITTED => keylet::emitted(&key),
                _ => keylet::unchecked(&key),
            })
        }

        // a 20-byte account id
        OWNER_DIR | SIGNERS | ACCOUNT | HOOK => {
            require_nonzero(&[a, b])?;
            require_zero(&[c, d, e, f])?;
            let id = account_arg(mem, a, b)?;
            Ok(match keylet_type {
                HOOK => keylet::hook(&id),
                SIGNERS => keylet::signers(&id),
                OWNER_DIR => keylet::owner_dir(&id),
                _ => keylet::account(&id),
            })
        }

        // a 20-byte account id and a 4-byte sequence
        OFFER | CHECK | ESCROW => {
            require_nonzero(&[a, b, c])?;
            require_zero(&[d, e, f])?;
            let id = account_arg(mem, a, b)?;
            Ok(match keylet_type {
                CHECK => keylet::check(&id, c),
                ESCROW => keylet::escrow(&id, c),
                _ => keylet::offer(&id, c),
            })
        }

        // a 32-byte key and an 8-byte page index
        PAGE => {
            require_nonzero(&[a, b, c, d])?;
            require_zero(&[e, f])?;
            let root = hash_arg(mem, a, b)?;
            let index = ((c as u64) << 32) + d as u64;
            Ok(keylet::page(&root, index))
        }

        // a 20-byte account id and a 32-byte key
        HOOK_STATE => {
            require_nonzero(&[a, b, c, d])?;
            require_zero(&[e, f])?;
            let owner = account_arg(mem, a, b)?;
            let key = hash_arg(mem, c, d)?;
            Ok(keylet::hook_state(&owner, &key))
        }

        // a single optional 4-byte argument
        SKIP => {
            require_zero(&[c, d, e, f])?;
            Ok(keylet::skip((b != 0).then_some(a)))
        }

        // no arguments
        AMENDMENTS | FEES | NEGATIVE_UNL | EMITTED_DIR => {
            require_zero(&[a, b, c, d, e, f])?;
            Ok(match keylet_type {
                AMENDMENTS => keylet::amendments(),
                FEES => keylet::fees(),
                NEGATIVE_UNL => keylet::negative_unl(),
                _ => keylet::emitted_dir(),
            })
        }

        // two 20-byte account ids and a 20-byte currency
        LINE => {
            require_nonzero(&[a, b, c, d, e, f])?;
            let hi = account_arg(mem, a, b)?;
            let lo = account_arg(mem, c, d)?;
            let currency: [u8; 20] = read_exact(mem, e, f, 20)?
                .try_into()
                .expect("20 bytes checked");
            Ok(keylet::line(&hi, &lo, &currency))
        }

        // two 20-byte account ids
        DEPOSIT_PREAUTH => {
            require_nonzero(&[a, b, c, d])?;
            require_zero(&[e, f])?;
            let owner = account_arg(mem, a, b)?;
            let preauthorized = account_arg(mem, c, d)?;
            Ok(keylet::deposit_preauth(&owner, &preauthorized))
        }

        // two 20-byte account ids and a 4-byte sequence
        PAYCHAN => {
            require_nonzero(&[a, b, c, d, e])?;
            require_zero(&[f])?;
            let source = account_arg(mem, a, b)?;
            let destination = account_arg(mem, c, d)?;
            Ok(keylet::paychan(&source, &destination, e))
        }

        _ => Err(ReturnCode::NoSuchKeylet),
    }
}

// -------------------------------------------------------------------------
// floats (pure; no context or memory unless noted)

fn float_set(exp: i32, mantissa: i64) -> i64 {
    flat(float::set(exp, mantissa))
}

fn float_multiply(float1: i64, float2: i64) -> i64 {
    flat(float::multiply(float1, float2))
}

fn float_mulratio(float1: i64, round_up: u32, numerator: u32, denominator: u32) -> i64 {
    flat(float::mulratio(float1, round_up != 0, numerator, denominator))
}

fn float_negate(float1: i64) -> i64 {
    flat(float::negate(float1))
}

fn float_compare(float1: i64, float2: i64, mode: u32) -> i64 {
    flat(float::compare(float1, float2, mode))
}

fn float_sum(float1: i64, float2: i64) -> i64 {
    flat(float::sum(float1, float2))
}

fn float_divide(float1: i64, float2: i64) -> i64 {
    flat(float::divide(float1, float2))
}

fn float_one() -> i64 {
    float::one()
}

fn float_invert(float1: i64) -> i64 {
    flat(float::invert(float1))
}

fn float_exponent(float1: i64) -> i64 {
    flat(float::exponent_checked(float1))
}

fn float_mantissa(float1: i64) -> i64 {
    flat(float::mantissa_checked(float1))
}

fn float_sign(float1: i64) -> i64 {
    flat(float::sign_checked(float1))
}

fn float_exponent_set(float1: i64, exponent: i32) -> i64 {
    flat(float::exponent_set(float1, exponent))
}

fn float_mantissa_set(float1: i64, mantissa: i64) -> i64 {
    flat(float::mantissa_set(float1, mantissa))
}

fn float_sign_set(float1: i64, negative: u32) -> i64 {
    flat(float::sign_set(float1, negative != 0))
}

fn float_int(float1: i64, decimal_places: u32, absolute: u32) -> i64 {
    flat(float::int(float1, decimal_places, absolute != 0))
}

fn float_sto(
    mut fenv: FunctionEnvMut<HostEnv>,
    write_ptr: u32,
    write_len: u32,
    cread_ptr: u32,
    cread_len: u32,
    iread_ptr: u32,
    iread_len: u32,
    float1: i64,
    field_code: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        if !in_bounds(mem, write_ptr, write_len) {
            return OOB;
        }

        let form = match field_code {
            0 => StoForm::Native,
            0xFFFF_FFFF => StoForm::Short,
            _ => {
                if cread_ptr == 0 && cread_len == 0 && iread_ptr == 0 && iread_len == 0 {
                    return ReturnCode::InvalidArgument.code();
                }
                if !in_bounds(mem, cread_ptr, cread_len) || !in_bounds(mem, iread_ptr, iread_len) {
                    return OOB;
                }
                if cread_len != 20 || iread_len != 20 {
                    return ReturnCode::InvalidArgument.code();
                }
                let currency: [u8; 20] = mem[cread_ptr as usize..(cread_ptr + 20) as usize]
                    .try_into()
                    .expect("20 bytes checked");
                let issuer: [u8; 20] = mem[iread_ptr as usize..(iread_ptr + 20) as usize]
                    .try_into()
                    .expect("20 bytes checked");
                StoForm::Issued {
                    field_id: field_code,
                    currency,
                    issuer,
                }
            }
        };

        let out = match float::sto_bytes(float1, &form) {
            Ok(out) => out,
            Err(code) => return code.code(),
        };
        if (write_len as usize) < out.len() {
            return ReturnCode::TooSmall.code();
        }
        write_to_guest(mem, write_ptr, write_len, &out)
    })
}

fn float_sto_set(
    mut fenv: FunctionEnvMut<HostEnv>,
    read_ptr: u32,
    read_len: u32,
) -> Result<i64, Error> {
    with_env(&mut fenv, |_ctx, mem| {
        let Some(buf) = guest_slice(mem, read_ptr, read_len) else {
            return OOB;
        };
        flat(float::sto_set(buf))
    })
}

// -------------------------------------------------------------------------


/// Register the full host-function surface under the `env` module.
pub(crate) fn hook_imports(store: &mut wasmer::Store, fenv: &FunctionEnv<HostEnv>) -> Imports {
    imports! {
        "env" => {
            "_g" => Function::new_typed_with_env(store, fenv, guard),
            "accept" => Function::new_typed_with_env(store, fenv, accept),
            "rollback" => Function::new_typed_with_env(store, fenv, rollback),

            "trace" => Function::new_typed_with_env(store, fenv, trace),
            "trace_num" => Function::new_typed_with_env(store, fenv, trace_num),
            "trace_float" => Function::new_typed_with_env(store, fenv, trace_float),
            "trace_slot" => Function::new_typed_with_env(store, fenv, trace_slot),

            "hook_account" => Function::new_typed_with_env(store, fenv, hook_account),
            "hook_hash" => Function::new_typed_with_env(store, fenv, hook_hash),
            "ledger_seq" => Function::new_typed_with_env(store, fenv, ledger_seq),
            "fee_base" => Function::new_typed_with_env(store, fenv, fee_base),

            "otxn_id" => Function::new_typed_with_env(store, fenv, otxn_id),
            "otxn_type" => Function::new_typed_with_env(store, fenv, otxn_type),
            "otxn_burden" => Function::new_typed_with_env(store, fenv, otxn_burden),
            "otxn_generation" => Function::new_typed_with_env(store, fenv, otxn_generation),
            "otxn_slot" => Function::new_typed_with_env(store, fenv, otxn_slot),
            "otxn_field" => Function::new_typed_with_env(store, fenv, otxn_field),
            "otxn_field_txt" => Function::new_typed_with_env(store, fenv, otxn_field_txt),

            "slot" => Function::new_typed_with_env(store, fenv, slot),
            "slot_clear" => Function::new_typed_with_env(store, fenv, slot_clear),
            "slot_count" => Function::new_typed_with_env(store, fenv, slot_count),
            "slot_id" => Function::new_typed_with_env(store, fenv, slot_id),
            "slot_set" => Function::new_typed_with_env(store, fenv, slot_set),
            "slot_size" => Function::new_typed_with_env(store, fenv, slot_size),
            "slot_subarray" => Function::new_typed_with_env(store, fenv, slot_subarray),
            "slot_subfield" => Function::new_typed_with_env(store, fenv, slot_subfield),
            "slot_type" => Function::new_typed_with_env(store, fenv, slot_type),
            "slot_float" => Function::new_typed_with_env(store, fenv, slot_float),

            "state" => Function::new_typed_with_env(store, fenv, state),
            "state_foreign" => Function::new_typed_with_env(store, fenv, state_foreign),
            "state_set" => Function::new_typed_with_env(store, fenv, state_set),

            "sto_subfield" => Function::new_typed_with_env(store, fenv, sto_subfield),
            "sto_subarray" => Function::new_typed_with_env(store, fenv, sto_subarray),
            "sto_emplace" => Function::new_typed_with_env(store, fenv, sto_emplace),
            "sto_erase" => Function::new_typed_with_env(store, fenv, sto_erase),
            "sto_validate" => Function::new_typed_with_env(store, fenv, sto_validate),

            "emit" => Function::new_typed_with_env(store, fenv, emit),
            "etxn_reserve" => Function::new_typed_with_env(store, fenv, etxn_reserve),
            "etxn_fee_base" => Function::new_typed_with_env(store, fenv, etxn_fee_base),
            "etxn_burden" => Function::new_typed_with_env(store, fenv, etxn_burden),
            "etxn_generation" => Function::new_typed_with_env(store, fenv, etxn_generation),
            "etxn_details" => Function::new_typed_with_env(store, fenv, etxn_details),

            "nonce" => Function::new_typed_with_env(store, fenv, nonce),
            "util_sha512h" => Function::new_typed_with_env(store, fenv, util_sha512h),
            "util_verify" => Function::new_typed_with_env(store, fenv, util_verify),
            "util_raddr" => Function::new_typed_with_env(store, fenv, util_raddr),
            "util_accid" => Function::new_typed_with_env(store, fenv, util_accid),
            "util_keylet" => Function::new_typed_with_env(store, fenv, util_keylet),

            "float_set" => Function::new_typed(store, float_set),
            "float_multiply" => Function::new_typed(store, float_multiply),
            "float_mulratio" => Function::new_typed(store, float_mulratio),
            "float_negate" => Function::new_typed(store, float_negate),
            "float_compare" => Function::new_typed(store, float_compare),
            "float_sum" => Function::new_typed(store, float_sum),
            "float_divide" => Function::new_typed(store, float_divide),
            "float_one" => Function::new_typed(store, float_one),
            "float_invert" => Function::new_typed(store, float_invert),
            "float_exponent" => Function::new_typed(store, float_exponent),
            "float_mantissa" => Function::new_typed(store, float_mantissa),
            "float_sign" => Function::new_typed(store, float_sign),
            "float_exponent_set" => Function::new_typed(store, float_exponent_set),
            "float_mantissa_set" => Function::new_typed(store, float_mantissa_set),
            "float_sign_set" => Function::new_typed(store, float_sign_set),
            "float_int" => Function::new_typed(store, float_int),
            "float_sto" => Function::new_typed_with_env(store, fenv, float_sto),
            "float_sto_set" => Function::new_typed_with_env(store, fenv, float_sto_set),
        }
    }
}
