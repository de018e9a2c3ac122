// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Host-level failures.
///
/// These never reach the guest: guest-recoverable conditions are encoded as
/// negative [`ReturnCode`](hookvm_abi::ReturnCode) values at the ABI
/// boundary instead. An `Error` raised inside a host function unwinds
/// through the engine and ends the invocation.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    CompileError(Box<wasmer::CompileError>),
    #[error(transparent)]
    InstantiationError(Box<wasmer::InstantiationError>),
    #[error(transparent)]
    ExportError(Box<wasmer::ExportError>),
    #[error(transparent)]
    RuntimeError(wasmer::RuntimeError),
    #[error("guest memory is not yet attached to the host environment")]
    MemoryNotAttached,
    #[error("hook exited")]
    Exited,
    #[error("OutOfPoints")]
    OutOfPoints,
}

impl From<wasmer::CompileError> for Error {
    fn from(e: wasmer::CompileError) -> Self {
        Error::CompileError(Box::from(e))
    }
}

impl From<wasmer::InstantiationError> for Error {
    fn from(e: wasmer::InstantiationError) -> Self {
        Error::InstantiationError(Box::from(e))
    }
}

impl From<wasmer::ExportError> for Error {
    fn from(e: wasmer::ExportError) -> Self {
        Error::ExportError(Box::from(e))
    }
}

impl From<wasmer::RuntimeError> for Error {
    fn from(e: wasmer::RuntimeError) -> Self {
        Error::RuntimeError(e)
    }
}
