// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use wasmer::wasmparser::Operator;
use wasmer::{CompilerConfig, Module, TypedFunction};
use wasmer_compiler_singlepass::Singlepass;
use wasmer_middlewares::metering::{get_remaining_points, set_remaining_points, MeteringPoints};
use wasmer_middlewares::Metering;

use crate::error::Error;
use crate::imports::{hook_imports, HostEnv};

/// Engine-level cap on executed instructions. The count is recorded in the
/// execution metadata; no wall-clock timeout exists.
pub(crate) const INSTRUCTION_LIMIT: u64 = 10_000_000;

fn cost_function(_op: &Operator) -> u64 {
    1
}

fn new_store() -> wasmer::Store {
    let metering = Arc::new(Metering::new(INSTRUCTION_LIMIT, cost_function));

    let mut compiler_config = Singlepass::default();
    compiler_config.push_middleware(metering);

    wasmer::Store::new(compiler_config)
}

/// A compiled, instantiated guest with the host imports attached.
pub(crate) struct WrappedInstance {
    store: wasmer::Store,
    instance: wasmer::Instance,
}

impl WrappedInstance {
    pub fn new(bytecode: &[u8], env: HostEnv) -> Result<Self, Error> {
        let mut store = new_store();

        let fenv = wasmer::FunctionEnv::new(&mut store, env);
        let imports = hook_imports(&mut store, &fenv);

        let module = Module::new(&store, bytecode)?;
        let instance = wasmer::Instance::new(&mut store, &module, &imports)?;

        // host functions read guest memory through the env
        let memory = instance.exports.get_memory("memory")?.clone();
        fenv.as_mut(&mut store).memory = Some(memory);

        Ok(WrappedInstance { store, instance })
    }

    /// Run a guest entry point (`hook` or `cbak`) with a fresh point
    /// budget. The integer argument is reserved.
    pub fn call_entry(&mut self, export: &str) -> Result<i64, Error> {
        let entry: TypedFunction<i64, i64> = self
            .instance
            .exports
            .get_typed_function(&self.store, export)?;

        set_remaining_points(&mut self.store, &self.instance, INSTRUCTION_LIMIT);
        entry.call(&mut self.store, 0).map_err(|e| self.map_call_err(e))
    }

    /// Instructions consumed so far, from the metering middleware.
    pub fn spent_points(&mut self) -> u64 {
        match get_remaining_points(&mut self.store, &self.instance) {
            MeteringPoints::Remaining(points) => INSTRUCTION_LIMIT - points,
            MeteringPoints::Exhausted => INSTRUCTION_LIMIT,
        }
    }

    fn map_call_err(&mut self, err: wasmer::RuntimeError) -> Error {
        if matches!(
            get_remaining_points(&mut self.store, &self.instance),
            MeteringPoints::Exhausted
        ) {
            return Error::OutOfPoints;
        }
        err.into()
    }
}
