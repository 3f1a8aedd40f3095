//! Native function registries and the host module seam.
//!
//! A native module exports an immutable table of bound functions, built once
//! and shared process-wide. Contexts hold per-instance [`HostModule`]s that
//! pair the shared table with owner state.

use std::sync::Arc;

use hashbrown::HashMap;
use ivm_common_core::{Register, RegisterList, VmError, VmResult};
use tracing::{debug, warn};

use crate::abi::{bind, NativeFn, NativeStatus, ParamList, RawThunk, Results, Thunk};
use crate::stack::{Frame, Stack};

/// One exported native function.
pub struct NativeFunction<Owner> {
    name: String,
    thunk: Thunk<Owner>,
    results: RegisterList,
}

impl<Owner> NativeFunction<Owner> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the results are moved out of after a successful call.
    pub fn results(&self) -> &[Register] {
        &self.results
    }

    #[inline]
    pub fn call(&self, owner: &mut Owner, stack: &mut Stack, frame: &mut Frame) -> VmResult<NativeStatus> {
        (self.thunk)(owner, stack, frame)
    }
}

impl<Owner> std::fmt::Debug for NativeFunction<Owner> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("results", &self.results)
            .finish()
    }
}

/// Immutable name → function table of one native module.
#[derive(Debug)]
pub struct NativeRegistry<Owner> {
    module: String,
    functions: Vec<NativeFunction<Owner>>,
    by_name: HashMap<String, u32>,
}

impl<Owner> NativeRegistry<Owner> {
    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn resolve(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, ordinal: u32) -> Option<&NativeFunction<Owner>> {
        self.functions.get(ordinal as usize)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NativeFunction<Owner>> {
        self.functions.iter()
    }
}

pub struct NativeRegistryBuilder<Owner> {
    module: String,
    functions: Vec<NativeFunction<Owner>>,
    by_name: HashMap<String, u32>,
    errors: Vec<VmError>,
}

impl<Owner: 'static> NativeRegistryBuilder<Owner> {
    pub fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            functions: Vec::new(),
            by_name: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Exports `f` under `name`, deriving its marshaling from the signature.
    pub fn export<Args, R, F>(mut self, name: &str, f: F) -> Self
    where
        Args: ParamList,
        R: Results,
        F: NativeFn<Owner, Args, R>,
    {
        match bind(f) {
            Ok((thunk, results)) => self.push(name, thunk, results),
            Err(err) => self.errors.push(VmError::invalid_argument(format!(
                "{}.{}: {}",
                self.module, name, err
            ))),
        }
        self
    }

    /// Exports a hand-written thunk with an explicit result-register list.
    pub fn export_raw(mut self, name: &str, f: RawThunk<Owner>, results: &[Register]) -> Self {
        self.push(name, Box::new(f), results.to_vec());
        self
    }

    fn push(&mut self, name: &str, thunk: Thunk<Owner>, results: RegisterList) {
        if self.by_name.contains_key(name) {
            self.errors.push(VmError::invalid_argument(format!(
                "{}.{} exported twice",
                self.module, name
            )));
            return;
        }
        self.by_name.insert(name.to_string(), self.functions.len() as u32);
        self.functions.push(NativeFunction {
            name: name.to_string(),
            thunk,
            results,
        });
    }

    /// Finishes the table. Reports the first registration error.
    pub fn build(self) -> VmResult<NativeRegistry<Owner>> {
        let mut errors = self.errors.into_iter();
        if let Some(first) = errors.next() {
            for err in errors {
                warn!(module = %self.module, %err, "native registration error");
            }
            return Err(first);
        }
        debug!(module = %self.module, functions = self.functions.len(), "native registry built");
        Ok(NativeRegistry {
            module: self.module,
            functions: self.functions,
            by_name: self.by_name,
        })
    }
}

// =============================================================================
// Host modules
// =============================================================================

/// Type-erased native module instance owned by a context.
pub trait HostModule: Send {
    fn name(&self) -> &str;

    /// Ordinal of an exported function.
    fn lookup(&self, function: &str) -> Option<u32>;

    fn function_name(&self, ordinal: u32) -> Option<&str>;

    fn result_registers(&self, ordinal: u32) -> Option<&[Register]>;

    fn call(&mut self, ordinal: u32, stack: &mut Stack, frame: &mut Frame) -> VmResult<NativeStatus>;
}

/// Shared registry plus per-context owner state.
pub struct NativeModule<Owner> {
    registry: Arc<NativeRegistry<Owner>>,
    owner: Owner,
}

impl<Owner> NativeModule<Owner> {
    pub fn new(registry: Arc<NativeRegistry<Owner>>, owner: Owner) -> Self {
        Self { registry, owner }
    }

    pub fn registry(&self) -> &NativeRegistry<Owner> {
        &self.registry
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn owner_mut(&mut self) -> &mut Owner {
        &mut self.owner
    }
}

impl<Owner: Send + 'static> HostModule for NativeModule<Owner> {
    fn name(&self) -> &str {
        self.registry.module_name()
    }

    fn lookup(&self, function: &str) -> Option<u32> {
        self.registry.resolve(function)
    }

    fn function_name(&self, ordinal: u32) -> Option<&str> {
        self.registry.get(ordinal).map(NativeFunction::name)
    }

    fn result_registers(&self, ordinal: u32) -> Option<&[Register]> {
        self.registry.get(ordinal).map(NativeFunction::results)
    }

    fn call(&mut self, ordinal: u32, stack: &mut Stack, frame: &mut Frame) -> VmResult<NativeStatus> {
        let function = self.registry.get(ordinal).ok_or_else(|| {
            VmError::unavailable(format!("{} has no function {}", self.registry.module_name(), ordinal))
        })?;
        function.call(&mut self.owner, stack, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    fn echo(_: &mut Echo, x: i32) -> VmResult<i32> {
        Ok(x)
    }

    fn raw_zero(_: &mut Echo, _: &mut Stack, frame: &mut Frame) -> VmResult<NativeStatus> {
        frame.registers.set_i32(0, 0)?;
        Ok(NativeStatus::Complete)
    }

    #[test]
    fn test_resolve_and_call() {
        let registry = NativeRegistryBuilder::new("echo")
            .export("id", echo)
            .export_raw("zero", raw_zero, &[Register::i32(0)])
            .build()
            .unwrap();
        assert_eq!(registry.resolve("id"), Some(0));
        assert_eq!(registry.resolve("zero"), Some(1));
        assert_eq!(registry.resolve("missing"), None);

        let mut module = NativeModule::new(Arc::new(registry), Echo);
        let mut frame = Frame::native(1, 0);
        frame.registers.set_i32(0, 42).unwrap();
        let mut stack = Stack::new(1, 0);
        assert_eq!(module.call(0, &mut stack, &mut frame), Ok(NativeStatus::Complete));
        assert_eq!(frame.registers.i32(0), Ok(42));
        assert_eq!(module.function_name(1), Some("zero"));
        assert!(module.call(5, &mut stack, &mut frame).is_err());
    }

    #[test]
    fn test_duplicate_export_rejected() {
        let result = NativeRegistryBuilder::new("echo")
            .export("id", echo)
            .export("id", echo)
            .build();
        assert!(matches!(result, Err(VmError::InvalidArgument(_))));
    }
}
