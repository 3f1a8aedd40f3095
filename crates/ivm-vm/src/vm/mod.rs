//! Execution contexts.
//!
//! A `Context` instantiates one module: it owns the module state, the host
//! module instances imports are linked against, and the configuration.
//! Each `invoke` runs on a fresh stack; a yielded stack travels inside a
//! [`Continuation`] until it is resumed or dropped.

mod dispatch;
mod types;

pub use types::{Continuation, Execution, Value, VmConfig};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ivm_common_core::{VmError, VmResult};
use ivm_runtime::{Frame, HostModule, Stack};
use tracing::{debug, warn};

use crate::module::Module;
use crate::state::ModuleState;
use dispatch::Flow;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

pub struct Context {
    id: u64,
    module: Arc<Module>,
    state: ModuleState,
    hosts: Vec<Box<dyn HostModule>>,
    config: VmConfig,
}

impl Context {
    /// Instantiates `module` and links its imports against `hosts`.
    pub fn new(module: Arc<Module>, hosts: Vec<Box<dyn HostModule>>, config: VmConfig) -> VmResult<Self> {
        let mut state = ModuleState::new(&module);
        state.link(&module, &hosts)?;
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(context = id, module = module.name(), hosts = hosts.len(), "context created");
        Ok(Self {
            id,
            module,
            state,
            hosts,
            config,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn state(&self) -> &ModuleState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ModuleState {
        &mut self.state
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn host(&self, name: &str) -> Option<&dyn HostModule> {
        self.hosts.iter().find(|h| h.name() == name).map(|h| h.as_ref())
    }

    /// Calls an exported function. Ref arguments are retained.
    pub fn invoke(&mut self, export: &str, args: &[Value]) -> VmResult<Execution> {
        let function = self
            .module
            .find_export(export)
            .ok_or_else(|| VmError::unavailable(format!("no export `{}`", export)))?;
        let desc = self.module.function(function)?;
        let mut frame = Frame::new(
            function,
            desc.i32_register_count as usize,
            desc.ref_register_count as usize,
        );
        let (mut next_i32, mut next_ref) = (0, 0);
        for arg in args {
            match arg {
                Value::I32(v) => {
                    frame.registers.set_i32(next_i32, *v)?;
                    next_i32 += 1;
                }
                Value::Ref(r) => {
                    frame.registers.set_ref(next_ref, r.retain())?;
                    next_ref += 1;
                }
            }
        }

        let mut stack = Stack::new(self.config.max_stack_depth, self.id);
        stack.push_frame(frame)?;
        debug!(context = self.id, export, function, "invoke");
        self.execute(stack)
    }

    /// Continues a yielded execution at its saved cursor.
    pub fn resume(&mut self, continuation: Continuation) -> VmResult<Execution> {
        let stack = continuation.stack;
        if stack.owner() != self.id {
            return Err(VmError::invalid_argument(format!(
                "continuation of context {} resumed on context {}",
                stack.owner(),
                self.id
            )));
        }
        debug!(context = self.id, depth = stack.depth(), "resume");
        self.execute(stack)
    }

    fn execute(&mut self, mut stack: Stack) -> VmResult<Execution> {
        match dispatch::run(&self.module, &mut self.state, &mut self.hosts, &mut stack) {
            Ok(Flow::Returned(values)) => Ok(Execution::Returned(values)),
            Ok(Flow::Yielded) => {
                debug!(context = self.id, depth = stack.depth(), "yielded");
                Ok(Execution::Yielded(Continuation { stack }))
            }
            Err(err) => {
                warn!(context = self.id, depth = stack.depth(), %err, "execution failed, unwinding");
                stack.unwind();
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("module", &self.module.name())
            .field("hosts", &self.hosts.iter().map(|h| h.name()).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}
