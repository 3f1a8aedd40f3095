//! Instruction implementations, one file per instruction group.

mod arith;
mod call;
mod extern_call;
mod global;
mod load;

pub(crate) use arith::{exec_binary, exec_cmp_ref, exec_unary};
pub(crate) use call::{exec_call, exec_return};
pub(crate) use extern_call::exec_call_import;
pub(crate) use global::{exec_global_load_i32, exec_global_load_ref, exec_global_store_i32, exec_global_store_ref};
pub(crate) use load::{exec_const_i32, exec_const_ref_rodata, exec_const_ref_zero, exec_mov_i32, exec_mov_ref};
