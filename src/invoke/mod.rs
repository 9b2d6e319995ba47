//! Method and property invocation across the boundary
//!
//! A call resolves an overload by argument kinds (exact before widening),
//! checks arity before anything crosses, and hands the native entry one
//! contiguous run of cells: the receiver first for instance methods, then
//! the arguments. The entry answers with a success flag and one result
//! cell; a failed call's result is never interpreted.

mod binding;
mod call;
mod frame;

pub use binding::{BindingCache, BindingKey, KindSignature, MethodBinding};
pub use frame::CallFrame;

#[cfg(test)]
mod tests;
