mod actors;
mod continuation;
mod error;
mod expr;
mod gc;
mod header;
mod heap;
mod interning;
mod interpreter;
mod object;
mod primitives;
mod promise;
mod tagged;
mod threads;
mod visitor;
mod vm;

pub use continuation::*;
pub use error::*;
pub use expr::*;
pub use gc::*;
pub use header::*;
pub use heap::*;
pub use interning::*;
pub use interpreter::*;
pub use object::*;
pub use primitives::*;
pub use tagged::*;
pub use threads::*;
pub use visitor::*;
pub use vm::*;
