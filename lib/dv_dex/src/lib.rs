//! Dex code data structures consumed by the register-type verifier.
//!
//! Parsing dex containers and decoding raw bytecode is left to other tools: this crate
//! only defines the already-decoded forms they hand over (types, method and field
//! references, structured instructions, method code and class definitions), plus the
//! [source positions](SourcePosition) attached to instructions.

mod addr;

pub mod classes;
pub mod code;
pub mod errors;
pub mod fields;
pub mod instrs;
pub mod methods;
pub mod position;
pub mod registers;
pub mod types;

pub use crate::addr::Addr;
pub use crate::position::SourcePosition;
pub use crate::types::DexType;
