//! Sandboxed entity-definition scripts for Persistkit.
//!
//! A script declares models in a small language:
//!
//! ```text
//! model Product : Entity {
//!     table = "products";
//!     primary_key = "sku";
//!     sku: string = key_field();
//!     name: string = title_field(indexed: true);
//!     price: integer = 0;
//!     tags: string_array;
//! }
//! ```
//!
//! Scripts never touch the host. The only reachable names are `Entity`, the
//! field helpers, a handful of string/number primitives, and the script's
//! own bindings. Each run is bounded by [`ScriptLimits`] (source size, fuel,
//! value sizes, and a wall-clock deadline enforced from outside the worker
//! thread).

mod error;
mod interp;
mod lexer;
mod model;
mod parser;
mod sandbox;

pub use error::{ScriptError, ScriptResult};
pub use model::{ScriptModel, ScriptModelInfo, ScriptOutput, BASE_MODEL};
pub use sandbox::{ScriptLimits, ScriptSandbox};
