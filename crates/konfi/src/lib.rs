//! Konfi is a small, purely functional configuration language whose programs
//! evaluate to structured data suitable for emission as JSON or YAML.
//!
//! The pipeline: a [`scanner::Scanner`] turns UTF-8 source into tokens
//! (including interpolated format strings), a [`parser::Parser`] builds a
//! position-carrying AST, and [`eval::eval`] walks it lazily over
//! lexically-scoped environments with cycle detection. Records support
//! per-field unit-aware type annotations, the `@` operator merges records
//! recursively with right bias, and `load` pulls in other `.konfi` modules
//! with search-path resolution and load-cycle detection.
//!
//! ```
//! use konfi::{encode_as_json, eval, parse_expression, Ctx};
//!
//! let expr = parse_expression("{x: 3 * 10 + 1}").unwrap();
//! let val = eval(&expr, &Ctx::global()).unwrap();
//! assert_eq!(encode_as_json(&val).unwrap(), r#"{"x":31}"#);
//! ```

pub mod ast;
pub mod builtins;
pub mod encode;
pub mod errors;
pub mod eval;
pub mod modules;
pub mod parser;
pub mod scanner;
pub mod token;
pub mod types;
pub mod values;

pub use encode::{encode_as_json, encode_as_json_indent, encode_as_yaml};
pub use errors::{format_error, Error, EvalError, KonfiError, ParseError, ScanError, UserError};
pub use eval::{eval, eval_module, Ctx, LoadedModule};
pub use modules::{load_module, OsSources, Sources};
pub use parser::{parse_expression, parse_module, Parser};
pub use scanner::Scanner;
pub use token::{FileSet, Pos, Position};
pub use types::Typ;
pub use values::Val;
