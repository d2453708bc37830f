//! Group Command Language
//!
//! Textual command surface over groups and series:
//!
//! - **AST**: commands and set expressions
//! - **Parser**: nom-based command and set-expression parser
//! - **Evaluator**: left-to-right set algebra over group snapshots
//! - **Executor**: runs commands and shapes JSON responses
//!
//! # Examples
//!
//! ```text
//! create group `a` for /a.*/
//! alter group `one` set name "two"
//! count series `c`
//! list groups series
//! list series `a`, `two` - "c2"
//! ```
//!
//! ```rust,ignore
//! let response = executor.execute_str("list series `a` & `two`").await?;
//! println!("{}", response.to_json());
//! ```

mod ast;
mod error;
mod evaluator;
mod executor;
mod parser;

pub use ast::{Command, GroupColumn, Operand, SetExpr, SetOperator};
pub use error::{QueryError, QueryResult};
pub use evaluator::SetEvaluator;
pub use executor::{CommandExecutor, CommandResponse};
pub use parser::{parse_command, parse_set_expression};
