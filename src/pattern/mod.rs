//! Group Expression Patterns
//!
//! Compiles the expression attached to a group into a pure predicate over
//! series names:
//!
//! - **Compiler**: [`PatternCompiler`] trait and the default [`RegexCompiler`]
//! - **Error**: synchronous compile diagnostics
//!
//! # Example
//!
//! ```rust
//! use series_groups::pattern::{PatternCompiler, RegexCompiler};
//!
//! let matcher = RegexCompiler::new().compile("/a.*/").unwrap();
//! assert!(matcher.matches("a1"));
//! assert!(!matcher.matches("b1"));
//! ```

mod compiler;
mod error;

pub use compiler::{
    ExactMatcher, Matcher, Pattern, PatternCompiler, RegexCompiler, RegexMatcher, SeriesMatcher,
};
pub use error::{PatternError, PatternResult};
