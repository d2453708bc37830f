//! Set-Algebra Evaluator
//!
//! Resolves every operand of a [`SetExpr`] to a set of series names and
//! folds them strictly left to right:
//!
//! ```text
//! `a`, `two` - "c2"   ==   ((a ∪ two) − {c2})
//! ```
//!
//! Group operands read an `Arc` snapshot of the cached members, so a scan
//! running concurrently never shows up half-applied and never blocks the
//! query.

use crate::groups::GroupRegistry;
use crate::pattern::PatternCompiler;
use crate::query::ast::{Operand, SetExpr};
use crate::query::error::QueryResult;
use crate::query::parser::parse_set_expression;
use crate::series::SeriesUniverse;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Evaluates set expressions against the registry and universe
pub struct SetEvaluator {
    registry: Arc<GroupRegistry>,
    universe: Arc<dyn SeriesUniverse>,
    compiler: Arc<dyn PatternCompiler>,
}

impl SetEvaluator {
    pub fn new(registry: Arc<GroupRegistry>, universe: Arc<dyn SeriesUniverse>) -> Self {
        let compiler = registry.compiler();
        Self {
            registry,
            universe,
            compiler,
        }
    }

    /// Parse and evaluate an expression string
    pub async fn evaluate_str(&self, expression: &str) -> QueryResult<BTreeSet<String>> {
        let expr = parse_set_expression(expression)?;
        self.evaluate(&expr).await
    }

    /// Evaluate a parsed expression into a sorted, duplicate-free set
    pub async fn evaluate(&self, expr: &SetExpr) -> QueryResult<BTreeSet<String>> {
        let mut result = self.resolve(&expr.first).await?.as_ref().clone();

        for (operator, operand) in &expr.rest {
            let right = self.resolve(operand).await?;
            result = operator.apply(result, &right);
        }

        tracing::trace!(expression = %expr, series = result.len(), "Evaluated set expression");
        Ok(result)
    }

    async fn resolve(&self, operand: &Operand) -> QueryResult<Arc<BTreeSet<String>>> {
        match operand {
            Operand::Group(name) => Ok(self.registry.snapshot_members(name).await?),
            Operand::Series(name) => {
                let mut set = BTreeSet::new();
                if self.universe.contains(name) {
                    set.insert(name.clone());
                }
                Ok(Arc::new(set))
            }
            Operand::Pattern(raw) => {
                let matcher = self.compiler.compile(raw)?;
                let set = self
                    .universe
                    .snapshot()
                    .into_iter()
                    .filter(|series| matcher.matches(series))
                    .collect();
                Ok(Arc::new(set))
            }
        }
    }
}
