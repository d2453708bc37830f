//! Command and set-expression AST
//!
//! Produced by the parser, consumed by the evaluator and executor.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Operand of a set expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// `` `name` `` - current members of a group
    Group(String),
    /// `"name"` - the series if it exists, else nothing
    Series(String),
    /// `/regex/flags` - every series the expression matches, kept raw
    Pattern(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Group(name) => write!(f, "`{}`", name.replace('`', "``")),
            Operand::Series(name) => write!(f, "\"{}\"", name.replace('"', "\"\"")),
            Operand::Pattern(raw) => write!(f, "{}", raw),
        }
    }
}

/// Binary set operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    /// `|` or `union`
    Union,
    /// `&` or `intersection`
    Intersection,
    /// `^` or `symmetric_difference`
    SymmetricDifference,
    /// `-` or `difference`
    Difference,
    /// `,` - union used to build a combined left operand
    Merge,
}

impl SetOperator {
    /// Combine the running result with the next operand
    pub fn apply(self, left: BTreeSet<String>, right: &BTreeSet<String>) -> BTreeSet<String> {
        match self {
            SetOperator::Union | SetOperator::Merge => {
                let mut out = left;
                out.extend(right.iter().cloned());
                out
            }
            SetOperator::Intersection => left.into_iter().filter(|s| right.contains(s)).collect(),
            SetOperator::SymmetricDifference => {
                left.symmetric_difference(right).cloned().collect()
            }
            SetOperator::Difference => left.into_iter().filter(|s| !right.contains(s)).collect(),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            SetOperator::Union => "|",
            SetOperator::Intersection => "&",
            SetOperator::SymmetricDifference => "^",
            SetOperator::Difference => "-",
            SetOperator::Merge => ",",
        }
    }
}

/// `operand (operator operand)*`, folded strictly left to right
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetExpr {
    pub first: Operand,
    pub rest: Vec<(SetOperator, Operand)>,
}

#[cfg(test)]
impl SetExpr {
    /// Expression with a single operand
    pub fn single(operand: Operand) -> Self {
        Self {
            first: operand,
            rest: Vec::new(),
        }
    }

    /// Append `operator operand`
    pub fn then(mut self, operator: SetOperator, operand: Operand) -> Self {
        self.rest.push((operator, operand));
        self
    }
}

impl fmt::Display for SetExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        for (operator, operand) in &self.rest {
            match operator {
                SetOperator::Merge => write!(f, ", {}", operand)?,
                _ => write!(f, " {} {}", operator.symbol(), operand)?,
            }
        }
        Ok(())
    }
}

/// Column of a group listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupColumn {
    Name,
    Series,
    Expression,
}

impl GroupColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupColumn::Name => "name",
            GroupColumn::Series => "series",
            GroupColumn::Expression => "expression",
        }
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `create group <name> for <expression>`
    CreateGroup { name: String, expression: String },
    /// `alter group <name> set name <new_name>`
    RenameGroup { name: String, new_name: String },
    /// `alter group <name> set expression <expression>`
    SetGroupExpression { name: String, expression: String },
    /// `drop group <name>`
    DropGroup { name: String },
    /// `count series [<set expression>]`
    CountSeries { filter: Option<SetExpr> },
    /// `count groups`
    CountGroups,
    /// `list groups [<column>, ...]`
    ListGroups { columns: Vec<GroupColumn> },
    /// `list series [<set expression>] [limit <n>]`
    ListSeries {
        filter: Option<SetExpr>,
        limit: Option<usize>,
    },
}
