//! Command Executor
//!
//! Runs parsed commands against the group registry and series universe and
//! shapes the response objects:
//!
//! ```text
//! text → parse_command → Command → registry / evaluator → CommandResponse (JSON)
//! ```

use crate::groups::GroupRegistry;
use crate::query::ast::{Command, GroupColumn, SetExpr};
use crate::query::error::{QueryError, QueryResult};
use crate::query::evaluator::SetEvaluator;
use crate::query::parser::parse_command;
use crate::series::SeriesUniverse;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// Response of a successfully executed command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResponse {
    /// Result of a create, alter or drop
    Success { success_msg: String },
    /// `count series`
    SeriesCount { series: usize },
    /// `count groups`
    GroupCount { groups: usize },
    /// `list groups`
    GroupList {
        columns: Vec<String>,
        groups: Vec<Vec<Value>>,
    },
    /// `list series`
    SeriesList {
        columns: Vec<String>,
        series: Vec<Vec<String>>,
    },
}

impl CommandResponse {
    fn success(message: String) -> Self {
        CommandResponse::Success {
            success_msg: message,
        }
    }

    /// Response as a JSON value
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Executes commands
pub struct CommandExecutor {
    registry: Arc<GroupRegistry>,
    universe: Arc<dyn SeriesUniverse>,
    evaluator: SetEvaluator,
    /// Row cap for `list series` without an explicit limit
    list_limit: usize,
}

impl CommandExecutor {
    pub fn new(
        registry: Arc<GroupRegistry>,
        universe: Arc<dyn SeriesUniverse>,
        list_limit: usize,
    ) -> Self {
        let evaluator = SetEvaluator::new(Arc::clone(&registry), Arc::clone(&universe));
        Self {
            registry,
            universe,
            evaluator,
            list_limit,
        }
    }

    /// Execute a command string (parses and executes)
    pub async fn execute_str(&self, command: &str) -> QueryResult<CommandResponse> {
        let command = parse_command(command)?;
        self.execute(command).await
    }

    /// Execute a parsed command
    pub async fn execute(&self, command: Command) -> QueryResult<CommandResponse> {
        let start = Instant::now();
        tracing::debug!(command = ?command, "Executing command");

        let response = match command {
            Command::CreateGroup { name, expression } => {
                self.registry.create(&name, &expression).await?;
                CommandResponse::success(format!("Group '{}' is created successfully.", name))
            }
            Command::RenameGroup { name, new_name } => {
                self.registry.rename(&name, &new_name).await?;
                CommandResponse::success(format!("Successful updated group '{}'.", new_name))
            }
            Command::SetGroupExpression { name, expression } => {
                self.registry.set_expression(&name, &expression).await?;
                CommandResponse::success(format!("Successful updated group '{}'.", name))
            }
            Command::DropGroup { name } => {
                self.registry.drop_group(&name).await?;
                CommandResponse::success(format!("Group '{}' is dropped successfully.", name))
            }
            Command::CountSeries { filter } => {
                let series = match filter {
                    Some(expr) => self.evaluator.evaluate(&expr).await?.len(),
                    None => self.universe.len(),
                };
                CommandResponse::SeriesCount { series }
            }
            Command::CountGroups => CommandResponse::GroupCount {
                groups: self.registry.count().await,
            },
            Command::ListGroups { columns } => self.list_groups(&columns).await,
            Command::ListSeries { filter, limit } => self.list_series(filter.as_ref(), limit).await?,
        };

        tracing::debug!(elapsed_us = start.elapsed().as_micros() as u64, "Command executed");
        Ok(response)
    }

    async fn list_groups(&self, columns: &[GroupColumn]) -> CommandResponse {
        let groups = self
            .registry
            .list_all()
            .await
            .into_iter()
            .map(|group| {
                columns
                    .iter()
                    .map(|column| match column {
                        GroupColumn::Name => Value::from(group.name.clone()),
                        GroupColumn::Series => Value::from(group.series),
                        GroupColumn::Expression => Value::from(group.expression.clone()),
                    })
                    .collect()
            })
            .collect();

        CommandResponse::GroupList {
            columns: columns.iter().map(|c| c.as_str().to_string()).collect(),
            groups,
        }
    }

    async fn list_series(
        &self,
        filter: Option<&SetExpr>,
        limit: Option<usize>,
    ) -> QueryResult<CommandResponse> {
        let limit = match limit {
            Some(0) => return Err(QueryError::InvalidLimit(0)),
            Some(limit) => limit,
            None => self.list_limit,
        };

        let names: BTreeSet<String> = match filter {
            Some(expr) => self.evaluator.evaluate(expr).await?,
            None => self.universe.snapshot().into_iter().collect(),
        };

        Ok(CommandResponse::SeriesList {
            columns: vec!["name".to_string()],
            series: names.into_iter().take(limit).map(|name| vec![name]).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::{GroupError, MembershipMaintainer, ScanQueue, ScanReceiver};
    use crate::pattern::{PatternError, RegexCompiler};
    use crate::series::MemoryUniverse;
    use serde_json::json;

    struct Fixture {
        universe: MemoryUniverse,
        executor: CommandExecutor,
        maintainer: MembershipMaintainer,
        jobs: ScanReceiver,
    }

    impl Fixture {
        fn new(series: &[&str]) -> Self {
            let universe = MemoryUniverse::with_series(series.iter().copied());
            let (queue, jobs) = ScanQueue::channel();
            let registry = Arc::new(GroupRegistry::new(
                Arc::new(RegexCompiler::new()),
                queue.clone(),
                16,
            ));
            let maintainer = MembershipMaintainer::new(
                Arc::clone(&registry),
                Arc::new(universe.clone()),
                queue,
                1,
            );
            let executor = CommandExecutor::new(registry, Arc::new(universe.clone()), 100);
            Self {
                universe,
                executor,
                maintainer,
                jobs,
            }
        }

        async fn run(&mut self, command: &str) -> Value {
            let response = self.executor.execute_str(command).await.unwrap();
            self.maintainer.drain(&mut self.jobs).await;
            response.to_json()
        }

        async fn insert(&self, names: &[&str]) {
            let added = self.universe.insert_batch(names.iter().copied());
            self.maintainer.on_inserted(&added).await;
        }
    }

    #[tokio::test]
    async fn test_group_lifecycle_scenario() {
        let mut fx = Fixture::new(&["a1", "a2", "b1", "b2"]);

        assert_eq!(
            fx.run("create group `a` for /a.*/").await,
            json!({"success_msg": "Group 'a' is created successfully."})
        );
        assert_eq!(fx.run("count series `a`").await, json!({"series": 2}));

        fx.insert(&["c1", "c2"]).await;
        fx.run("create group `c` for /c.*/").await;
        assert_eq!(fx.run("count series `c`").await, json!({"series": 2}));

        fx.run("create group `one` for /.1/").await;
        assert_eq!(
            fx.run("list series `one`").await,
            json!({"columns": ["name"], "series": [["a1"], ["b1"], ["c1"]]})
        );

        assert_eq!(
            fx.run("alter group `one` set name \"two\"").await,
            json!({"success_msg": "Successful updated group 'two'."})
        );
        assert_eq!(
            fx.run("alter group `two` set expression /.2/").await,
            json!({"success_msg": "Successful updated group 'two'."})
        );
        assert_eq!(fx.run("list groups series").await, json!({"columns": ["series"], "groups": [[2], [2], [3]]}));

        let cases = [
            ("`a` & `two`", json!([["a2"]])),
            ("`a` | `two`", json!([["a1"], ["a2"], ["b2"], ["c2"]])),
            ("`a` ^ `two`", json!([["a1"], ["b2"], ["c2"]])),
            ("`a` - `two`", json!([["a1"]])),
            ("`a`, `two` - \"c2\"", json!([["a1"], ["a2"], ["b2"]])),
            ("`a`, `two` & \"c2\"", json!([["c2"]])),
        ];
        for (expr, expected) in cases {
            let response = fx.run(&format!("list series {}", expr)).await;
            assert_eq!(response["series"], expected, "list series {}", expr);
        }
    }

    #[tokio::test]
    async fn test_invalid_expression_creates_nothing() {
        let fx = Fixture::new(&["a1"]);
        let err = fx
            .executor
            .execute_str("create group `bad` for /(/")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueryError::Group(GroupError::Compile(PatternError::Regex { .. }))
        ));
        assert!(err.to_string().starts_with("Cannot compile regular expression"));
        assert_eq!(
            fx.executor.execute_str("count groups").await.unwrap(),
            CommandResponse::GroupCount { groups: 0 }
        );
    }

    #[tokio::test]
    async fn test_duplicate_and_missing_groups() {
        let mut fx = Fixture::new(&["a1"]);
        fx.run("create group `a` for /a.*/").await;

        let err = fx
            .executor
            .execute_str("create group `a` for /b.*/")
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::Group(GroupError::DuplicateName("a".to_string())));

        let err = fx.executor.execute_str("count series `nope`").await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot find group: 'nope'");
    }

    #[tokio::test]
    async fn test_list_groups_columns_and_drop() {
        let mut fx = Fixture::new(&["a1", "a2", "b1"]);
        fx.run("create group `b` for /b.*/").await;
        fx.run("create group `a` for /a.*/").await;

        assert_eq!(
            fx.run("list groups name, series, expression").await,
            json!({
                "columns": ["name", "series", "expression"],
                "groups": [["a", 2, "/a.*/"], ["b", 1, "/b.*/"]]
            })
        );

        assert_eq!(
            fx.run("drop group `a`").await,
            json!({"success_msg": "Group 'a' is dropped successfully."})
        );
        assert_eq!(fx.run("count groups").await, json!({"groups": 1}));
    }

    #[tokio::test]
    async fn test_list_series_limit() {
        let mut fx = Fixture::new(&["s3", "s1", "s2"]);
        assert_eq!(
            fx.run("list series limit 2").await,
            json!({"columns": ["name"], "series": [["s1"], ["s2"]]})
        );
        assert_eq!(fx.run("count series").await, json!({"series": 3}));

        let err = fx.executor.execute_str("list series limit 0").await.unwrap_err();
        assert_eq!(err, QueryError::InvalidLimit(0));
    }
}
