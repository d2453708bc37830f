//! End-to-end group lifecycle through the engine facade

use serde_json::{json, Value};
use series_groups::{
    Config, GroupEngine, GroupError, MemoryUniverse, QueryError, StaticClusterView,
};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> Config {
    let mut config = Config::default();
    config.cluster.convergence_poll_ms = 20;
    config
}

fn start_engine(universe: &MemoryUniverse) -> GroupEngine {
    let engine = GroupEngine::new(
        &test_config(),
        Arc::new(universe.clone()),
        Arc::new(StaticClusterView::new(0, 1)),
    );
    engine.start();
    engine
}

async fn run(engine: &GroupEngine, command: &str) -> Value {
    let response = engine.execute(command).await.unwrap();
    assert!(
        engine.wait_converged(TIMEOUT).await,
        "not converged after {}",
        command
    );
    response.to_json()
}

async fn series(engine: &GroupEngine, filter: &str) -> Vec<String> {
    let response = run(engine, &format!("list series {}", filter)).await;
    response["series"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row[0].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_group_lifecycle() {
    let universe = MemoryUniverse::with_series(["a1", "a2", "b1", "b2"]);
    let engine = start_engine(&universe);

    assert_eq!(
        run(&engine, "create group `a` for /a.*/").await,
        json!({"success_msg": "Group 'a' is created successfully."})
    );
    assert_eq!(series(&engine, "`a`").await, vec!["a1", "a2"]);

    let added = universe.insert_batch(["c1", "c2"]);
    engine.on_series_inserted(&added).await;
    run(&engine, "create group `c` for /c.*/").await;
    assert_eq!(run(&engine, "count series `c`").await, json!({"series": 2}));

    run(&engine, "create group `one` for /.1/").await;
    assert_eq!(series(&engine, "`one`").await, vec!["a1", "b1", "c1"]);

    assert_eq!(
        run(&engine, "alter group `one` set name `two`").await,
        json!({"success_msg": "Successful updated group 'two'."})
    );
    assert_eq!(series(&engine, "`two`").await, vec!["a1", "b1", "c1"]);

    run(&engine, "alter group `two` set expression /.2/").await;
    assert_eq!(series(&engine, "`two`").await, vec!["a2", "b2", "c2"]);

    assert_eq!(series(&engine, "`a` & `two`").await, vec!["a2"]);
    assert_eq!(
        series(&engine, "`a` | `two`").await,
        vec!["a1", "a2", "b2", "c2"]
    );
    assert_eq!(series(&engine, "`a` ^ `two`").await, vec!["a1", "b2", "c2"]);
    assert_eq!(series(&engine, "`a` - `two`").await, vec!["a1"]);
    assert_eq!(
        series(&engine, "`a`, `two` - \"c2\"").await,
        vec!["a1", "a2", "b2"]
    );
    assert_eq!(series(&engine, "`a`, `two` & \"c2\"").await, vec!["c2"]);

    assert_eq!(run(&engine, "count groups").await, json!({"groups": 3}));
    assert_eq!(
        run(&engine, "list groups name, series").await,
        json!({
            "columns": ["name", "series"],
            "groups": [["a", 2], ["c", 2], ["two", 3]],
        })
    );

    assert_eq!(
        run(&engine, "drop group `c`").await,
        json!({"success_msg": "Group 'c' is dropped successfully."})
    );
    assert_eq!(run(&engine, "count groups").await, json!({"groups": 2}));

    engine.shutdown();
}

#[tokio::test]
async fn test_errors_leave_state_untouched() {
    let universe = MemoryUniverse::with_series(["a1", "b1"]);
    let engine = start_engine(&universe);
    run(&engine, "create group `a` for /a.*/").await;

    let err = engine
        .execute("create group `bad` for /a[/")
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Group(GroupError::Compile(_))));

    let err = engine
        .execute("create group `a` for /b.*/")
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Group(GroupError::DuplicateName(_))));

    let err = engine
        .execute("alter group `a` set expression /(/")
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Group(GroupError::Compile(_))));

    let err = engine.execute("count series `missing`").await.unwrap_err();
    assert!(matches!(err, QueryError::Group(GroupError::NotFound(_))));

    assert!(matches!(
        engine.execute("list series limit 0").await,
        Err(QueryError::InvalidLimit(0))
    ));
    assert!(matches!(
        engine.execute("create table `a`").await,
        Err(QueryError::Syntax { .. })
    ));

    assert_eq!(run(&engine, "count groups").await, json!({"groups": 1}));
    assert_eq!(series(&engine, "`a`").await, vec!["a1"]);
}

#[tokio::test]
async fn test_incremental_membership_under_load() {
    let universe = MemoryUniverse::with_series((0..500).map(|i| format!("host{}.cpu", i)));
    let engine = start_engine(&universe);
    run(&engine, "create group `even` for /host[0-9]*[02468]\\..*/").await;
    run(&engine, "create group `cpu` for /.*\\.cpu/").await;

    for batch in 0..10 {
        let names: Vec<String> = (0..50)
            .map(|i| format!("host{}.mem", 500 + batch * 50 + i))
            .collect();
        let added = universe.insert_batch(names);
        engine.on_series_inserted(&added).await;
    }
    assert!(engine.wait_converged(TIMEOUT).await);

    assert_eq!(run(&engine, "count series `cpu`").await, json!({"series": 500}));
    assert_eq!(run(&engine, "count series `even`").await, json!({"series": 500}));
    assert_eq!(
        run(&engine, "count series `even` - `cpu`").await,
        json!({"series": 250})
    );

    let removed = universe.remove_batch((0..100).map(|i| format!("host{}.cpu", i)));
    engine.on_series_removed(&removed).await;
    assert_eq!(run(&engine, "count series `cpu`").await, json!({"series": 400}));
    assert_eq!(run(&engine, "count series").await, json!({"series": 900}));
}

#[tokio::test]
async fn test_membership_summary_reports_groups() {
    let universe = MemoryUniverse::with_series(["a1", "a2", "b1"]);
    let engine = start_engine(&universe);
    run(&engine, "create group `a` for /a.*/").await;
    run(&engine, "create group `b` for \"b1\"").await;

    let summary = engine.membership_summary().await;
    assert!(summary.converged);
    assert_eq!(summary.series, 3);
    assert_eq!(summary.stale_groups, 0);

    let json = serde_json::to_value(&summary).unwrap();
    let counts: Vec<(String, u64)> = json["groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| (g["name"].as_str().unwrap().to_string(), g["series"].as_u64().unwrap()))
        .collect();
    assert_eq!(counts, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_and_rescans_lose_nothing() {
    let universe = MemoryUniverse::new();
    let engine = Arc::new(start_engine(&universe));
    run(&engine, "create group `all` for /s.*/").await;

    let mut writers = Vec::new();
    for task in 0..8 {
        let engine = Arc::clone(&engine);
        let universe = universe.clone();
        writers.push(tokio::spawn(async move {
            for batch in 0..25 {
                let names: Vec<String> = (0..50)
                    .map(|i| format!("s{}-{}-{}", task, batch, i))
                    .collect();
                let added = universe.insert_batch(names);
                engine.on_series_inserted(&added).await;
                tokio::task::yield_now().await;
            }
        }));
    }

    // both expressions cover every name, each change forces a full rescan
    for round in 0..10 {
        let expression = if round % 2 == 0 { "/s[0-9].*/" } else { "/s.*/" };
        engine
            .execute(&format!("alter group `all` set expression {}", expression))
            .await
            .unwrap();
        tokio::task::yield_now().await;
    }

    for writer in writers {
        writer.await.unwrap();
    }
    assert!(engine.wait_converged(TIMEOUT).await);

    let members = engine.registry().snapshot_members("all").await.unwrap();
    assert_eq!(members.len(), 8 * 25 * 50);
    assert_eq!(*members, universe.all_series());
}
