//! Integration tests for the task engine.
//!
//! These tests drive the public engine API against in-memory and
//! file-backed stores. Tests are organized by functionality.

use std::sync::Arc;
use std::time::Duration;
use task_store_engine::config::EngineConfig;
use task_store_engine::consistency::FindingCode;
use task_store_engine::engine::{BatchItem, BatchOp, DeleteMode, TaskEngine, TaskQuery, WriteOptions};
use task_store_engine::error::ErrorCode;
use task_store_engine::search::SearchTier;
use task_store_engine::store::MemoryStore;
use task_store_engine::sync::{IntentStatus, NewIntent, ToolExecution};
use task_store_engine::types::{NewTask, Priority, TaskPatch, TaskStatus};
use tempfile::TempDir;

/// Helper to create a fresh in-memory engine.
async fn setup_engine() -> TaskEngine {
    TaskEngine::in_memory(EngineConfig::default())
        .await
        .expect("Failed to create in-memory engine")
}

fn new_task(id: &str, title: &str) -> NewTask {
    NewTask {
        id: Some(id.to_string()),
        ..NewTask::titled(title)
    }
}

mod write_tests {
    use super::*;

    #[tokio::test]
    async fn create_get_update_delete() {
        let engine = setup_engine().await;

        let created = engine
            .create_task(NewTask {
                priority: Some(Priority::High),
                tags: vec!["backend".into()],
                ..new_task("t1", "Write docs")
            })
            .await
            .expect("Failed to create task");
        assert_eq!(created.status, TaskStatus::Pending);
        assert_eq!(created.version, 1);
        assert_eq!(engine.revision(), 1);

        let updated = engine
            .update_task(
                "t1",
                TaskPatch {
                    status: Some(TaskStatus::InProgress),
                    note: Some("picked up".into()),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect("Failed to update task");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.change_log.last().unwrap().note.as_deref(), Some("picked up"));
        assert_eq!(engine.get_task("t1").unwrap().status, TaskStatus::InProgress);

        let snapshot = engine.snapshot();
        let holders: Vec<_> = snapshot
            .sections
            .iter()
            .filter(|s| s.tasks.iter().any(|id| id == "t1"))
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(holders, vec!["in_progress"]);

        engine
            .delete_task("t1", DeleteMode::Restrict)
            .await
            .expect("Failed to delete task");
        assert_eq!(engine.get_task("t1").unwrap_err().code, ErrorCode::TaskNotFound);
        assert_eq!(engine.snapshot().metadata.total_tasks, 0);
        assert_eq!(engine.revision(), 3);
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let engine = setup_engine().await;
        let a = engine.create_task(NewTask::titled("a")).await.unwrap();
        let b = engine.create_task(NewTask::titled("b")).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn noop_update_does_not_commit() {
        let engine = setup_engine().await;
        engine.create_task(new_task("t1", "Same")).await.unwrap();

        engine
            .update_task(
                "t1",
                TaskPatch {
                    title: Some("Same".into()),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(engine.revision(), 1);
    }

    #[tokio::test]
    async fn metadata_tracks_completion() {
        let engine = setup_engine().await;
        engine.create_task(new_task("a", "A")).await.unwrap();
        engine.create_task(new_task("b", "B")).await.unwrap();
        engine
            .update_task(
                "a",
                TaskPatch {
                    status: Some(TaskStatus::Completed),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.metadata.total_tasks, 2);
        assert_eq!(snapshot.metadata.completed_tasks, 1);
        assert!(snapshot.tasks["a"].completed_at.is_some());
    }

    #[tokio::test]
    async fn restrict_delete_refuses_referenced_task() {
        let engine = setup_engine().await;
        engine.create_task(new_task("base", "Base")).await.unwrap();
        engine
            .create_task(NewTask {
                dependencies: vec!["base".into()],
                ..new_task("top", "Top")
            })
            .await
            .unwrap();
        assert_eq!(engine.get_task("base").unwrap().blocked_by, vec!["top"]);

        let err = engine
            .delete_task("base", DeleteMode::Restrict)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyReferenced);
        assert!(engine.get_task("base").is_ok());

        engine
            .delete_task("base", DeleteMode::Cascade)
            .await
            .expect("Cascade delete should succeed");
        let top = engine.get_task("top").unwrap();
        assert!(top.dependencies.is_empty());
        assert!(engine.validate().is_valid);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing_by_default() {
        let engine = setup_engine().await;
        let ops = vec![
            BatchOp::Create {
                task: new_task("a", "A"),
            },
            BatchOp::Update {
                id: "ghost".into(),
                patch: TaskPatch::default(),
            },
        ];

        let err = engine.batch(ops, WriteOptions::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
        assert!(engine.snapshot().tasks.is_empty());
        assert_eq!(engine.revision(), 0);
    }

    #[tokio::test]
    async fn batch_continue_on_error_commits_the_rest() {
        let engine = setup_engine().await;
        let ops = vec![
            BatchOp::Create {
                task: new_task("a", "A"),
            },
            BatchOp::Create {
                task: new_task("a", "Duplicate"),
            },
            BatchOp::Create {
                task: new_task("b", "B"),
            },
        ];

        let outcome = engine
            .batch(ops, WriteOptions::default().continue_on_error())
            .await
            .expect("Batch should succeed");
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 1);
        match &outcome.items[1] {
            BatchItem::Failed { index, error } => {
                assert_eq!(*index, 1);
                assert_eq!(error.code, ErrorCode::AlreadyExists);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(engine.snapshot().tasks.len(), 2);
        assert_eq!(engine.revision(), 1);
    }

    #[tokio::test]
    async fn operation_history_is_bounded() {
        let mut config = EngineConfig::default();
        config.consistency.history_limit = 3;
        let engine = TaskEngine::in_memory(config).await.unwrap();

        for i in 0..5 {
            engine
                .create_task(new_task(&format!("t{}", i), "Task"))
                .await
                .unwrap();
        }
        let history = &engine.snapshot().operation_history;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].task_ids, vec!["t2"]);
        assert_eq!(history[2].operation, "create_task");
    }
}

mod integrity_tests {
    use super::*;

    async fn make_cycle(engine: &TaskEngine) -> Result<(), task_store_engine::error::EngineError> {
        engine.create_task(new_task("a", "A")).await?;
        engine
            .create_task(NewTask {
                dependencies: vec!["a".into()],
                ..new_task("b", "B")
            })
            .await?;
        engine
            .update_task(
                "a",
                TaskPatch {
                    dependencies: Some(vec!["b".into()]),
                    ..TaskPatch::default()
                },
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn default_mode_reports_new_cycles() {
        let engine = setup_engine().await;
        make_cycle(&engine).await.expect("Cycle is committed in default mode");

        let report = engine.validate();
        assert!(!report.is_valid);
        assert_eq!(report.errors_with(FindingCode::CircularDependency).len(), 1);
    }

    #[tokio::test]
    async fn strict_mode_rejects_new_cycles() {
        let mut config = EngineConfig::default();
        config.consistency.strict = true;
        let engine = TaskEngine::in_memory(config).await.unwrap();

        let err = make_cycle(&engine).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::IntegrityViolation);
        assert!(engine.get_task("a").unwrap().dependencies.is_empty());
        assert!(engine.validate().is_valid);
    }

    #[tokio::test]
    async fn check_on_clean_store_changes_nothing() {
        let engine = setup_engine().await;
        engine.create_task(new_task("a", "A")).await.unwrap();

        let report = engine.check_consistency(true).await.unwrap();
        assert!(report.is_valid);
        assert!(report.fixed_issues.is_empty());
        assert_eq!(engine.revision(), 1);
        assert!(engine.quick_check());
    }
}

mod persistence_tests {
    use super::*;

    fn file_config(dir: &TempDir) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.store.path = dir.path().join("store/tasks.json");
        config
    }

    #[tokio::test]
    async fn reopen_restores_tasks_and_intents() {
        let temp = TempDir::new().unwrap();
        let intent_id;
        {
            let engine = TaskEngine::open(file_config(&temp)).await.unwrap();
            engine.create_task(new_task("t1", "Persisted")).await.unwrap();
            intent_id = engine
                .create_intent(NewIntent {
                    human_request: "ship it".into(),
                    ..NewIntent::default()
                })
                .await
                .unwrap()
                .intent_id;
        }

        let engine = TaskEngine::open(file_config(&temp)).await.unwrap();
        assert_eq!(engine.get_task("t1").unwrap().title, "Persisted");
        assert_eq!(engine.revision(), 1);
        assert_eq!(engine.get_intent(&intent_id).unwrap().human_request, "ship it");
    }

    #[tokio::test]
    async fn undecodable_entry_survives_unrelated_commit() {
        let raw = serde_json::json!({
            "id": "b", "title": "B", "status": "pending", "priority": "someday"
        });
        let document = serde_json::json!({
            "tasks": {
                "a": { "id": "a", "title": "A", "status": "pending", "priority": "urgent" },
                "b": raw.clone()
            },
            "sections": [{ "id": "pending", "tasks": ["a", "b"] }],
            "metadata": { "totalTasks": 1, "completedTasks": 0 }
        });
        let store = MemoryStore::with_contents(&document.to_string());
        let engine = TaskEngine::with_backend(EngineConfig::default(), Arc::new(store.clone()))
            .await
            .expect("Failed to open engine");
        assert_eq!(engine.get_task("a").unwrap().priority, Priority::Critical);

        engine
            .create_task(new_task("unrelated", "Unrelated"))
            .await
            .expect("Commit should tolerate the kept entry");

        let saved: serde_json::Value =
            serde_json::from_str(&store.contents().expect("Failed to save")).unwrap();
        assert_eq!(saved["tasks"]["b"], raw);
        let pending = saved["sections"][0]["tasks"].as_array().unwrap();
        assert!(pending.contains(&serde_json::json!("b")));
        assert_eq!(engine.validate().errors_with(FindingCode::InvalidTask).len(), 1);

        let err = engine.create_task(new_task("b", "Shadow")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyExists);
    }

    #[tokio::test]
    async fn corrupted_file_opens_empty() {
        let temp = TempDir::new().unwrap();
        let config = file_config(&temp);
        std::fs::create_dir_all(config.store.path.parent().unwrap()).unwrap();
        std::fs::write(&config.store.path, "{ not json").unwrap();

        let engine = TaskEngine::open(config).await.expect("Corrupt store should still open");
        assert!(engine.snapshot().tasks.is_empty());
        engine.create_task(new_task("t1", "Fresh")).await.unwrap();
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_snapshot() {
        let store = MemoryStore::new();
        let engine = TaskEngine::with_backend(EngineConfig::default(), Arc::new(store.clone()))
            .await
            .unwrap();
        engine.create_task(new_task("t1", "Kept")).await.unwrap();

        store.set_fail_saves(true);
        let err = engine.create_task(new_task("t2", "Lost")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::StoreError);
        assert!(engine.get_task("t2").is_err());
        assert_eq!(engine.revision(), 1);

        store.set_fail_saves(false);
        engine
            .create_task(new_task("t2", "Retried"))
            .await
            .expect("Engine stays usable after a failed save");
        assert_eq!(engine.revision(), 2);
        assert_eq!(store.save_count(), 2);
    }
}

mod read_tests {
    use super::*;

    #[tokio::test]
    async fn queries_are_cached_per_revision() {
        let engine = setup_engine().await;
        engine.create_task(new_task("a", "Alpha")).await.unwrap();

        let query = TaskQuery::new().status(TaskStatus::Pending);
        assert_eq!(engine.query(&query).total, 1);
        assert_eq!(engine.query(&query).total, 1);
        assert_eq!(engine.cache_stats().hits, 1);

        engine.create_task(new_task("b", "Bravo")).await.unwrap();
        let fresh = engine.query(&query);
        assert_eq!(fresh.total, 2);
        assert_eq!(fresh.revision, 2);
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn stale_cached_queries_are_recomputed() {
        let mut config = EngineConfig::default();
        config.cache.stale_after_ms = 10;
        let engine = TaskEngine::in_memory(config).await.unwrap();

        let due = chrono::Utc::now() + chrono::Duration::milliseconds(200);
        engine
            .create_task(NewTask {
                due_date: Some(due.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
                ..new_task("t1", "Due soon")
            })
            .await
            .unwrap();

        let overdue = TaskQuery {
            overdue_only: true,
            ..TaskQuery::new()
        };
        assert_eq!(engine.query(&overdue).total, 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        // Same revision, but the cached result has outlived its window
        assert_eq!(engine.revision(), 1);
        assert_eq!(engine.query(&overdue).total, 1);
    }

    #[tokio::test]
    async fn resolve_partial_ids() {
        let engine = setup_engine().await;
        for id in ["deploy-api", "deploy-web", "docs-site"] {
            engine.create_task(new_task(id, id)).await.unwrap();
        }

        let resolved = engine.resolve_task("deploy-a", None).unwrap();
        assert_eq!(resolved.id, "deploy-api");

        let err = engine.resolve_id("deploy", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::AmbiguousId);

        let err = engine.resolve_id("#12", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedId);

        let err = engine.resolve_id("zzzzzz", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }

    #[tokio::test]
    async fn search_prefers_exact_matches() {
        let engine = setup_engine().await;
        engine.create_task(new_task("t1", "Deploy the API")).await.unwrap();
        engine.create_task(new_task("t2", "Write release notes")).await.unwrap();

        let result = engine.search("deploy");
        assert_eq!(result.tier, SearchTier::Exact);
        assert_eq!(result.hits[0].task.id, "t1");
    }

    #[tokio::test]
    async fn stats_include_cache_and_queue() {
        let engine = setup_engine().await;
        engine.create_task(new_task("t1", "One")).await.unwrap();

        let stats = engine.stats();
        assert_eq!(stats.tasks.total_tasks, 1);
        assert_eq!(stats.tasks.tasks_by_status["pending"], 1);
        assert_eq!(stats.queue.completed, 1);
        assert_eq!(stats.queue.queue_length, 0);
    }
}

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_all_commit() {
        let engine = setup_engine().await;

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .create_task(new_task(&format!("t{:02}", i), "Concurrent"))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().expect("Concurrent create failed");
        }
        engine.wait_for_idle().await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.tasks.len(), 20);
        assert_eq!(snapshot.metadata.revision, 20);
        assert!(engine.quick_check());
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot() {
        let engine = setup_engine().await;
        engine.create_task(new_task("t1", "Before")).await.unwrap();

        let held = engine.snapshot();
        engine
            .update_task(
                "t1",
                TaskPatch {
                    title: Some("After".into()),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(held.tasks["t1"].title, "Before");
        assert_eq!(engine.get_task("t1").unwrap().title, "After");
    }
}

mod intent_tests {
    use super::*;

    async fn intent(engine: &TaskEngine) -> String {
        engine
            .create_intent(NewIntent {
                human_request: "organise the release".into(),
                parsed_goals: vec!["plan".into()],
                ..NewIntent::default()
            })
            .await
            .expect("Failed to create intent")
            .intent_id
    }

    #[tokio::test]
    async fn tagged_writes_advance_the_intent() {
        let engine = setup_engine().await;
        let id = intent(&engine).await;
        assert_eq!(engine.get_intent(&id).unwrap().current_status, IntentStatus::Planning);

        engine
            .batch(
                vec![BatchOp::Create {
                    task: new_task("t1", "Tagged"),
                }],
                WriteOptions::for_intent(&id).tool("planner"),
            )
            .await
            .unwrap();

        let intent = engine.get_intent(&id).unwrap();
        assert_eq!(intent.current_status, IntentStatus::Executing);
        assert_eq!(intent.tool_chain.len(), 1);
        assert_eq!(intent.tool_chain[0].tool_name, "planner");
        assert_eq!(intent.tool_chain[0].todo_tasks_created, vec!["t1"]);
        assert_eq!(engine.intents_touching("t1").len(), 1);

        let last = engine.snapshot().operation_history.last().cloned().unwrap();
        assert_eq!(last.intent_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn failed_tagged_write_fails_the_intent() {
        let engine = setup_engine().await;
        let id = intent(&engine).await;

        let result = engine
            .batch(
                vec![BatchOp::Delete {
                    id: "ghost".into(),
                    mode: DeleteMode::Cascade,
                }],
                WriteOptions::for_intent(&id),
            )
            .await;
        assert!(result.is_err());

        let intent = engine.get_intent(&id).unwrap();
        assert_eq!(intent.current_status, IntentStatus::Failed);
        assert!(!intent.tool_chain[0].success);

        engine
            .record_tool_execution(&id, ToolExecution::succeeded("retry"))
            .await
            .unwrap();
        assert_eq!(engine.get_intent(&id).unwrap().current_status, IntentStatus::Failed);
    }

    #[tokio::test]
    async fn explicit_transitions_and_analytics() {
        let engine = setup_engine().await;
        let first = intent(&engine).await;
        let second = intent(&engine).await;

        engine.advance_intent(&first).await.unwrap();
        engine
            .record_tool_execution(&first, ToolExecution::succeeded("search"))
            .await
            .unwrap();
        engine.complete_intent(&first).await.unwrap();

        let err = engine.advance_intent(&first).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
        let err = engine.complete_intent("intent-missing").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::IntentNotFound);

        let analytics = engine.intent_analytics();
        assert_eq!(analytics.total_intents, 2);
        assert_eq!(analytics.completed_intents, 1);
        assert_eq!(analytics.active_intents, 1);
        assert!((analytics.average_goal_completion - 0.5).abs() < f64::EPSILON);
        assert_eq!(analytics.most_used_tools[0].tool_name, "search");
        assert_eq!(
            engine.get_intent(&second).unwrap().current_status,
            IntentStatus::Planning
        );
    }
}
