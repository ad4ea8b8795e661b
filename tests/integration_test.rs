use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use response_submit::config::Config;
use response_submit::error::{AppError, BusinessError};
use response_submit::infrastructure::{
    ConnectivityMonitor, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, MemoryStore,
};
use response_submit::models::{
    Device, DeviceClass, InputMethod, Response, ResponseCandidate, ResponseMetadata,
    ResponseValue, SpatialValue,
};
use response_submit::orchestrator::{App, BatchProcessor, QueueOptions};
use response_submit::services::response_service::{GUESSES, RESPONSES};
use response_submit::services::{
    ErrorReporter, GuessService, MetricsCalculator, ResponseService, RetryOptions, RetryPolicy,
    ValidationService,
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

// ========== 测试装配 ==========

struct Pipeline {
    store: Arc<MemoryStore>,
    connectivity: Arc<ConnectivityMonitor>,
    reporter: Arc<ErrorReporter>,
    responses: Arc<ResponseService>,
    guesses: GuessService,
    processor: Arc<BatchProcessor>,
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy::new(RetryOptions {
        max_attempts: 2,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 1.0,
    })
}

fn pipeline(online: bool, storage: Arc<dyn KeyValueStore>, batch_size: usize) -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let connectivity = Arc::new(ConnectivityMonitor::new(online));
    let reporter = Arc::new(ErrorReporter::new(
        Arc::new(MemoryKeyValueStore::new()),
        connectivity.clone(),
        "error_reports",
        50,
    ));
    let validator = Arc::new(ValidationService::new().unwrap());
    let calculator = Arc::new(MetricsCalculator::default());
    let responses = Arc::new(ResponseService::new(
        store.clone(),
        calculator.clone(),
        quick_retry(),
        reporter.clone(),
        batch_size,
    ));
    let guesses = GuessService::new(
        store.clone(),
        validator.clone(),
        calculator,
        quick_retry(),
        reporter.clone(),
    );
    let processor = BatchProcessor::new(
        QueueOptions {
            max_queue_size: 100,
            max_age: chrono::Duration::hours(168),
            storage_key: "pending_responses".into(),
        },
        validator,
        responses.clone(),
        storage,
        connectivity.clone(),
        reporter.clone(),
    );
    Pipeline {
        store,
        connectivity,
        reporter,
        responses,
        guesses,
        processor,
    }
}

fn spatial_candidate(user: &str, question: &str, x: f64, y: f64) -> ResponseCandidate {
    serde_json::from_value(json!({
        "userId": user,
        "questionId": question,
        "value": {
            "type": "spatial",
            "x": x,
            "y": y,
            "interactions": [
                { "kind": "move", "position": { "x": 0.1, "y": 0.1 }, "timestamp": 1 },
                { "kind": "move", "position": { "x": x, "y": y }, "timestamp": 2 },
                { "kind": "click", "position": { "x": x, "y": y }, "timestamp": 3 }
            ]
        },
        "metadata": {
            "timeToAnswerMs": 1500,
            "interactionCount": 3,
            "confidence": 0.7,
            "device": { "class": "tablet", "input": "touch" }
        }
    }))
    .unwrap()
}

fn metadata() -> ResponseMetadata {
    ResponseMetadata {
        time_to_answer_ms: 900.0,
        interaction_count: 0,
        confidence: 0.4,
        device: Device {
            class: DeviceClass::Desktop,
            input: InputMethod::Mouse,
        },
    }
}

fn point(x: f64, y: f64) -> ResponseValue {
    ResponseValue::Spatial(SpatialValue {
        x,
        y,
        interactions: Vec::new(),
    })
}

// ========== 队列与提交 ==========

#[tokio::test]
async fn offline_queue_drains_into_metrics() {
    let p = pipeline(false, Arc::new(MemoryKeyValueStore::new()), 250);
    for (user, x, y) in [("u1", 0.2, 0.8), ("u2", 0.8, 0.2), ("u3", 0.9, 0.9)] {
        assert_ok!(p.processor.queue_response(&spatial_candidate(user, "q1", x, y)).await);
    }
    assert_eq!(p.processor.len().await, 3);

    p.connectivity.set_online(true);
    let outcome = p.processor.process_queue().await;
    assert_eq!(outcome.successful.len(), 3);
    assert!(outcome.failed.is_empty());
    assert!(p.processor.is_empty().await);

    let metrics = p.responses.get_question_metrics("q1").await.unwrap().unwrap();
    assert_eq!(metrics.total_responses, 3);
    let spatial = metrics.distribution.as_spatial().unwrap();
    assert_eq!(spatial.quadrants.top_left, 1);
    assert_eq!(spatial.quadrants.top_right, 1);
    assert_eq!(spatial.quadrants.bottom_right, 1);
    assert_eq!(spatial.quadrants.bottom_left, 0);
    assert_eq!(spatial.interaction_patterns.clicks, 3);
    assert_eq!(metrics.time_stats.average_response_time, 1500.0);
}

#[tokio::test]
async fn partial_chunk_failure_keeps_only_uncommitted_entries() {
    let p = pipeline(false, Arc::new(MemoryKeyValueStore::new()), 2);
    for i in 0..5 {
        let user = format!("u{}", i);
        p.processor
            .queue_response(&spatial_candidate(&user, "q1", 0.5, 0.5))
            .await
            .unwrap();
    }

    // 第一块：事务 + 用户计数；之后的写入全部失败
    p.store.fail_writes_after(2);
    p.connectivity.set_online(true);
    let outcome = p.processor.process_queue().await;

    assert_eq!(outcome.successful.len(), 2);
    assert_eq!(outcome.failed.len(), 3);
    assert_eq!(outcome.failed[0].error.code(), "RETRY_EXHAUSTED");

    let remaining = p.processor.entries().await;
    assert_eq!(remaining.len(), 3);
    assert!(remaining.iter().all(|e| e.retry_count == 1));
    assert!(remaining
        .iter()
        .all(|e| !outcome.successful.contains(&e.response.id)));
    assert_eq!(p.store.documents(RESPONSES).len(), 2);

    p.store.heal();
    let outcome = p.processor.process_queue().await;
    assert_eq!(outcome.successful.len(), 3);
    assert!(p.processor.is_empty().await);

    let metrics = p.responses.get_question_metrics("q1").await.unwrap().unwrap();
    assert_eq!(metrics.total_responses, 5);
}

#[tokio::test]
async fn repeated_process_calls_submit_each_response_once() {
    let p = pipeline(false, Arc::new(MemoryKeyValueStore::new()), 250);
    for i in 0..10 {
        let user = format!("u{}", i);
        p.processor
            .queue_response(&spatial_candidate(&user, "q1", 0.3, 0.3))
            .await
            .unwrap();
    }
    p.connectivity.set_online(true);

    let outcomes = join_all((0..4).map(|_| p.processor.process_queue())).await;
    let submitted: usize = outcomes.iter().map(|o| o.successful.len()).sum();
    assert_eq!(submitted, 10);

    let metrics = p.responses.get_question_metrics("q1").await.unwrap().unwrap();
    assert_eq!(metrics.total_responses, 10);
}

#[tokio::test]
async fn concurrent_submissions_are_all_counted() {
    let p = pipeline(true, Arc::new(MemoryKeyValueStore::new()), 250);
    let validator = ValidationService::new().unwrap();
    let responses: Vec<Response> = (0..20)
        .map(|i| {
            let user = format!("user-{}", i);
            let x = (i as f64) / 20.0;
            validator
                .validate(&spatial_candidate(&user, "shared", x, 1.0 - x))
                .unwrap()
        })
        .collect();

    let results = join_all(responses.iter().map(|r| p.responses.submit_response(r))).await;
    assert!(results.iter().all(Result::is_ok));

    let metrics = p.responses.get_question_metrics("shared").await.unwrap().unwrap();
    assert_eq!(metrics.total_responses, 20);
    assert_eq!(metrics.distribution.as_spatial().unwrap().samples(), 20);
}

#[tokio::test]
async fn queue_persists_across_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(dir.path()).unwrap());

    let first = pipeline(false, storage.clone(), 250);
    first
        .processor
        .queue_response(&spatial_candidate("u1", "q1", 0.1, 0.9))
        .await
        .unwrap();
    first
        .processor
        .queue_response(&spatial_candidate("u2", "q1", 0.9, 0.1))
        .await
        .unwrap();
    let before = first.processor.entries().await;
    drop(first);

    let reopened: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(dir.path()).unwrap());
    let second = pipeline(true, reopened, 250);
    assert_eq!(second.processor.entries().await, before);

    let outcome = second.processor.process_queue().await;
    assert_eq!(outcome.successful.len(), 2);
    assert!(second.processor.is_empty().await);
}

// ========== 猜测 ==========

#[tokio::test]
async fn guess_requires_target_response_first() {
    let p = pipeline(true, Arc::new(MemoryKeyValueStore::new()), 250);

    let err = assert_err!(
        p.guesses
            .submit_guess("alice", "bob", "q1", point(0.6, 0.4), metadata())
            .await
    );
    assert!(matches!(
        err,
        AppError::Business(BusinessError::TargetNotResponded { .. })
    ));
    assert!(p.store.documents(GUESSES).is_empty());
    assert_eq!(p.reporter.reports()[0].code, "TARGET_NOT_RESPONDED");

    let validator = ValidationService::new().unwrap();
    let response = validator
        .validate(&spatial_candidate("bob", "q1", 0.5, 0.5))
        .unwrap();
    p.responses.submit_response(&response).await.unwrap();

    let guess = assert_ok!(
        p.guesses
            .submit_guess("alice", "bob", "q1", point(0.6, 0.4), metadata())
            .await
    );
    let accuracy = guess.accuracy.unwrap();
    assert!((accuracy.distance.unwrap() - 0.1414).abs() < 1e-3);
    assert!((accuracy.score - 0.9).abs() < 1e-9);

    let metrics = p.responses.get_question_metrics("q1").await.unwrap().unwrap();
    assert_eq!(metrics.total_responses, 1);
    assert_eq!(metrics.total_guesses, 1);
    assert_eq!(metrics.time_stats.average_guess_time, 900.0);

    let revealed = assert_ok!(p.guesses.reveal_guess(&guess.id, "bob").await);
    assert_eq!(revealed.id, guess.id);
}

#[tokio::test]
async fn metrics_watcher_follows_submissions() {
    let p = pipeline(true, Arc::new(MemoryKeyValueStore::new()), 250);
    let mut watcher = p.responses.watch_question_metrics("q7");
    let validator = ValidationService::new().unwrap();

    for (i, user) in ["a", "b"].iter().enumerate() {
        let response = validator
            .validate(&spatial_candidate(user, "q7", 0.25, 0.25))
            .unwrap();
        p.responses.submit_response(&response).await.unwrap();

        let update = tokio::time::timeout(Duration::from_secs(1), watcher.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.total_responses, i as u64 + 1);
    }
}

// ========== 应用入口 ==========

#[tokio::test]
async fn app_imports_files_and_submits_everything() {
    let input = tempfile::tempdir().unwrap();
    std::fs::write(
        input.path().join("01_spatial.toml"),
        r#"
[[responses]]
userId = "u1"
questionId = "map"
value = { type = "spatial", x = 0.2, y = 0.8 }
metadata = { timeToAnswerMs = 1200, confidence = 0.5, device = { class = "desktop", input = "mouse" } }

[[responses]]
userId = "u2"
questionId = "map"
value = { type = "spatial", x = 1.5, y = 0.8 }
metadata = { timeToAnswerMs = 1200, confidence = 0.5, device = { class = "desktop", input = "mouse" } }
"#,
    )
    .unwrap();
    std::fs::write(
        input.path().join("02_choice.json"),
        json!({
            "responses": [
                {
                    "userId": "u1",
                    "questionId": "drink",
                    "value": { "type": "categorical", "selectedOption": "tea" },
                    "metadata": {
                        "timeToAnswerMs": 800,
                        "confidence": 1.0,
                        "device": { "class": "mobile", "input": "touch" }
                    },
                    "timestamp": Utc::now().timestamp_millis()
                }
            ]
        })
        .to_string(),
    )
    .unwrap();

    let config = Config {
        input_folder: input.path().to_string_lossy().to_string(),
        output_log_file: input.path().join("run.txt").to_string_lossy().to_string(),
        ..Config::default()
    };
    let store = Arc::new(MemoryStore::new());
    let app = App::with_backends(config, store.clone(), Arc::new(MemoryKeyValueStore::new())).unwrap();

    let stats = app.run().await.unwrap();
    assert_eq!(stats.loaded, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.pending, 0);

    assert_eq!(store.documents(RESPONSES).len(), 2);
    let drink = app.responses().get_question_metrics("drink").await.unwrap().unwrap();
    assert_eq!(drink.distribution.categorical_counts().unwrap()["tea"], 1);
}
