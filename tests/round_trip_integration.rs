//! End-to-end tests driving the public `Lab` API
//!
//! Each test compiles a lab config, pushes batches through it and checks the
//! outputs handed back to the result callback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use pipelab::adapters::{AdapterError, ResultHandler};
use pipelab::message::{split_batches, Batch, OutputUnit};
use pipelab::runtime::StreamError;
use pipelab::session::{consumer_feed, SessionError};
use pipelab::{Lab, LabError, Notice, NoticeLevel};

type Results = Arc<Mutex<Vec<(Vec<Vec<String>>, Option<StreamError>)>>>;

fn create_lab(deadline: Duration) -> (Lab, Results, mpsc::UnboundedReceiver<Notice>) {
    let results: Results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let handler: ResultHandler =
        Arc::new(move |outputs: Vec<OutputUnit>, err: Option<StreamError>| {
            let strings = outputs.iter().map(OutputUnit::to_strings).collect();
            sink.lock().unwrap().push((strings, err));
        });
    let (lab, notices) = Lab::with_deadline(handler, deadline);
    (lab, results, notices)
}

/// Poll until `count` results arrived
async fn wait_for_results(
    results: &Results,
    count: usize,
) -> Vec<(Vec<Vec<String>>, Option<StreamError>)> {
    for _ in 0..300 {
        {
            let current = results.lock().unwrap();
            if current.len() >= count {
                return current.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} results, got {}", count, results.lock().unwrap().len());
}

#[tokio::test]
async fn test_identity_pipeline_round_trip() {
    let (lab, results, _notices) = create_lab(Duration::from_secs(5));
    lab.compile("output:\n  type: lab\n").await.unwrap();

    let units = split_batches("a\nb\n\nc");
    assert_eq!(units.len(), 2);
    lab.execute(units).await.unwrap().await.unwrap();

    let results = wait_for_results(&results, 2).await;
    assert_eq!(results[0].0, vec![vec!["a", "b"]]);
    assert_eq!(results[1].0, vec![vec!["c"]]);
    assert!(results.iter().all(|(_, err)| err.is_none()));

    lab.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_jsonc_config_with_broker() {
    let (lab, results, _notices) = create_lab(Duration::from_secs(5));
    let config = r#"{
        // two lab outputs behind a broker: every batch is captured twice
        "pipeline": { "processors": [ { "type": "prefix", "value": "> " } ] },
        "output": {
            "type": "broker",
            "outputs": [ { "type": "lab" }, { "type": "drop" }, { "type": "lab" } ]
        }
    }"#;
    lab.compile(config).await.unwrap();

    lab.execute(vec![Batch::from_payloads(["hi"])]).await.unwrap();

    let results = wait_for_results(&results, 1).await;
    assert_eq!(results[0].0, vec![vec!["> hi"], vec!["> hi"]]);
    lab.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_every_feed_gets_every_unit() {
    let (lab, results, _notices) = create_lab(Duration::from_secs(5));
    let report = lab
        .compile("input:\n  feeds: 2\npipeline:\n  processors:\n    - type: uppercase\n")
        .await
        .unwrap();
    assert_eq!(report.feeds, 2);
    assert_eq!(lab.session().feed_count().await, 2);

    lab.execute(split_batches("x\n\ny")).await.unwrap().await.unwrap();

    let mut results: Vec<_> = wait_for_results(&results, 4)
        .await
        .into_iter()
        .map(|(outputs, _)| outputs)
        .collect();
    results.sort();
    assert_eq!(
        results,
        vec![
            vec![vec!["X".to_string()]],
            vec![vec!["X".to_string()]],
            vec![vec!["Y".to_string()]],
            vec![vec!["Y".to_string()]],
        ]
    );
    lab.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_output_without_lab_yields_empty_results() {
    let (lab, results, mut notices) = create_lab(Duration::from_secs(5));
    let report = lab.compile("output:\n  type: drop\n").await.unwrap();
    assert_eq!(report.lints.len(), 1);

    lab.execute(vec![Batch::from_payloads(["lost"])]).await.unwrap();

    let results = wait_for_results(&results, 1).await;
    assert!(results[0].0.is_empty());
    assert!(results[0].1.is_none());

    let mut lints = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        if notice.level == NoticeLevel::Lint {
            lints.push(notice.message);
        }
    }
    assert_eq!(lints, vec!["output: no lab output is reachable, results will always be empty"]);
    lab.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cache_round_trip() {
    let (lab, results, _notices) = create_lab(Duration::from_secs(5));
    let config = r#"
pipeline:
  processors:
    - type: cache
      resource: seen
      operator: set
      key: last
    - type: cache
      resource: seen
      operator: get
      key: last
resources:
  caches:
    seen:
      capacity: 10
"#;
    lab.compile(config).await.unwrap();
    lab.execute(vec![Batch::from_payloads(["remember me"])]).await.unwrap();

    let results = wait_for_results(&results, 1).await;
    assert_eq!(results[0].0, vec![vec!["remember me"]]);
    lab.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recompile_replaces_session() {
    let (lab, results, _notices) = create_lab(Duration::from_secs(5));
    let first = lab
        .compile("pipeline:\n  processors:\n    - type: uppercase\n")
        .await
        .unwrap();
    let second = lab
        .compile("pipeline:\n  processors:\n    - type: lowercase\n")
        .await
        .unwrap();
    assert!(second.generation > first.generation);
    assert_eq!(lab.session().feed_count().await, 1);

    lab.execute(vec![Batch::from_payloads(["MiXeD"])]).await.unwrap();

    let results = wait_for_results(&results, 1).await;
    assert_eq!(results[0].0, vec![vec!["mixed"]]);
    lab.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_twice_and_execute_after() {
    let (lab, _, _notices) = create_lab(Duration::from_secs(1));
    lab.shutdown().await.unwrap();
    lab.shutdown().await.unwrap();

    lab.compile("{}").await.unwrap();
    lab.shutdown().await.unwrap();
    lab.shutdown().await.unwrap();

    let result = lab.execute(vec![Batch::from_payloads(["a"])]).await;
    assert!(matches!(result, Err(LabError::NotCompiled)));
}

#[tokio::test]
async fn test_broadcast_times_out_on_undrained_feed() {
    let (lab, _, mut notices) = create_lab(Duration::from_millis(100));
    lab.compile("{}").await.unwrap();

    // A second feed nobody reads from
    let (stuck, _receiver) = consumer_feed();
    lab.session().register(stuck).await;

    let started = tokio::time::Instant::now();
    let result = lab
        .session()
        .send_all(&[Batch::from_payloads(["a"])])
        .await;
    assert_eq!(result, Err(SessionError::Timeout(Duration::from_millis(100))));
    assert!(started.elapsed() >= Duration::from_millis(100));

    // Through the lab the same failure is reported and drains the session
    lab.execute(vec![Batch::from_payloads(["b"])])
        .await
        .unwrap()
        .await
        .unwrap();
    assert!(!lab.session().is_active().await);

    let mut saw_failure = false;
    while let Ok(notice) = notices.try_recv() {
        if notice.level == NoticeLevel::Error && notice.message.starts_with("Execution failed") {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn test_write_without_correlation_is_reported() {
    use pipelab::adapters::{SinkRegistry, SinkWriter, Writer};

    let writer = SinkWriter::new(Arc::new(SinkRegistry::new()));
    let err = writer
        .write(Batch::from_payloads(["untagged"]))
        .await
        .unwrap_err();
    assert_eq!(err, AdapterError::SinkNotFound);
}
