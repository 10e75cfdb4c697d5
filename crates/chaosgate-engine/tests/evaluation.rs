//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "test"
//! cg_type: "source"
//! cg_scope: "test"
//! cg_description: "End-to-end evaluation scenarios against fake backends."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chaosgate_engine::prelude::*;
use chaosgate_engine::{
    AlarmStateValue, AlarmTransition, CheckCategory, EngineError, EvaluationWindow, FailureReason,
    HypothesisOutcome, MetricDataResult, NativeMetricClient, RangeQuerySource, RecordedBackend,
    Sample,
};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
}

fn series(values: &[f64]) -> Vec<Sample> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Sample::new(at(10, i as u32, 0), *v))
        .collect()
}

/// Fake range-query backend answering by query string.
async fn query_range(
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    let values = match params.get("query").map(String::as_str) {
        Some("ok") => json!([[1714557600, "1"], [1714557660, "1"]]),
        Some("dip") => json!([[1714557600, "1"], [1714557660, "0"], [1714557720, "1"]]),
        _ => return Err(StatusCode::SERVICE_UNAVAILABLE),
    };
    Ok(Json(json!({
        "status": "success",
        "data": {"resultType": "matrix", "result": [{"metric": {}, "values": values}]}
    })))
}

async fn spawn_range_backend() -> String {
    let app = Router::new().route("/api/v1/query_range", get(query_range));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn engine(backend: RecordedBackend) -> EvaluationEngine {
    let backend = Arc::new(backend);
    EvaluationEngine::builder(EvaluationSettings::default())
        .with_native_client(backend.clone())
        .with_alarm_client(backend)
        .with_range_source(RangeQuerySource::new("chaosgate-tests", "60s").unwrap())
        .with_clock(FixedClock(at(10, 30, 0)))
        .build()
}

fn post_experiment(endpoint: &str, metrics: Value, alarms: Value) -> Specification {
    let request = json!({
        "mode": "postExperiment",
        "experimentWindow": {"start": "2024-05-01T10:00:00Z", "end": "2024-05-01T10:10:00Z"},
        "rangeQueryEndpoint": endpoint,
        "checks": {"metrics": metrics, "alarms": alarms}
    });
    Specification::from_json(&request.to_string()).unwrap()
}

#[tokio::test]
async fn steady_state_with_non_zero_native_expression_is_confirmed() {
    let backend = RecordedBackend::new().with_series("e1", series(&[1.0, 1.0, 1.0]));
    let spec = Specification::from_json(
        r#"{"mode":"steadyState","checks":{"metrics":[
            {"id":"e1","format":"NativeMetric","role":"Expression","Expression":"IF(m1 > 1, 0, 1)"}
        ]}}"#,
    )
    .unwrap();
    let verdict = engine(backend).evaluate(&spec).await.unwrap();
    assert_eq!(verdict, Verdict::SteadyState(SteadyStateVerdict::Confirmed));
}

#[tokio::test]
async fn post_experiment_range_expression_with_zero_is_not_supported() {
    let endpoint = spawn_range_backend().await;
    let spec = post_experiment(
        &endpoint,
        json!([{
            "id": "e1",
            "format": "RangeQuery",
            "role": "Expression",
            "query": "dip",
            "step": "1m"
        }]),
        json!([]),
    );
    let verdict = engine(RecordedBackend::new())
        .evaluate_hypothesis(&spec)
        .await
        .unwrap();
    assert_eq!(verdict.outcome, HypothesisOutcome::NotSupported);
    assert_eq!(verdict.refuted_by, Some(CheckCategory::RangeQuery));
    assert_eq!(verdict.failing_checks, ["e1"]);
}

#[tokio::test]
async fn empty_specifications_are_vacuously_fine() {
    let engine = engine(RecordedBackend::new());
    let steady = Specification::from_json(r#"{"mode":"steadyState"}"#).unwrap();
    let verdict = engine.check_steady_state(&steady).await.unwrap();
    assert!(verdict.is_confirmed());

    let post = Specification::from_json(
        r#"{"mode":"postExperiment",
            "experimentWindow":{"start":"2024-05-01T10:00:00Z","end":"2024-05-01T10:10:00Z"},
            "checks":{"metrics":[],"alarms":[]}}"#,
    )
    .unwrap();
    let verdict = engine.evaluate_hypothesis(&post).await.unwrap();
    assert!(verdict.is_supported());
}

#[tokio::test]
async fn overflowing_recovery_delay_is_rejected() {
    let spec = Specification::from_json(
        r#"{"mode":"postExperiment",
            "experimentWindow":{"start":"2024-05-01T10:00:00Z","end":"2024-05-01T10:10:00Z"},
            "recoveryDelay":9000000000000000,"recoveryDuration":60,
            "checks":{"alarms":["a"]}}"#,
    )
    .unwrap();
    let err = engine(RecordedBackend::new())
        .evaluate(&spec)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSpecification(_)), "{err}");
}

#[tokio::test]
async fn native_category_is_reported_first() {
    let endpoint = spawn_range_backend().await;
    let backend = RecordedBackend::new()
        .with_series("e1", series(&[1.0, 0.0]))
        .with_transition(
            "latency",
            AlarmTransition {
                timestamp: at(10, 5, 0),
                from: AlarmStateValue::Ok,
                to: AlarmStateValue::Alarm,
            },
        );
    let spec = post_experiment(
        &endpoint,
        json!([
            {"id": "e2", "format": "RangeQuery", "query": "dip"},
            {"id": "e1", "Expression": "IF(m1 > 1, 0, 1)"}
        ]),
        json!(["latency"]),
    );
    let verdict = engine(backend).evaluate_hypothesis(&spec).await.unwrap();
    assert_eq!(verdict.refuted_by, Some(CheckCategory::NativeMetric));
    assert_eq!(verdict.failing_checks, ["e1"]);
}

#[tokio::test]
async fn later_fetch_errors_surface_only_when_earlier_categories_pass() {
    let endpoint = spawn_range_backend().await;
    let metrics = json!([
        {"id": "e2", "format": "RangeQuery", "query": "unavailable"},
        {"id": "e1", "Expression": "IF(m1 > 1, 0, 1)"}
    ]);

    let failing = RecordedBackend::new().with_series("e1", series(&[0.0]));
    let verdict = engine(failing)
        .evaluate_hypothesis(&post_experiment(&endpoint, metrics.clone(), json!([])))
        .await
        .unwrap();
    assert_eq!(verdict.refuted_by, Some(CheckCategory::NativeMetric));

    let passing = RecordedBackend::new().with_series("e1", series(&[1.0]));
    let err = engine(passing)
        .evaluate_hypothesis(&post_experiment(&endpoint, metrics, json!([])))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BackendUnavailable { backend: "RangeQuery", .. }));
}

#[tokio::test]
async fn alarm_history_only_fails_on_ok_to_alarm() {
    let endpoint = spawn_range_backend().await;
    let transition = |from, to| AlarmTransition {
        timestamp: at(10, 4, 0),
        from,
        to,
    };

    let tripped = RecordedBackend::new().with_transition(
        "latency",
        transition(AlarmStateValue::Ok, AlarmStateValue::Alarm),
    );
    let verdict = engine(tripped)
        .evaluate_hypothesis(&post_experiment(&endpoint, json!([]), json!(["latency"])))
        .await
        .unwrap();
    assert_eq!(verdict.refuted_by, Some(CheckCategory::Alarms));
    assert_eq!(verdict.reason, Some(FailureReason::AlarmsViolating));
    assert_eq!(verdict.failing_checks, ["latency"]);

    let recovered = RecordedBackend::new().with_transition(
        "latency",
        transition(AlarmStateValue::Alarm, AlarmStateValue::Ok),
    );
    let verdict = engine(recovered)
        .evaluate_hypothesis(&post_experiment(&endpoint, json!([]), json!(["latency"])))
        .await
        .unwrap();
    assert!(verdict.is_supported());
}

#[tokio::test]
async fn alarm_history_covers_the_aligned_tail() {
    // Experiment ends at 10:10:30; the window is ceiled to 10:11:00.
    let backend = RecordedBackend::new().with_transition(
        "latency",
        AlarmTransition {
            timestamp: at(10, 10, 45),
            from: AlarmStateValue::Ok,
            to: AlarmStateValue::Alarm,
        },
    );
    let spec = Specification::from_json(
        r#"{"mode":"postExperiment",
            "experimentWindow":{"start":"2024-05-01T10:00:00Z","end":"2024-05-01T10:10:30Z"},
            "checks":{"alarms":["latency"]}}"#,
    )
    .unwrap();
    let verdict = engine(backend).evaluate_hypothesis(&spec).await.unwrap();
    assert_eq!(verdict.outcome, HypothesisOutcome::NotSupported);
    assert_eq!(verdict.failing_checks, ["latency"]);
}

#[tokio::test]
async fn identical_inputs_give_identical_verdicts() {
    let endpoint = spawn_range_backend().await;
    let backend = RecordedBackend::new()
        .with_series("e1", series(&[1.0, 2.0]))
        .with_alarm("latency", AlarmStateValue::Ok);
    let engine = engine(backend);
    let spec = post_experiment(
        &endpoint,
        json!([
            {"id": "e1", "Expression": "m1"},
            {"id": "e2", "format": "RangeQuery", "query": "ok"}
        ]),
        json!(["latency"]),
    );
    let first = engine.evaluate(&spec).await.unwrap();
    let second = engine.evaluate(&spec).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.label(), "supported");
}

#[derive(Default)]
struct WindowRecorder {
    windows: Mutex<Vec<EvaluationWindow>>,
}

#[async_trait]
impl NativeMetricClient for WindowRecorder {
    async fn get_metric_data(
        &self,
        queries: &[Value],
        window: EvaluationWindow,
    ) -> anyhow::Result<Vec<MetricDataResult>> {
        self.windows.lock().push(window);
        Ok(queries
            .iter()
            .map(|query| MetricDataResult {
                id: query["Id"].as_str().unwrap_or_default().to_owned(),
                label: None,
                timestamps: vec![window.start()],
                values: vec![1.0],
            })
            .collect())
    }
}

#[tokio::test]
async fn backends_see_the_computed_windows() {
    let recorder = Arc::new(WindowRecorder::default());
    let engine = EvaluationEngine::builder(EvaluationSettings::default())
        .with_native_client(recorder.clone())
        .with_clock(FixedClock(at(10, 30, 15)))
        .build();
    let metrics = json!([{"id": "e1", "Expression": "m1"}]);

    let steady = json!({"mode": "steadyState", "lookback": 120, "checks": {"metrics": metrics}});
    engine
        .evaluate(&Specification::from_json(&steady.to_string()).unwrap())
        .await
        .unwrap();

    let plain = json!({
        "mode": "postExperiment",
        "experimentWindow": {"start": "2024-05-01T10:00:00Z", "end": "2024-05-01T10:00:37Z"},
        "checks": {"metrics": metrics}
    });
    engine
        .evaluate(&Specification::from_json(&plain.to_string()).unwrap())
        .await
        .unwrap();

    let recovery = json!({
        "mode": "postExperiment",
        "experimentWindow": {"start": "2024-05-01T09:50:00Z", "end": "2024-05-01T10:00:00Z"},
        "recoveryDelay": 60,
        "recoveryDuration": 120,
        "checks": {"metrics": metrics}
    });
    engine
        .evaluate(&Specification::from_json(&recovery.to_string()).unwrap())
        .await
        .unwrap();

    let windows = recorder.windows.lock().clone();
    let bounds: Vec<_> = windows.iter().map(|w| (w.start(), w.end())).collect();
    assert_eq!(
        bounds,
        [
            (at(10, 28, 15), at(10, 30, 15)),
            (at(10, 0, 0), at(10, 1, 0)),
            (at(10, 1, 0), at(10, 3, 0)),
        ]
    );
}

#[tokio::test]
async fn failed_gate_aborts_with_question_mark() {
    async fn gate(engine: &EvaluationEngine, spec: &Specification) -> anyhow::Result<()> {
        engine.check_steady_state(spec).await?.into_result()?;
        Ok(())
    }

    let backend = RecordedBackend::new()
        .with_series("e1", series(&[1.0]))
        .with_alarm("latency", AlarmStateValue::Alarm);
    let spec = Specification::from_json(
        r#"{"mode":"steadyState","checks":{
            "metrics":[{"id":"e1","Expression":"m1"}],"alarms":["latency"]}}"#,
    )
    .unwrap();
    let err = gate(&engine(backend), &spec).await.unwrap_err();
    assert!(err.to_string().contains("latency"), "{err}");
}
