use std::sync::Arc;
use std::time::Duration;

use bioforge_ai::{AiError, InMemoryAlgorithmSource, ProcessorDispatch, ScriptedAiClient};
use bioforge_infra::JobSystem;
use bioforge_infra::broker::{Broker, InMemoryBroker};
use bioforge_infra::jobs::InMemoryJobStore;
use bioforge_infra::JobsConfig;
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    jobs: Arc<JobSystem>,
    broker: Option<Arc<InMemoryBroker>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(broker_enabled: bool) -> Self {
        // Same router as prod, in-memory collaborators, ephemeral port.
        let config = JobsConfig {
            broker_enabled,
            poll_interval: Duration::from_millis(10),
            poll_max_wait: Duration::from_secs(5),
            ..JobsConfig::default()
        };
        let client = ScriptedAiClient::new(|req| {
            if req.user_prompt.contains("unreachable") {
                return Err(AiError::Transport("connection refused".to_string()));
            }
            Ok("```json\n{\"name\": \"Firefly Drift\", \"description\": \"Light-attraction search\"}\n```".to_string())
        });
        let processor = Arc::new(ProcessorDispatch::new(
            Arc::new(client),
            Arc::new(InMemoryAlgorithmSource::new()),
        ));
        let broker = broker_enabled.then(|| Arc::new(InMemoryBroker::new()));
        let jobs = Arc::new(JobSystem::start(
            &config,
            Arc::new(InMemoryJobStore::new()),
            broker.clone().map(|b| b as Arc<dyn Broker>),
            processor,
        ));

        let app = bioforge_api::app::build_app(jobs.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            jobs,
            broker,
            handle,
        }
    }

    async fn submit(&self, client: &reqwest::Client, body: serde_json::Value) -> reqwest::Response {
        client
            .post(format!("{}/jobs", self.base_url))
            .header("X-User-Id", "7")
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.jobs.shutdown_token().cancel();
    }
}

#[tokio::test]
async fn health_reports_broker_and_workers() {
    let srv = TestServer::spawn(true).await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["broker"], "memory");
    assert_eq!(body["workers"], true);
}

#[tokio::test]
async fn submitted_job_completes_and_is_readable() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let res = srv
        .submit(&client, json!({"jobType": "generate", "inputData": {"inspiration": "fireflies"}}))
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let receipt: serde_json::Value = res.json().await.unwrap();
    assert_eq!(receipt["delivery"], "published");
    let id = receipt["jobId"].as_i64().unwrap();

    let res = client
        .get(format!("{}/jobs/{}/wait?timeoutSecs=5", srv.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job: serde_json::Value = res.json().await.unwrap();
    assert_eq!(job["status"], "completed");
    assert_eq!(job["type"], "generate");
    assert_eq!(job["resultData"]["name"], "Firefly Drift");
    assert!(job.get("errorMessage").is_none());

    let res = client
        .get(format!("{}/jobs/{}", srv.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let again: serde_json::Value = res.json().await.unwrap();
    assert_eq!(again, job);
}

#[tokio::test]
async fn failing_job_exposes_error_message() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let res = srv
        .submit(&client, json!({"jobType": "generate", "inputData": {"inspiration": "unreachable"}}))
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let id = res.json::<serde_json::Value>().await.unwrap()["jobId"].as_i64().unwrap();

    let job: serde_json::Value = client
        .get(format!("{}/jobs/{}/wait", srv.base_url, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "failed");
    assert_eq!(job["errorMessage"], "AI transport error: connection refused");
    assert!(job.get("resultData").is_none());
}

#[tokio::test]
async fn invalid_submissions_are_rejected() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let res = srv
        .submit(&client, json!({"jobType": "teleport", "inputData": {}}))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = srv
        .submit(&client, json!({"jobType": "synthesize", "inputData": {"algorithmIds": []}}))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({"jobType": "generate", "inputData": {"inspiration": "bees"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let stats: serde_json::Value = client
        .get(format!("{}/jobs/stats", srv.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total"], 0);
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/jobs/999", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client
        .get(format!("{}/jobs/not-a-number", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(format!("{}/jobs/999/wait", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wait_times_out_with_408_while_job_is_deferred() {
    let srv = TestServer::spawn(true).await;
    srv.broker.as_ref().unwrap().close();
    let client = reqwest::Client::new();

    let res = srv
        .submit(&client, json!({"jobType": "generate", "inputData": {"inspiration": "moths"}}))
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let receipt: serde_json::Value = res.json().await.unwrap();
    assert_eq!(receipt["delivery"], "deferred");
    let id = receipt["jobId"].as_i64().unwrap();

    let res = client
        .get(format!("{}/jobs/{}/wait?timeoutSecs=1", srv.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "timeout");

    let job: serde_json::Value = client
        .get(format!("{}/jobs/{}", srv.base_url, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "pending");
}

#[tokio::test]
async fn inline_mode_finishes_before_responding() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let res = srv
        .submit(&client, json!({"jobType": "generate", "inputData": {"inspiration": "ants"}}))
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let receipt: serde_json::Value = res.json().await.unwrap();
    assert_eq!(receipt["delivery"], "inline");

    let job: serde_json::Value = client
        .get(format!("{}/jobs/{}", srv.base_url, receipt["jobId"]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "completed");

    let stats: serde_json::Value = client
        .get(format!("{}/jobs/stats", srv.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["jobs"]["completed"], 1);
    assert_eq!(stats["broker"], serde_json::Value::Null);
    assert!(stats.get("workers").is_none());
}
