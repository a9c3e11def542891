//! Scripted in-process inference service shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;

use llamadeck_core::backend::{
    ByteStream, ChatRequest, ChatResponse, CreateModelRequest, EmbedRequest, EmbedResponse,
    GenerateRequest, GenerateResponse, InferenceApi, LegacyEmbedding, ModelInfo, ModelSummary,
    PullProgress, RunningModel, StreamEndpoint, VersionInfo,
};
use llamadeck_core::{Client, ClientConfig, ClientError, MemoryStore, SupervisorConfig};

/// How the next streaming call behaves
pub enum StreamScript {
    /// Deliver these chunks, then end the body
    Chunks(Vec<Vec<u8>>),
    /// Deliver these chunks, then never produce anything again
    ChunksThenHang(Vec<Vec<u8>>),
    /// Refuse with an HTTP status before the body starts
    Status(u16, String),
    /// Fail to connect
    Unreachable,
}

/// In-process stand-in for an Ollama service
#[derive(Default)]
pub struct MockService {
    scripts: Mutex<VecDeque<StreamScript>>,
    /// Every streaming body received, in order
    pub stream_requests: Mutex<Vec<(StreamEndpoint, Value)>>,
    /// Every non-streaming generate received
    pub generate_requests: Mutex<Vec<GenerateRequest>>,
    models: Mutex<Vec<ModelSummary>>,
    capabilities: Mutex<BTreeMap<String, Vec<String>>>,
    running: Mutex<Vec<RunningModel>>,
    version_failures: AtomicU32,
    offline: Mutex<bool>,
    pub version_calls: AtomicU32,
    pub list_calls: AtomicU32,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the behavior of the next streaming call
    pub fn script(&self, script: StreamScript) {
        self.scripts.lock().push_back(script);
    }

    /// Install a model; `None` makes its `/show` fail
    pub fn add_model(&self, name: &str, capabilities: Option<&[&str]>) {
        self.models.lock().push(ModelSummary {
            name: name.to_string(),
            model: name.to_string(),
            ..ModelSummary::default()
        });
        if let Some(tags) = capabilities {
            self.capabilities.lock().insert(
                name.to_string(),
                tags.iter().map(|t| (*t).to_string()).collect(),
            );
        }
    }

    pub fn set_running(&self, names: &[&str]) {
        *self.running.lock() = names
            .iter()
            .map(|n| RunningModel {
                name: (*n).to_string(),
                ..RunningModel::default()
            })
            .collect();
    }

    /// Fail the next `count` version probes
    pub fn fail_probes(&self, count: u32) {
        self.version_failures.store(count, Ordering::SeqCst);
    }

    /// Fail every version probe until turned back on
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    pub fn stream_bodies(&self) -> Vec<Value> {
        self.stream_requests
            .lock()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }
}

fn connection_refused() -> ClientError {
    ClientError::Connection("connection refused".to_string())
}

#[async_trait]
impl InferenceApi for MockService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn version(&self) -> Result<VersionInfo, ClientError> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        if *self.offline.lock() {
            return Err(connection_refused());
        }
        let failed = self
            .version_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(connection_refused());
        }
        Ok(VersionInfo {
            version: "0.0.0-mock".to_string(),
        })
    }

    async fn open_stream(
        &self,
        endpoint: StreamEndpoint,
        body: Value,
    ) -> Result<ByteStream, ClientError> {
        self.stream_requests.lock().push((endpoint, body));
        let script = self.scripts.lock().pop_front();
        match script {
            Some(StreamScript::Chunks(chunks)) => Ok(Box::pin(stream::iter(
                chunks.into_iter().map(Ok::<Vec<u8>, ClientError>),
            ))),
            Some(StreamScript::ChunksThenHang(chunks)) => Ok(Box::pin(
                stream::iter(chunks.into_iter().map(Ok::<Vec<u8>, ClientError>))
                    .chain(stream::pending()),
            )),
            Some(StreamScript::Status(status, body)) => {
                Err(ClientError::Transport { status, body })
            }
            Some(StreamScript::Unreachable) => Err(connection_refused()),
            None => Ok(Box::pin(stream::pending::<Result<Vec<u8>, ClientError>>())),
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        Ok(ChatResponse {
            model: request.model.clone(),
            done: true,
            ..ChatResponse::default()
        })
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ClientError> {
        self.generate_requests.lock().push(request.clone());
        Ok(GenerateResponse {
            model: request.model.clone(),
            done: true,
            ..GenerateResponse::default()
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if *self.offline.lock() {
            return Err(connection_refused());
        }
        Ok(self.models.lock().clone())
    }

    async fn running_models(&self) -> Result<Vec<RunningModel>, ClientError> {
        Ok(self.running.lock().clone())
    }

    async fn show_model(&self, model: &str, _verbose: bool) -> Result<ModelInfo, ClientError> {
        match self.capabilities.lock().get(model) {
            Some(tags) => Ok(ModelInfo {
                capabilities: Some(tags.clone()),
                ..ModelInfo::default()
            }),
            None => Err(ClientError::Transport {
                status: 404,
                body: format!("model '{model}' not found"),
            }),
        }
    }

    async fn pull_model(&self, model: &str, _insecure: bool) -> Result<PullProgress, ClientError> {
        self.add_model(model, Some(&["completion"]));
        Ok(PullProgress {
            status: "success".to_string(),
            ..PullProgress::default()
        })
    }

    async fn delete_model(&self, model: &str) -> Result<(), ClientError> {
        let mut models = self.models.lock();
        let before = models.len();
        models.retain(|m| m.name != model);
        if models.len() == before {
            return Err(ClientError::Transport {
                status: 404,
                body: format!("model '{model}' not found"),
            });
        }
        Ok(())
    }

    async fn copy_model(&self, source: &str, destination: &str) -> Result<(), ClientError> {
        let tags = self.capabilities.lock().get(source).cloned();
        let tags: Option<Vec<&str>> = tags
            .as_ref()
            .map(|t| t.iter().map(String::as_str).collect());
        self.add_model(destination, tags.as_deref());
        Ok(())
    }

    async fn create_model(
        &self,
        request: &CreateModelRequest,
    ) -> Result<PullProgress, ClientError> {
        self.add_model(&request.model, Some(&["completion"]));
        Ok(PullProgress {
            status: "success".to_string(),
            ..PullProgress::default()
        })
    }

    async fn embed(&self, request: &EmbedRequest) -> Result<EmbedResponse, ClientError> {
        Ok(EmbedResponse {
            model: request.model.clone(),
            embeddings: vec![vec![0.1, 0.2, 0.3]],
            ..EmbedResponse::default()
        })
    }

    async fn embeddings(&self, _model: &str, _prompt: &str) -> Result<LegacyEmbedding, ClientError> {
        Ok(LegacyEmbedding {
            embedding: vec![0.1, 0.2, 0.3],
        })
    }
}

/// Config with millisecond supervisor timers
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.supervisor = SupervisorConfig::for_testing();
    config
}

/// Client over a mock service and in-memory storage
pub fn client(service: &Arc<MockService>) -> Client<MockService> {
    Client::new(
        Arc::clone(service),
        Arc::new(MemoryStore::new()),
        test_config(),
    )
}

/// NDJSON line for a streamed chat record
pub fn chat_line(content: &str, done: bool) -> String {
    let mut record = serde_json::json!({
        "model": "demo",
        "created_at": "2024-01-01T00:00:00Z",
        "message": { "role": "assistant", "content": content },
        "done": done,
    });
    if done {
        record["done_reason"] = "stop".into();
        record["total_duration"] = 2_000_000_000_u64.into();
        record["load_duration"] = 500_000_000_u64.into();
        record["eval_count"] = 10.into();
        record["eval_duration"] = 1_000_000_000_u64.into();
    }
    format!("{record}\n")
}
