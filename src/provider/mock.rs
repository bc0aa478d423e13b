//! Mock provider for testing
//!
//! Scripts are picked per call: the first route whose key is a substring
//! of the prompt wins, then the FIFO queue, then the configured default.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};

use super::traits::{CompletionProvider, CompletionRequest, FragmentStream};
use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Scripts
// ─────────────────────────────────────────────────────────────────

/// Failure kinds a script can inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Network-level failure (recoverable)
    Transport,
    /// Malformed payload (recoverable)
    Decode,
    /// Credential rejected (configuration)
    Auth,
    /// No credential configured (configuration)
    MissingKey,
    /// Provider refused the request (not recoverable)
    Rejected,
}

impl MockFailure {
    pub fn to_error(self) -> Error {
        match self {
            MockFailure::Transport => Error::transport("mock connection reset"),
            MockFailure::Decode => Error::stream_decode("Type validation failed: mock payload"),
            MockFailure::Auth => Error::AuthenticationFailed {
                message: "mock key rejected".to_string(),
            },
            MockFailure::MissingKey => Error::MissingCredential {
                provider: "mock".to_string(),
            },
            MockFailure::Rejected => Error::ProviderRejected {
                status: 400,
                message: "mock bad request".to_string(),
            },
        }
    }
}

/// One step of a scripted stream
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Text(String),
    /// Yield an error and end the stream
    Fail(MockFailure),
    /// Never yield again
    Stall,
    Delay(Duration),
}

/// Behavior of one `stream_completion` call
#[derive(Debug, Clone)]
pub enum StreamScript {
    Steps(Vec<ScriptStep>),
    /// Fail before any stream is returned
    FailSetup(MockFailure),
}

impl StreamScript {
    /// A stream yielding each fragment in order
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StreamScript::Steps(fragments.into_iter().map(|f| ScriptStep::Text(f.into())).collect())
    }
}

/// Behavior of one `generate_completion` call
#[derive(Debug, Clone)]
pub enum GenerateScript {
    Reply(String),
    Fail(MockFailure),
    /// Never complete
    Stall,
}

// ─────────────────────────────────────────────────────────────────
// Mock Configuration
// ─────────────────────────────────────────────────────────────────

/// Fallback behavior when no route or queued script applies
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub default_stream: StreamScript,
    pub default_generate: GenerateScript,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            default_stream: StreamScript::fragments(["mock ", "reply"]),
            default_generate: GenerateScript::Reply("mock reply".to_string()),
        }
    }
}

/// Track method call counts for verification
#[derive(Debug, Default)]
struct CallCounts {
    stream_completion: u32,
    generate_completion: u32,
}

// ─────────────────────────────────────────────────────────────────
// Mock Provider
// ─────────────────────────────────────────────────────────────────

/// Scriptable implementation of `CompletionProvider`
pub struct MockProvider {
    config: MockConfig,
    stream_queue: Mutex<VecDeque<StreamScript>>,
    stream_routes: RwLock<Vec<(String, StreamScript)>>,
    generate_queue: Mutex<VecDeque<GenerateScript>>,
    generate_routes: RwLock<Vec<(String, GenerateScript)>>,
    call_counts: RwLock<CallCounts>,
    requests: RwLock<Vec<(&'static str, CompletionRequest)>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            stream_queue: Mutex::new(VecDeque::new()),
            stream_routes: RwLock::new(Vec::new()),
            generate_queue: Mutex::new(VecDeque::new()),
            generate_routes: RwLock::new(Vec::new()),
            call_counts: RwLock::new(CallCounts::default()),
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Queue a script for the next unrouted stream call
    pub fn queue_stream(&self, script: StreamScript) -> &Self {
        self.stream_queue.lock().push_back(script);
        self
    }

    /// Use `script` for every stream call whose prompt contains `key`
    pub fn route_stream(&self, key: impl Into<String>, script: StreamScript) -> &Self {
        self.stream_routes.write().push((key.into(), script));
        self
    }

    /// Queue a script for the next unrouted generate call
    pub fn queue_generate(&self, script: GenerateScript) -> &Self {
        self.generate_queue.lock().push_back(script);
        self
    }

    /// Use `script` for every generate call whose prompt contains `key`
    pub fn route_generate(&self, key: impl Into<String>, script: GenerateScript) -> &Self {
        self.generate_routes.write().push((key.into(), script));
        self
    }

    /// Get the number of times a method was called
    pub fn call_count(&self, method: &str) -> u32 {
        let counts = self.call_counts.read();
        match method {
            "stream_completion" => counts.stream_completion,
            "generate_completion" => counts.generate_completion,
            _ => 0,
        }
    }

    /// Requests received by `method`, in call order
    pub fn requests(&self, method: &str) -> Vec<CompletionRequest> {
        self.requests
            .read()
            .iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Reset all call counts and recorded requests
    pub fn reset_counts(&self) {
        *self.call_counts.write() = CallCounts::default();
        self.requests.write().clear();
    }

    fn pick<T: Clone>(
        routes: &RwLock<Vec<(String, T)>>,
        queue: &Mutex<VecDeque<T>>,
        default: &T,
        prompt: &str,
    ) -> T {
        if let Some((_, script)) = routes.read().iter().find(|(key, _)| prompt.contains(key.as_str())) {
            return script.clone();
        }
        queue.lock().pop_front().unwrap_or_else(|| default.clone())
    }
}

fn scripted_stream(steps: Vec<ScriptStep>) -> FragmentStream {
    let steps: VecDeque<ScriptStep> = steps.into();
    stream::unfold(Some(steps), |state| async move {
        let mut steps = state?;
        loop {
            match steps.pop_front()? {
                ScriptStep::Text(text) => return Some((Ok(text), Some(steps))),
                ScriptStep::Fail(failure) => return Some((Err(failure.to_error()), None)),
                ScriptStep::Stall => std::future::pending::<()>().await,
                ScriptStep::Delay(d) => tokio::time::sleep(d).await,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<FragmentStream> {
        self.call_counts.write().stream_completion += 1;
        self.requests.write().push(("stream_completion", request.clone()));

        let script = Self::pick(
            &self.stream_routes,
            &self.stream_queue,
            &self.config.default_stream,
            &request.prompt,
        );
        match script {
            StreamScript::FailSetup(failure) => Err(failure.to_error()),
            StreamScript::Steps(steps) => Ok(scripted_stream(steps)),
        }
    }

    async fn generate_completion(&self, request: &CompletionRequest) -> Result<String> {
        self.call_counts.write().generate_completion += 1;
        self.requests.write().push(("generate_completion", request.clone()));

        let script = Self::pick(
            &self.generate_routes,
            &self.generate_queue,
            &self.config.default_generate,
            &request.prompt,
        );
        match script {
            GenerateScript::Reply(text) => Ok(text),
            GenerateScript::Fail(failure) => Err(failure.to_error()),
            GenerateScript::Stall => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest::new(prompt, "mock-model", 0.7)
    }

    #[tokio::test]
    async fn test_default_stream() {
        let provider = MockProvider::new();
        let stream = provider.stream_completion(&request("hi")).await.unwrap();
        let text: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(text.concat(), "mock reply");
        assert_eq!(provider.call_count("stream_completion"), 1);
    }

    #[tokio::test]
    async fn test_queue_then_default() {
        let provider = MockProvider::new();
        provider.queue_generate(GenerateScript::Reply("first".into()));

        assert_eq!(provider.generate_completion(&request("a")).await.unwrap(), "first");
        assert_eq!(provider.generate_completion(&request("b")).await.unwrap(), "mock reply");
        assert_eq!(provider.call_count("generate_completion"), 2);
        assert_eq!(provider.requests("generate_completion")[1].prompt, "b");
    }

    #[tokio::test]
    async fn test_routes_take_priority() {
        let provider = MockProvider::new();
        provider
            .queue_stream(StreamScript::fragments(["queued"]))
            .route_stream("吴军", StreamScript::fragments(["routed"]));

        let stream = provider.stream_completion(&request("ask 吴军")).await.unwrap();
        let text: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(text, vec!["routed"]);

        let stream = provider.stream_completion(&request("other")).await.unwrap();
        let text: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(text, vec!["queued"]);
    }

    #[tokio::test]
    async fn test_fail_step_ends_stream() {
        let provider = MockProvider::new();
        provider.queue_stream(StreamScript::Steps(vec![
            ScriptStep::Text("a".into()),
            ScriptStep::Fail(MockFailure::Transport),
            ScriptStep::Text("never".into()),
        ]));

        let items: Vec<Result<String>> =
            provider.stream_completion(&request("x")).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap_err().is_recoverable());
    }

    #[tokio::test]
    async fn test_setup_failure() {
        let provider = MockProvider::new();
        provider.queue_stream(StreamScript::FailSetup(MockFailure::MissingKey));
        let err = provider.stream_completion(&request("x")).await.err().unwrap();
        assert!(err.is_configuration());
    }
}
