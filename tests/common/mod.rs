//! Common test utilities and fixtures
//!
//! Shared setup for the integration tests: temporary data directories,
//! config files, and engines wired to the mock provider.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use persona_chat::chat::{Engine, EngineSettings, StreamPolicy, Summarizer, Workspace};
use persona_chat::provider::MockProvider;
use persona_chat::store::{ConversationDb, FileStore, MemoryStore};
use tempfile::TempDir;

/// Temporary directory holding a config file and a data directory
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let data_dir = temp_dir.path().join("data");
        let env = Self {
            temp_dir,
            config_path,
            data_dir,
        };
        env.write_config("");
        env
    }

    /// Write `extra` after a `[storage]` section pointing at the data dir
    pub fn write_config(&self, extra: &str) {
        let content = format!(
            "[storage]\ndata_dir = \"{}\"\n\n{}",
            self.data_dir.display().to_string().replace('\\', "/"),
            extra
        );
        fs::write(&self.config_path, content).unwrap();
    }

    pub fn config(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

/// Engine settings with short timeouts and no retry delay
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        chat_model: "chat-model".to_string(),
        chat_temperature: 0.7,
        system_prompt: String::new(),
        title_min_messages: 3,
        title_source_messages: 4,
        fan_out_single_mention: false,
        policy: StreamPolicy {
            chunk_timeout: Duration::from_millis(200),
            fallback_timeout: Duration::from_millis(500),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
        },
    }
}

/// Engine over an in-memory workspace
pub fn memory_engine(provider: Arc<MockProvider>, settings: EngineSettings) -> Engine {
    let db = ConversationDb::new(Arc::new(MemoryStore::new()));
    engine_over(db, provider, settings)
}

/// Engine over a file-backed workspace rooted at `dir`
pub fn file_engine(dir: &Path, provider: Arc<MockProvider>, settings: EngineSettings) -> Engine {
    let db = ConversationDb::new(Arc::new(FileStore::open(dir).unwrap()));
    engine_over(db, provider, settings)
}

fn engine_over(db: ConversationDb, provider: Arc<MockProvider>, settings: EngineSettings) -> Engine {
    let workspace = Arc::new(Workspace::open(db, 10).unwrap());
    let summarizer = Summarizer::new(provider.clone(), "summary-model", 100);
    Engine::new(workspace, provider, summarizer, settings)
}
