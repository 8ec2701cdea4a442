use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub model: ModelConfig,
    pub vector: VectorConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    /// Root folder id to sync. Overridden by `GOOGLE_DRIVE_FOLDER_ID`.
    #[serde(default)]
    pub folder_id: String,
    /// Display name prepended to result paths. Overridden by
    /// `GOOGLE_DRIVE_FOLDER_ROOT_NAME`.
    #[serde(default = "default_root_name")]
    pub root_name: String,
    /// Traversal bound for the folder tree walk.
    #[serde(default = "default_max_folders")]
    pub max_folders: usize,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            folder_id: String::new(),
            root_name: default_root_name(),
            max_folders: default_max_folders(),
        }
    }
}

fn default_root_name() -> String {
    "Drive".to_string()
}
fn default_max_folders() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_chat_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Vector backend endpoint URL. Overridden by `VECTOR_STORE_URL`.
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Embedding dimensionality the collection is created with.
    #[serde(default = "default_dims")]
    pub dims: usize,
}

fn default_collection() -> String {
    "documents".to_string()
}
fn default_dims() -> usize {
    768
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EmailConfig {
    /// When false, the `sendEmail` tool reports a disabled-sender error.
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Optional distance gate for the `searchDocuments` tool. Absent
    /// means no gate.
    #[serde(default)]
    pub distance_cutoff: Option<f32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_secs: default_tool_timeout_secs(),
            distance_cutoff: None,
        }
    }
}

fn default_max_iterations() -> usize {
    5
}
fn default_tool_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            cache_path: default_cache_path(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/sync-cache.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7431".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Enumerated environment overrides
    if let Ok(id) = std::env::var("GOOGLE_DRIVE_FOLDER_ID") {
        if !id.is_empty() {
            config.drive.folder_id = id;
        }
    }
    if let Ok(name) = std::env::var("GOOGLE_DRIVE_FOLDER_ROOT_NAME") {
        if !name.is_empty() {
            config.drive.root_name = name;
        }
    }
    if let Ok(url) = std::env::var("VECTOR_STORE_URL") {
        if !url.is_empty() {
            config.vector.url = url;
        }
    }

    // Validate vector store
    if config.vector.url.trim().is_empty() {
        anyhow::bail!("vector.url must be set (or VECTOR_STORE_URL exported)");
    }
    if config.vector.dims == 0 {
        anyhow::bail!("vector.dims must be > 0");
    }

    // Validate agent bounds
    if !(1..=10).contains(&config.agent.max_iterations) {
        anyhow::bail!("agent.max_iterations must be in 1..=10");
    }
    if config.agent.tool_timeout_secs == 0 {
        anyhow::bail!("agent.tool_timeout_secs must be > 0");
    }
    if let Some(cutoff) = config.agent.distance_cutoff {
        if !cutoff.is_finite() || cutoff < 0.0 {
            anyhow::bail!("agent.distance_cutoff must be a non-negative number");
        }
    }

    // Validate sync
    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be > 0");
    }
    if config.drive.max_folders == 0 {
        anyhow::bail!("drive.max_folders must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_fill_in() {
        let (_dir, path) = write_config("[vector]\nurl = \"http://localhost:8000\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.sync.batch_size, 50);
        assert_eq!(cfg.agent.max_iterations, 5);
        assert_eq!(cfg.drive.max_folders, 10_000);
        assert_eq!(cfg.vector.dims, 768);
        assert!(cfg.agent.distance_cutoff.is_none());
    }

    #[test]
    fn missing_vector_url_rejected() {
        let (_dir, path) = write_config("[vector]\nurl = \"\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn out_of_range_iterations_rejected() {
        let (_dir, path) = write_config(
            "[vector]\nurl = \"http://localhost:8000\"\n[agent]\nmax_iterations = 11\n",
        );
        assert!(load_config(&path).is_err());
    }
}
