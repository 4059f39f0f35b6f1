use config::{Config, ConfigError};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub initial_batch: usize,
    pub target: usize,
    pub batch_size: usize,
    #[serde(default)]
    pub per_item_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Remote fetch-and-classify endpoint. The in-process pipeline is used when unset.
    #[serde(default)]
    pub classifier_url: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

impl SyncConfig {
    pub fn per_item_delay(&self) -> Duration {
        Duration::from_millis(self.per_item_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub sub_batch_size: usize,
    pub estimated_ms_per_item: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub endpoint: String,
    pub temperature: f64,
    pub labels_per_item: usize,
    pub max_body_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestLimits {
    pub max_requests: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
    pub backoff_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub key: String,
    pub request_limits: RequestLimits,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("key", &if self.key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("request_limits", &self.request_limits)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailConfig {
    pub endpoint: String,
    pub max_search_results: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct StorageFiles {
    data_dir: String,
    item_cache_file: String,
    processed_ids_file: String,
    processed_emails_file: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub item_cache_path: PathBuf,
    pub processed_ids_path: PathBuf,
    pub processed_emails_path: PathBuf,
}

impl StorageConfig {
    fn resolve(root: &Path, files: StorageFiles) -> Self {
        let data_dir = {
            let dir = PathBuf::from(&files.data_dir);
            if dir.is_absolute() {
                dir
            } else {
                root.join(dir)
            }
        };
        let path_for = |var: &str, file: &str| {
            env::var(var)
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join(file))
        };

        StorageConfig {
            item_cache_path: path_for("ITEM_CACHE_PATH", &files.item_cache_file),
            processed_ids_path: path_for("PROCESSED_STORE_PATH", &files.processed_ids_file),
            processed_emails_path: path_for(
                "PROCESSED_EMAILS_STORE_PATH",
                &files.processed_emails_file,
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Category {
    pub label: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    sync: SyncConfig,
    inference: InferenceConfig,
    model: ModelConfig,
    api: ApiConfig,
    gmail: GmailConfig,
    storage: StorageFiles,
    categories: Vec<Category>,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub sync: SyncConfig,
    pub inference: InferenceConfig,
    pub model: ModelConfig,
    pub api: ApiConfig,
    pub gmail: GmailConfig,
    pub storage: StorageConfig,
    pub categories: Vec<Category>,
}

impl ServerConfig {
    pub fn from_dir(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join("config.toml");
        let cfg_file: ConfigFile = Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;

        let ConfigFile {
            sync,
            inference,
            model,
            mut api,
            gmail,
            storage,
            categories,
        } = cfg_file;

        if let Ok(key) = env::var("MISTRAL_API_KEY") {
            api.key = key;
        }

        // data_dir is relative to the directory holding config/
        let storage_root = root.parent().unwrap_or(root);

        Ok(ServerConfig {
            sync,
            inference,
            model,
            api,
            gmail,
            storage: StorageConfig::resolve(storage_root, storage),
            categories,
        })
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Server Config:\n\nSync: {:?}\n\nInference: {:?}\n\nModel: {:?}\n\nAPI: {:?}\n\nGmail: {:?}\n\nStorage: {:?}\n\nCategories:\n{}",
            self.sync,
            self.inference,
            self.model,
            self.api,
            self.gmail,
            self.storage,
            self.categories
                .iter()
                .map(|c| format!("{} -> {}", c.label, c.description))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

fn config_root() -> PathBuf {
    env::var("APP_DIR").map(PathBuf::from).unwrap_or_else(|_| {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .unwrap_or(Path::new("."))
            .join("config")
    })
}

lazy_static! {
    pub static ref cfg: ServerConfig =
        ServerConfig::from_dir(&config_root()).expect("config.toml is required and must be valid");
}
