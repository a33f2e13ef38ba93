use config::{Config, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Top-level configuration for the coordination server.
///
/// Values are layered: hardcoded defaults, then optional `config/*.toml`
/// files, then the environment variables documented on each field. The
/// environment always wins.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    /// Whether the `auto` contact policy runs its handshake machinery
    /// (`CONTACT_ENFORCEMENT_ENABLED`). Explicit `block_all`/`contacts_only`
    /// policies apply regardless; this gates only the deferral of
    /// first-contact sends between `auto` agents.
    #[serde(default)]
    pub contact_enforcement_enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Bind host (`HTTP_HOST`).
    pub host: String,
    /// Bind port (`HTTP_PORT`).
    pub port: u16,
    /// Mount path for the MCP transport (`HTTP_PATH`).
    #[serde(default = "default_mcp_path")]
    pub path: String,
    /// Optional static bearer token (`HTTP_BEARER_TOKEN`).
    pub bearer_token: Option<String>,
    /// Allow unauthenticated requests from the loopback interface
    /// (`HTTP_ALLOW_LOCALHOST_UNAUTHENTICATED`).
    #[serde(default = "default_true")]
    pub allow_localhost_unauthenticated: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory holding per-project archives and the index database
    /// (`STORAGE_ROOT`).
    pub root: PathBuf,
}

impl StorageConfig {
    /// Path of the index database file under the storage root.
    pub fn index_path(&self) -> PathBuf {
        self.root.join("store.sqlite3")
    }

    /// Directory containing the per-project archive repositories.
    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Whether the external summarization collaborator is wired in
    /// (`LLM_ENABLED`). The engine works fully without it.
    #[serde(default)]
    pub enabled: bool,
    /// Model identifier handed to the collaborator (`LLM_DEFAULT_MODEL`).
    #[serde(default = "default_llm_model")]
    pub default_model: String,
}

fn default_true() -> bool {
    true
}

fn default_mcp_path() -> String {
    "/mcp/".to_string()
}

fn default_llm_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_storage_root() -> PathBuf {
    dirs_home()
        .map(|h| h.join(".swarm-mail"))
        .unwrap_or_else(|| PathBuf::from("./swarm-mail-data"))
}

fn dirs_home() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

/// Parse a boolean environment variable with truthy value detection.
fn parse_bool_env(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "t" | "y"))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                host: "127.0.0.1".to_string(),
                port: 8765,
                path: default_mcp_path(),
                bearer_token: None,
                allow_localhost_unauthenticated: true,
            },
            storage: StorageConfig {
                root: default_storage_root(),
            },
            llm: LlmConfig {
                enabled: false,
                default_model: default_llm_model(),
            },
            contact_enforcement_enabled: false,
        }
    }
}

impl AppConfig {
    /// Load configuration with environment-variable overrides.
    ///
    /// Priority order (highest to lowest):
    /// 1. The documented environment variables (`STORAGE_ROOT`, `HTTP_HOST`, ...)
    /// 2. Config files (`config/default.toml`, `config/{RUN_MODE}.toml`)
    /// 3. Hardcoded defaults (port 8765, loopback host)
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("http.host", "127.0.0.1")?
            .set_default("http.port", 8765)?
            .set_default("http.path", default_mcp_path())?
            .set_default("http.allow_localhost_unauthenticated", true)?
            .set_default(
                "storage.root",
                default_storage_root().to_string_lossy().to_string(),
            )?
            .set_default("llm.enabled", false)?
            .set_default("llm.default_model", default_llm_model())?
            .set_default("contact_enforcement_enabled", false)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false));

        if let Ok(root) = env::var("STORAGE_ROOT") {
            builder = builder.set_override("storage.root", root)?;
        }
        if let Ok(host) = env::var("HTTP_HOST") {
            builder = builder.set_override("http.host", host)?;
        }
        if let Ok(port) = env::var("HTTP_PORT") {
            if let Ok(p) = port.parse::<i64>() {
                builder = builder.set_override("http.port", p)?;
            }
        }
        if let Ok(token) = env::var("HTTP_BEARER_TOKEN") {
            builder = builder.set_override("http.bearer_token", token)?;
        }
        if let Some(allow) = parse_bool_env("HTTP_ALLOW_LOCALHOST_UNAUTHENTICATED") {
            builder = builder.set_override("http.allow_localhost_unauthenticated", allow)?;
        }
        if let Some(enabled) = parse_bool_env("LLM_ENABLED") {
            builder = builder.set_override("llm.enabled", enabled)?;
        }
        if let Ok(model) = env::var("LLM_DEFAULT_MODEL") {
            builder = builder.set_override("llm.default_model", model)?;
        }
        if let Some(enabled) = parse_bool_env("CONTACT_ENFORCEMENT_ENABLED") {
            builder = builder.set_override("contact_enforcement_enabled", enabled)?;
        }

        builder.build()?.try_deserialize()
    }
}
