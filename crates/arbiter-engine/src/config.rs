use arbiter_runtime::{LanguageProfile, LanguageRegistry, RuntimeConfig, DEFAULT_MAX_OUTPUT_BYTES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub server: ServerConfig,

    pub judge: JudgeConfig,

    /// Extra profiles, or overrides of built-in ones by id.
    pub languages: Vec<LanguageConfig>,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        toml_config.into_engine_config()
    }

    /// Reads `config/arbiter.toml` under the current directory, falling back
    /// to defaults when the file does not exist.
    pub fn from_project_root() -> anyhow::Result<Self> {
        let project_root = std::env::current_dir()?;
        let config_path = project_root.join("config").join("arbiter.toml");

        if !config_path.exists() {
            info!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        Self::from_file(&config_path)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            workspace_root: self.judge.workspace_root.clone(),
            compile_timeout: Duration::from_secs(self.judge.compile_timeout_secs),
            run_grace: Duration::from_millis(self.judge.run_grace_ms),
            max_output_bytes: self.judge.max_output_bytes,
        }
    }

    /// Built-in profiles plus the configured ones, later entries winning.
    pub fn build_registry(&self) -> anyhow::Result<LanguageRegistry> {
        let mut registry = LanguageRegistry::with_defaults();
        for language in &self.languages {
            let profile = language.to_profile()?;
            if registry.register(profile).is_some() {
                info!("Language profile '{}' overridden by config", language.id);
            }
        }
        Ok(registry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub workspace_root: PathBuf,
    pub compile_timeout_secs: u64,
    pub run_grace_ms: u64,
    pub default_time_limit_secs: f64,
    pub default_memory_limit_mb: u64,
    /// Upper bound accepted for a request's `time_limit`.
    pub max_time_limit_secs: f64,
    /// Per-stream capture limit.
    pub max_output_bytes: usize,
    pub max_concurrent_evaluations: usize,
}

fn default_workspace_root() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_default()
        .join("temp_eval_workspace")
}

fn default_compile_timeout_secs() -> u64 {
    30
}

fn default_run_grace_ms() -> u64 {
    500
}

fn default_time_limit_secs() -> f64 {
    2.0
}

fn default_memory_limit_mb() -> u64 {
    32
}

fn default_max_time_limit_secs() -> f64 {
    60.0
}

fn default_max_concurrent_evaluations() -> usize {
    num_cpus::get().max(1)
}

fn default_true() -> bool {
    true
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            compile_timeout_secs: default_compile_timeout_secs(),
            run_grace_ms: default_run_grace_ms(),
            default_time_limit_secs: default_time_limit_secs(),
            default_memory_limit_mb: default_memory_limit_mb(),
            max_time_limit_secs: default_max_time_limit_secs(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_concurrent_evaluations: default_max_concurrent_evaluations(),
        }
    }
}

impl JudgeConfig {
    pub fn default_time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.default_time_limit_secs)
    }

    pub fn default_memory_limit_bytes(&self) -> u64 {
        self.default_memory_limit_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub source_file: String,
    #[serde(default)]
    pub compile: Option<String>,
    pub run: String,
    #[serde(default = "default_true")]
    pub limit_address_space: bool,
}

impl LanguageConfig {
    pub fn to_profile(&self) -> anyhow::Result<LanguageProfile> {
        let profile = LanguageProfile::new(
            self.id.as_str(),
            self.source_file.as_str(),
            self.compile.as_deref(),
            &self.run,
        )?;

        Ok(profile
            .with_aliases(self.aliases.iter().cloned())
            .with_address_space_limit(self.limit_address_space))
    }
}

#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    server: Option<TomlServer>,
    #[serde(default)]
    judge: Option<TomlJudge>,
    #[serde(default)]
    languages: Vec<LanguageConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlServer {
    host: Option<String>,
    port: Option<u16>,
    enable_cors: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TomlJudge {
    workspace_root: Option<PathBuf>,
    compile_timeout_secs: Option<u64>,
    run_grace_ms: Option<u64>,
    default_time_limit_secs: Option<f64>,
    default_memory_limit_mb: Option<u64>,
    max_time_limit_secs: Option<f64>,
    max_output_bytes: Option<usize>,
    max_concurrent_evaluations: Option<usize>,
}

impl TomlConfig {
    fn into_engine_config(self) -> anyhow::Result<EngineConfig> {
        let server = if let Some(server) = self.server {
            let defaults = ServerConfig::default();
            ServerConfig {
                host: server.host.unwrap_or(defaults.host),
                port: server.port.unwrap_or(defaults.port),
                enable_cors: server.enable_cors.unwrap_or(defaults.enable_cors),
            }
        } else {
            ServerConfig::default()
        };

        let judge = if let Some(judge) = self.judge {
            JudgeConfig {
                workspace_root: judge
                    .workspace_root
                    .unwrap_or_else(default_workspace_root),
                compile_timeout_secs: judge
                    .compile_timeout_secs
                    .unwrap_or_else(default_compile_timeout_secs),
                run_grace_ms: judge.run_grace_ms.unwrap_or_else(default_run_grace_ms),
                default_time_limit_secs: judge
                    .default_time_limit_secs
                    .unwrap_or_else(default_time_limit_secs),
                default_memory_limit_mb: judge
                    .default_memory_limit_mb
                    .unwrap_or_else(default_memory_limit_mb),
                max_time_limit_secs: judge
                    .max_time_limit_secs
                    .unwrap_or_else(default_max_time_limit_secs),
                max_output_bytes: judge.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES),
                max_concurrent_evaluations: judge
                    .max_concurrent_evaluations
                    .unwrap_or_else(default_max_concurrent_evaluations),
            }
        } else {
            JudgeConfig::default()
        };

        if !(judge.default_time_limit_secs.is_finite() && judge.default_time_limit_secs > 0.0) {
            anyhow::bail!(
                "judge.default_time_limit_secs must be positive, got {}",
                judge.default_time_limit_secs
            );
        }
        if !(judge.max_time_limit_secs.is_finite()
            && judge.max_time_limit_secs >= judge.default_time_limit_secs)
        {
            anyhow::bail!(
                "judge.max_time_limit_secs must be at least the default time limit, got {}",
                judge.max_time_limit_secs
            );
        }
        if judge.default_memory_limit_mb == 0 {
            anyhow::bail!("judge.default_memory_limit_mb must be positive");
        }
        if judge.max_concurrent_evaluations == 0 {
            anyhow::bail!("judge.max_concurrent_evaluations must be at least 1");
        }

        let config = EngineConfig {
            server,
            judge,
            languages: self.languages,
        };

        // surface template errors at load time rather than on first request
        config.build_registry()?;

        Ok(config)
    }
}
