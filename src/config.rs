//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__EXECUTOR__MAX_RETRIES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub executor: ExecutorSection,
    pub snapshot: SnapshotSection,
}

/// [app] 段：应用名、描述符目录、流程定义目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 处理器描述符根目录（按领域分子目录）
    #[serde(default = "default_descriptors_dir")]
    pub descriptors_dir: PathBuf,
    /// 流程定义目录
    #[serde(default = "default_processes_dir")]
    pub processes_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            descriptors_dir: default_descriptors_dir(),
            processes_dir: default_processes_dir(),
        }
    }
}

fn default_descriptors_dir() -> PathBuf {
    PathBuf::from("config/handlers")
}

fn default_processes_dir() -> PathBuf {
    PathBuf::from("config/processes")
}

/// [executor] 段：并发上限、超时、重试
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    /// 最大并发调用数，不设置则不限
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    /// 单次调用默认超时（秒），可被流程 / 步骤覆盖
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_in_flight: None,
            default_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5000
}

/// [snapshot] 段：步骤快照（JSONL）
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_snapshot_path")]
    pub path: PathBuf,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_snapshot_path(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("workspace/snapshots.jsonl")
}

/// 加载配置：若存在 config/default.toml 则先加载，再叠加指定文件与环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
