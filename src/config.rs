//! 配置模块
//!
//! 从 config/default.toml 与环境变量加载（前缀 DRONE，层级分隔符 __）。
//! 环境变量覆盖文件值，例如 DRONE__CLI__PROGRAM=/usr/local/bin/claude。

use serde::Deserialize;

use crate::core::ClientError;

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub cli: CliSection,
    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 子进程工作目录；None 时继承当前进程
    #[serde(default)]
    pub workspace_root: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliSection {
    /// 外部程序路径或可执行名
    #[serde(default = "default_program")]
    pub program: String,
    /// 缓冲模式绝对超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// 流式模式空闲超时（秒）
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// SQLite 文件路径；None 时用内存存储
    #[serde(default)]
    pub db_path: Option<String>,
}

fn default_app_name() -> String {
    "drone".to_string()
}

fn default_program() -> String {
    "claude".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_stream_idle_timeout() -> u64 {
    120
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            workspace_root: None,
        }
    }
}

impl Default for CliSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            request_timeout_secs: default_request_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self { db_path: None }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            cli: CliSection::default(),
            store: StoreSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 DRONE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DRONE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<std::path::PathBuf>) -> Result<AppConfig, ClientError> {
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
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DRONE")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder
        .build()
        .map_err(|e| ClientError::Config(format!("Failed to build config: {}", e)))?;
    settings
        .try_deserialize()
        .map_err(|e| ClientError::Config(format!("Failed to deserialize config: {}", e)))
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, ClientError> {
    load_config(None)
}
