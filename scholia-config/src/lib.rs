use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub frontend: FrontendConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `SCHOLIA_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

pub const CONFIG_ENV: &str = "SCHOLIA_CONFIG";

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnderlineMode {
    #[default]
    TopLevel,
    Defined,
}

/// 注释层的特性开关。
#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "OverlayConfig::default_equation_diagrams")]
    pub equation_diagrams: bool,
    #[serde(default)]
    pub underline_policy: UnderlineMode,
    #[serde(default)]
    pub ignored_term_types: Vec<String>,
    /// 符号匹配的最大等级；缺省表示不过滤。
    #[serde(default)]
    pub max_symbol_match_rank: Option<u32>,
}

impl OverlayConfig {
    fn default_equation_diagrams() -> bool {
        true
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            equation_diagrams: Self::default_equation_diagrams(),
            underline_policy: UnderlineMode::default(),
            ignored_term_types: Vec::new(),
            max_symbol_match_rank: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "NavigationConfig::default_margin_x")]
    pub margin_x: f64,
    #[serde(default = "NavigationConfig::default_margin_y")]
    pub margin_y: f64,
    #[serde(default = "NavigationConfig::default_history_size")]
    pub history_size: usize,
}

impl NavigationConfig {
    fn default_margin_x() -> f64 {
        32.0
    }

    fn default_margin_y() -> f64 {
        96.0
    }

    fn default_history_size() -> usize {
        64
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            margin_x: Self::default_margin_x(),
            margin_y: Self::default_margin_y(),
            history_size: Self::default_history_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "NotificationConfig::default_duration_ms")]
    pub duration_ms: u64,
}

impl NotificationConfig {
    fn default_duration_ms() -> u64 {
        5_000
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            duration_ms: Self::default_duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrontendConfig {
    /// 启动时加载的实体快照；缺省时使用内置演示数据。
    #[serde(default)]
    pub document: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
