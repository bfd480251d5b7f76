use dm_error::{DmError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "configs/default.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerCfg,
    pub provider: ProviderCfg,
    pub store: StoreCfg,
    #[serde(default)]
    pub chat: ChatCfg,
    #[serde(default)]
    pub auth: AuthCfg,
    #[serde(default)]
    pub upload: UploadCfg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerCfg {
    pub host: String,
    pub port: u16,
}

/// 模型服务配置；`kind` 为 gemini（直连）或 proxy（经边缘函数中转）
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCfg {
    pub kind: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
}

/// 记录存储配置；`kind` 为 memory 或 supabase
#[derive(Debug, Clone, Deserialize)]
pub struct StoreCfg {
    pub kind: String,
    pub url: Option<String>,
    pub anon_key_env: Option<String>,
    pub bucket: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCfg {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for ChatCfg {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            history_window: default_history_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthCfg {
    /// SHA-256 十六进制摘要；为空时使用内置默认值
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadCfg {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for UploadCfg {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_history_window() -> usize {
    10
}

fn default_max_bytes() -> usize {
    20 * 1024 * 1024
}

impl AppConfig {
    pub fn from_yaml(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).map_err(|e| DmError::Configuration {
            key: "yaml".to_string(),
            reason: e.to_string(),
        })
    }

    /// 读取配置文件；`DOCUMIND_CONFIG` 可覆盖默认路径
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var("DOCUMIND_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        let s = std::fs::read_to_string(&path).map_err(|e| DmError::Configuration {
            key: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let cfg = Self::from_yaml(&s)?;
        tracing::info!(path = %path.display(), provider = %cfg.provider.kind, store = %cfg.store.kind, "config loaded");
        Ok(cfg)
    }
}

/// 读取环境变量中的密钥
pub fn read_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| DmError::Configuration {
        key: key.to_string(),
        reason: "missing env".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server:
  host: 127.0.0.1
  port: 8080
provider:
  kind: proxy
  base_url: https://example.supabase.co
  api_key_env: SUPABASE_ANON_KEY
store:
  kind: memory
"#;

    #[test]
    fn test_parse_with_defaults() {
        let cfg = AppConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.provider.kind, "proxy");
        assert_eq!(cfg.chat.history_window, 10);
        assert_eq!(cfg.chat.data_dir, "data");
        assert!(cfg.auth.password_hash.is_none());
        assert_eq!(cfg.upload.max_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.store.kind, "memory");
    }

    #[test]
    fn test_invalid_yaml_is_configuration_error() {
        let err = AppConfig::from_yaml("server: [").unwrap_err();
        assert!(matches!(err, DmError::Configuration { .. }));
    }
}
