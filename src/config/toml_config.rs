use crate::core::ConfigProvider;
use crate::utils::error::{Result, StencilError};
use crate::utils::validation::Validate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StencilConfig {
    pub loader: LoaderConfig,
    pub render: RenderConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    pub templates: Vec<String>,
    pub context_file: Option<String>,
    pub output_path: String,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub json: Option<bool>,
    pub verbose: Option<bool>,
}

impl StencilConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| StencilError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${TEMPLATE_DIR})；未設定的保持原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_RE
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| {
                    tracing::warn!("Environment variable '{}' is not set", var_name);
                    format!("${{{}}}", var_name)
                })
            })
            .into_owned()
    }

    pub fn json_logs(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.json).unwrap_or(false)
    }

    pub fn verbose(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.verbose).unwrap_or(false)
    }
}

impl ConfigProvider for StencilConfig {
    fn template_paths(&self) -> &[String] {
        &self.loader.paths
    }

    fn context_file(&self) -> Option<&str> {
        self.render.context_file.as_deref()
    }

    fn output_path(&self) -> &str {
        &self.render.output_path
    }

    fn templates(&self) -> &[String] {
        &self.render.templates
    }

    fn concurrency(&self) -> usize {
        self.render.concurrency.unwrap_or(4)
    }
}

impl Validate for StencilConfig {
    fn validate(&self) -> Result<()> {
        crate::config::validate_provider(self)
    }
}
