#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
use crate::core::ConfigProvider;
#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use crate::utils::validation::Validate;
#[cfg(feature = "cli")]
use clap::{parser::ValueSource, ArgMatches, Parser};
#[cfg(feature = "cli")]
use serde::{Deserialize, Serialize};

pub use toml_config::StencilConfig;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "stencil")]
#[command(about = "Render Django-style templates with a JSON or TOML context")]
pub struct CliConfig {
    /// Template names, resolved against the template paths
    pub templates: Vec<String>,

    /// Directories searched for templates, in order
    #[arg(short = 't', long, value_delimiter = ',', default_value = ".")]
    pub template_path: Vec<String>,

    /// Context document (.json or .toml)
    #[arg(short, long)]
    pub context: Option<String>,

    #[arg(short, long, default_value = "./output")]
    pub output_path: String,

    #[arg(long, default_value = "4")]
    pub concurrency: usize,

    /// Print rendered output instead of writing files
    #[arg(long)]
    pub stdout: bool,

    /// Load settings from a TOML config file
    #[arg(long)]
    pub config: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[cfg(feature = "cli")]
impl ConfigProvider for CliConfig {
    fn template_paths(&self) -> &[String] {
        &self.template_path
    }

    fn context_file(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn output_path(&self) -> &str {
        &self.output_path
    }

    fn templates(&self) -> &[String] {
        &self.templates
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 命令列上明確給定的選項覆蓋 TOML 設定；回傳被覆蓋的欄位
    pub fn apply_overrides(&self, matches: &ArgMatches, file: &mut StencilConfig) -> Vec<&'static str> {
        let explicit = |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);
        let mut overridden = Vec::new();

        if !self.templates.is_empty() {
            file.render.templates = self.templates.clone();
            overridden.push("templates");
        }
        if explicit("template_path") {
            file.loader.paths = self.template_path.clone();
            overridden.push("template_path");
        }
        if explicit("context") {
            file.render.context_file = self.context.clone();
            overridden.push("context");
        }
        if explicit("output_path") {
            file.render.output_path = self.output_path.clone();
            overridden.push("output_path");
        }
        if explicit("concurrency") {
            file.render.concurrency = Some(self.concurrency);
            overridden.push("concurrency");
        }

        overridden
    }
}

#[cfg(feature = "cli")]
impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_provider(self)
    }
}

/// 兩種設定來源共用的檢查
pub fn validate_provider(config: &dyn crate::core::ConfigProvider) -> crate::utils::error::Result<()> {
    use crate::utils::validation::{
        validate_file_extensions, validate_non_empty_list, validate_path, validate_positive_number,
        validate_template_name,
    };

    validate_non_empty_list("templates", config.templates())?;
    for name in config.templates() {
        validate_template_name(name)?;
    }

    validate_non_empty_list("template_path", config.template_paths())?;
    for path in config.template_paths() {
        validate_path("template_path", path)?;
    }

    validate_path("output_path", config.output_path())?;
    validate_positive_number("concurrency", config.concurrency(), 1)?;

    if let Some(context) = config.context_file() {
        validate_path("context", context)?;
        validate_file_extensions("context", &[context.to_string()], &["json", "toml"])?;
    }

    Ok(())
}
