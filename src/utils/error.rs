use thiserror::Error;

#[derive(Error, Debug)]
pub enum StencilError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Template syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Unknown block tag '{name}'")]
    UnknownTag { name: String },

    #[error("Unclosed '{tag}' block: expected '{{% {expected} %}}' before end of template")]
    UnclosedBlock { tag: String, expected: String },

    #[error("Unexpected '{{% {found} %}}'{}", expected_suffix(.expected))]
    UnexpectedEndTag {
        found: String,
        expected: Option<String>,
    },

    #[error("Unknown filter function {filter} : {expr}")]
    UnknownFilter { filter: String, expr: String },

    #[error("Filter '{filter}' failed: {message}")]
    FilterError { filter: String, message: String },

    #[error("Can't use {{% include %}} without a bound loader")]
    IncludeWithoutLoader,

    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("Invalid template name '{name}': {reason}")]
    InvalidTemplateName { name: String, reason: String },

    #[error("Unknown extension '{name}'")]
    UnknownExtension { name: String },

    #[error("Include depth limit of {limit} exceeded while including '{name}'")]
    IncludeDepthExceeded { name: String, limit: usize },

    #[error("Value of '{expr}' is not iterable")]
    NotIterable { expr: String },

    #[error("Render context must be an object, got {kind}")]
    InvalidContext { kind: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid configuration value for '{field}': '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Render task failed: {message}")]
    TaskError { message: String },
}

fn expected_suffix(expected: &Option<String>) -> String {
    match expected {
        Some(tag) => format!(", expected '{{% {} %}}'", tag),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Template,
    Render,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl StencilError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::SyntaxError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SyntaxError { .. }
            | Self::UnknownTag { .. }
            | Self::UnclosedBlock { .. }
            | Self::UnexpectedEndTag { .. }
            | Self::IncludeWithoutLoader
            | Self::TemplateNotFound { .. }
            | Self::InvalidTemplateName { .. } => ErrorCategory::Template,
            Self::UnknownFilter { .. }
            | Self::FilterError { .. }
            | Self::UnknownExtension { .. }
            | Self::IncludeDepthExceeded { .. }
            | Self::NotIterable { .. }
            | Self::InvalidContext { .. } => ErrorCategory::Render,
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::SerializationError(_)
            | Self::TomlError(_) => ErrorCategory::Configuration,
            Self::IoError(_) | Self::TaskError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Render => ErrorSeverity::Medium,
            ErrorCategory::Template | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::SyntaxError { .. } | Self::UnknownTag { .. } => {
                "Check the block tags in the template; supported tags are for, if, include and load"
            }
            Self::UnclosedBlock { .. } | Self::UnexpectedEndTag { .. } => {
                "Make sure every {% for %} has an {% endfor %} and every {% if %} has an {% endif %}"
            }
            Self::UnknownFilter { .. } => "Register the filter or remove it from the expression",
            Self::FilterError { .. } => "Check the value passed to the filter",
            Self::IncludeWithoutLoader => "Parse the template through a TemplateLoader",
            Self::TemplateNotFound { .. } => "Check the template name and the --template-path directories",
            Self::InvalidTemplateName { .. } => "Use a relative template name without '..' components",
            Self::UnknownExtension { .. } => "Register the extension on the loader before rendering",
            Self::IncludeDepthExceeded { .. } => "Check for templates that include themselves",
            Self::NotIterable { .. } => "Only lists, objects and strings can be looped over",
            Self::InvalidContext { .. } => "The context document must be a JSON object or TOML table",
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. } => "Review the command line arguments or config file",
            Self::SerializationError(_) | Self::TomlError(_) => "Check the context or config file format",
            Self::IoError(_) => "Check that the files exist and are readable/writable",
            Self::TaskError { .. } => "Retry the render; this is likely an internal error",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Template => format!("Template problem: {}", self),
            ErrorCategory::Render => format!("Rendering failed: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, StencilError>;
