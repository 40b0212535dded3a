pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::{cli::LocalStorage, CliConfig};
pub use crate::config::StencilConfig;

pub use crate::core::{
    context::Context,
    engine::RenderEngine,
    filters::FilterRegistry,
    loader::TemplateLoader,
    template::Template,
};
pub use crate::utils::error::{Result, StencilError};
