pub mod context;
pub mod engine;
pub mod filters;
pub mod loader;
pub mod template;
pub mod tokenizer;

pub use crate::domain::model::{Node, Token, TokenKind};
pub use crate::domain::ports::{ConfigProvider, Storage};
pub use crate::utils::error::Result;
