use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Text,
    Var,
    Block,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub content: String,
}

impl Token {
    pub fn new(kind: TokenKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }
}

/// 已解析的模板節點
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Var(String),
    For {
        var: String,
        iterable: String,
        body: Vec<Node>,
    },
    If {
        negated: bool,
        condition: String,
        body: Vec<Node>,
    },
    Include {
        name: String,
    },
    Load {
        name: String,
    },
}
