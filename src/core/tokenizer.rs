use crate::domain::model::{Token, TokenKind};
use regex::Regex;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{%\s*(?P<block>.+?)\s*%\}|\{\{\s*(?P<var>.+?)\s*\}\}|\{#\s*(?P<comment>.+?)\s*#\}")
        .expect("tag pattern is valid")
});

/// 將模板原始碼切分為 token 序列
pub fn tokenize(src: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut upto = 0;

    for caps in TAG_RE.captures_iter(src) {
        let Some(whole) = caps.get(0) else { continue };
        if upto < whole.start() {
            tokens.push(Token::new(TokenKind::Text, &src[upto..whole.start()]));
        }
        upto = whole.end();

        let (kind, content) = if let Some(m) = caps.name("block") {
            (TokenKind::Block, m.as_str())
        } else if let Some(m) = caps.name("var") {
            (TokenKind::Var, m.as_str())
        } else if let Some(m) = caps.name("comment") {
            (TokenKind::Comment, m.as_str())
        } else {
            continue;
        };
        tokens.push(Token::new(kind, content.trim()));
    }

    if upto < src.len() {
        tokens.push(Token::new(TokenKind::Text, &src[upto..]));
    }

    tracing::trace!("Tokenized template into {} tokens", tokens.len());
    tokens
}
