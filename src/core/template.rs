use crate::core::context::{display_value, truthy, value_kind, Context};
use crate::core::loader::TemplateLoader;
use crate::core::tokenizer::tokenize;
use crate::domain::model::{Node, Token, TokenKind};
use crate::utils::error::{Result, StencilError};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock, Weak};

static TAG_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+").expect("tag name pattern is valid"));

pub const MAX_INCLUDE_DEPTH: usize = 16;

/// 巢狀 `for`/`if` 的上限，同時限制解析與渲染的遞迴深度
pub const MAX_NESTING_DEPTH: usize = 64;

/// 區塊的開啟標籤與對應的結束標籤
#[derive(Debug, Clone, Copy)]
struct Closing {
    tag: &'static str,
    end: &'static str,
}

#[derive(Debug)]
pub struct Template {
    src: String,
    nodes: Vec<Node>,
    loader: Option<Weak<TemplateLoader>>,
}

impl Template {
    /// 解析不綁定 loader 的模板；`{% include %}` 會在此報錯
    pub fn parse(src: impl Into<String>) -> Result<Self> {
        Self::parse_bound(src.into(), None)
    }

    pub fn parse_with_loader(src: impl Into<String>, loader: &Arc<TemplateLoader>) -> Result<Self> {
        Self::parse_bound(src.into(), Some(Arc::downgrade(loader)))
    }

    pub(crate) fn parse_bound(src: String, loader: Option<Weak<TemplateLoader>>) -> Result<Self> {
        let mut tokens = tokenize(&src).into_iter();
        let nodes = Parser {
            has_loader: loader.is_some(),
        }
        .parse_until(&mut tokens, None, 0)?;

        tracing::debug!("Parsed template into {} top-level nodes", nodes.len());
        Ok(Self { src, nodes, loader })
    }

    pub fn source(&self) -> &str {
        &self.src
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// 以 JSON 物件作為上下文渲染
    pub fn render_value(&self, data: Value) -> Result<String> {
        let mut context = Context::from_value(data)?;
        if let Some(loader) = self.loader.as_ref().and_then(Weak::upgrade) {
            context.set_filters(loader.filters());
        }
        self.render(&mut context)
    }

    pub fn render(&self, context: &mut Context) -> Result<String> {
        let mut out = String::with_capacity(self.src.len());
        self.render_nodes(&self.nodes, context, &mut out, 0)?;
        Ok(out)
    }

    fn render_nodes(
        &self,
        nodes: &[Node],
        context: &mut Context,
        out: &mut String,
        depth: usize,
    ) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Var(expr) => out.push_str(&display_value(&context.resolve(expr)?)),
                Node::For {
                    var,
                    iterable,
                    body,
                } => {
                    let items = iterate(context.resolve(iterable)?, iterable)?;
                    context.push();
                    let result = self.render_loop(var, items, body, context, out, depth);
                    context.pop();
                    result?;
                }
                Node::If {
                    negated,
                    condition,
                    body,
                } => {
                    if truthy(&context.resolve(condition)?) ^ negated {
                        self.render_nodes(body, context, out, depth)?;
                    }
                }
                Node::Include { name } => self.render_include(name, context, out, depth)?,
                Node::Load { name } => {
                    let extension = self
                        .loader()
                        .and_then(|loader| loader.extension(name))
                        .ok_or_else(|| StencilError::UnknownExtension { name: name.clone() })?;
                    out.push_str(&extension(context)?);
                }
            }
        }
        Ok(())
    }

    fn render_loop(
        &self,
        var: &str,
        items: Vec<Value>,
        body: &[Node],
        context: &mut Context,
        out: &mut String,
        depth: usize,
    ) -> Result<()> {
        for (idx, item) in items.into_iter().enumerate() {
            context.set("loopcounter", Value::from(idx));
            context.set(var, item);
            self.render_nodes(body, context, out, depth)?;
        }
        Ok(())
    }

    fn render_include(
        &self,
        name: &str,
        context: &mut Context,
        out: &mut String,
        depth: usize,
    ) -> Result<()> {
        if depth >= MAX_INCLUDE_DEPTH {
            return Err(StencilError::IncludeDepthExceeded {
                name: name.to_string(),
                limit: MAX_INCLUDE_DEPTH,
            });
        }

        let loader = self.loader().ok_or(StencilError::IncludeWithoutLoader)?;
        let template = loader.get(name)?;
        tracing::trace!("Including template '{}'", name);

        context.push();
        let result = template.render_nodes(&template.nodes, context, out, depth + 1);
        context.pop();
        result
    }

    fn loader(&self) -> Option<Arc<TemplateLoader>> {
        self.loader.as_ref().and_then(Weak::upgrade)
    }
}

fn iterate(value: Value, expr: &str) -> Result<Vec<Value>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(k, _)| Value::String(k)).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => {
            tracing::debug!("Cannot iterate {} value of '{}'", value_kind(&other), expr);
            Err(StencilError::NotIterable {
                expr: expr.to_string(),
            })
        }
    }
}

struct Parser {
    has_loader: bool,
}

impl Parser {
    fn parse_until(
        &self,
        tokens: &mut std::vec::IntoIter<Token>,
        closing: Option<Closing>,
        depth: usize,
    ) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();

        while let Some(token) = tokens.next() {
            match token.kind {
                TokenKind::Text => nodes.push(Node::Text(token.content)),
                TokenKind::Var => nodes.push(Node::Var(token.content)),
                TokenKind::Comment => {}
                TokenKind::Block => {
                    let content = token.content.as_str();
                    let name = TAG_NAME_RE
                        .find(content)
                        .ok_or_else(|| StencilError::syntax(format!("invalid block tag '{}'", content)))?;
                    let args = content[name.end()..].trim();

                    match name.as_str() {
                        tag @ ("for" | "if") if depth >= MAX_NESTING_DEPTH => {
                            return Err(StencilError::syntax(format!(
                                "'{}' nested deeper than {} blocks",
                                tag, MAX_NESTING_DEPTH
                            )));
                        }
                        "for" => nodes.push(self.parse_for(args, tokens, depth + 1)?),
                        "if" => nodes.push(self.parse_if(args, tokens, depth + 1)?),
                        "include" => nodes.push(self.parse_include(args)?),
                        "load" => {
                            if args.is_empty() {
                                return Err(StencilError::syntax("load tag requires an extension name"));
                            }
                            nodes.push(Node::Load {
                                name: args.to_string(),
                            });
                        }
                        end @ ("endfor" | "endif") => {
                            return match closing {
                                Some(c) if c.end == end => Ok(nodes),
                                _ => Err(StencilError::UnexpectedEndTag {
                                    found: end.to_string(),
                                    expected: closing.map(|c| c.end.to_string()),
                                }),
                            };
                        }
                        other => {
                            return Err(StencilError::UnknownTag {
                                name: other.to_string(),
                            })
                        }
                    }
                }
            }
        }

        match closing {
            Some(c) => Err(StencilError::UnclosedBlock {
                tag: c.tag.to_string(),
                expected: c.end.to_string(),
            }),
            None => Ok(nodes),
        }
    }

    fn parse_for(
        &self,
        args: &str,
        tokens: &mut std::vec::IntoIter<Token>,
        depth: usize,
    ) -> Result<Node> {
        let (var, iterable) = args
            .split_once(" in ")
            .map(|(v, i)| (v.trim(), i.trim()))
            .filter(|(v, i)| !v.is_empty() && !i.is_empty())
            .ok_or_else(|| {
                StencilError::syntax(format!("expected 'for <name> in <expr>', got 'for {}'", args))
            })?;

        let body = self.parse_until(
            tokens,
            Some(Closing {
                tag: "for",
                end: "endfor",
            }),
            depth,
        )?;

        Ok(Node::For {
            var: var.to_string(),
            iterable: iterable.to_string(),
            body,
        })
    }

    fn parse_if(
        &self,
        args: &str,
        tokens: &mut std::vec::IntoIter<Token>,
        depth: usize,
    ) -> Result<Node> {
        let (negated, condition) = match args.split_once(' ') {
            Some(("not", rest)) => (true, rest.trim()),
            _ if args == "not" => (true, ""),
            _ => (false, args),
        };
        if condition.is_empty() {
            return Err(StencilError::syntax("if tag requires a condition"));
        }

        let body = self.parse_until(
            tokens,
            Some(Closing {
                tag: "if",
                end: "endif",
            }),
            depth,
        )?;

        Ok(Node::If {
            negated,
            condition: condition.to_string(),
            body,
        })
    }

    fn parse_include(&self, args: &str) -> Result<Node> {
        if !self.has_loader {
            return Err(StencilError::IncludeWithoutLoader);
        }
        if args.is_empty() {
            return Err(StencilError::syntax("include tag requires a template name"));
        }
        Ok(Node::Include {
            name: args.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(src: &str, data: Value) -> Result<String> {
        Template::parse(src)?.render_value(data)
    }

    #[test]
    fn test_text_and_vars() {
        let out = render("Hello {{ name }}! You are {{ age }}.", json!({"name": "Ada", "age": 36})).unwrap();
        assert_eq!(out, "Hello Ada! You are 36.");
    }

    #[test]
    fn test_missing_var_renders_empty() {
        assert_eq!(render("[{{ nope }}]", json!({})).unwrap(), "[]");
    }

    #[test]
    fn test_comments_are_dropped() {
        assert_eq!(render("a{# hidden #}b", json!({})).unwrap(), "ab");
    }

    #[test]
    fn test_for_loop_with_counter() {
        let out = render(
            "{% for item in items %}{{ loopcounter }}={{ item }};{% endfor %}",
            json!({"items": ["a", "b", "c"]}),
        )
        .unwrap();
        assert_eq!(out, "0=a;1=b;2=c;");
    }

    #[test]
    fn test_for_loop_scope_is_popped() {
        let template = Template::parse("{% for x in xs %}{{ x }}{% endfor %}[{{ x }}]").unwrap();
        let mut context = Context::from_value(json!({"xs": [1, 2], "x": "outer"})).unwrap();
        assert_eq!(template.render(&mut context).unwrap(), "12[outer]");
        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn test_for_over_object_string_and_null() {
        assert_eq!(
            render("{% for k in m %}{{ k }},{% endfor %}", json!({"m": {"zeta": 1, "alpha": 2}})).unwrap(),
            "zeta,alpha,"
        );
        assert_eq!(render("{% for c in s %}<{{ c }}>{% endfor %}", json!({"s": "hi"})).unwrap(), "<h><i>");
        assert_eq!(render("{% for c in missing %}x{% endfor %}", json!({})).unwrap(), "");
    }

    #[test]
    fn test_for_over_number_fails() {
        let err = render("{% for c in n %}x{% endfor %}", json!({"n": 3})).unwrap_err();
        assert!(matches!(err, StencilError::NotIterable { ref expr } if expr == "n"));
    }

    #[test]
    fn test_nested_loops_and_dotted_access() {
        let data = json!({
            "groups": [
                {"name": "g1", "members": [{"name": "a"}, {"name": "b"}]},
                {"name": "g2", "members": []}
            ]
        });
        let out = render(
            "{% for g in groups %}{{ g.name }}:{% for m in g.members %}{{ m.name|upper }}{% endfor %};{% endfor %}",
            data,
        )
        .unwrap();
        assert_eq!(out, "g1:AB;g2:;");
    }

    #[test]
    fn test_if_and_if_not() {
        let src = "{% if flag %}yes{% endif %}{% if not flag %}no{% endif %}";
        assert_eq!(render(src, json!({"flag": true})).unwrap(), "yes");
        assert_eq!(render(src, json!({"flag": []})).unwrap(), "no");
        assert_eq!(render(src, json!({})).unwrap(), "no");
    }

    #[test]
    fn test_if_with_filter() {
        let src = "{% if items|length %}has items{% endif %}";
        assert_eq!(render(src, json!({"items": [1]})).unwrap(), "has items");
        assert_eq!(render(src, json!({"items": []})).unwrap(), "");
    }

    #[test]
    fn test_parse_tree_shape() {
        let template = Template::parse("a{% if x %}{{ y }}{% endif %}").unwrap();
        assert_eq!(
            template.nodes(),
            &[
                Node::Text("a".to_string()),
                Node::If {
                    negated: false,
                    condition: "x".to_string(),
                    body: vec![Node::Var("y".to_string())],
                },
            ]
        );
    }

    #[test]
    fn test_unclosed_block() {
        let err = Template::parse("{% for x in xs %}{{ x }}").unwrap_err();
        assert!(matches!(
            err,
            StencilError::UnclosedBlock { ref tag, ref expected } if tag == "for" && expected == "endfor"
        ));
    }

    #[test]
    fn test_mismatched_and_stray_end_tags() {
        let err = Template::parse("{% for x in xs %}{% endif %}").unwrap_err();
        assert!(matches!(
            err,
            StencilError::UnexpectedEndTag { ref found, expected: Some(ref e) } if found == "endif" && e == "endfor"
        ));

        let err = Template::parse("text{% endfor %}").unwrap_err();
        assert!(matches!(err, StencilError::UnexpectedEndTag { expected: None, .. }));
    }

    #[test]
    fn test_unknown_and_malformed_tags() {
        assert!(matches!(
            Template::parse("{% block x %}").unwrap_err(),
            StencilError::UnknownTag { ref name } if name == "block"
        ));
        assert!(matches!(
            Template::parse("{% !! %}").unwrap_err(),
            StencilError::SyntaxError { .. }
        ));
        assert!(matches!(
            Template::parse("{% for x %}{% endfor %}").unwrap_err(),
            StencilError::SyntaxError { .. }
        ));
        assert!(matches!(
            Template::parse("{% if not %}{% endif %}").unwrap_err(),
            StencilError::SyntaxError { .. }
        ));
    }

    fn nested_ifs(n: usize) -> String {
        format!("{}x{}", "{% if a %}".repeat(n), "{% endif %}".repeat(n))
    }

    #[test]
    fn test_nesting_at_limit_renders() {
        let template = Template::parse(nested_ifs(MAX_NESTING_DEPTH)).unwrap();
        assert_eq!(template.render_value(json!({"a": true})).unwrap(), "x");
    }

    #[test]
    fn test_nesting_past_limit_is_syntax_error() {
        for n in [MAX_NESTING_DEPTH + 1, 500, 20_000] {
            let err = Template::parse(nested_ifs(n)).unwrap_err();
            assert!(matches!(err, StencilError::SyntaxError { .. }), "n = {}", n);
        }

        let deep_for = format!(
            "{}{}",
            "{% for x in xs %}".repeat(MAX_NESTING_DEPTH + 1),
            "{% endfor %}".repeat(MAX_NESTING_DEPTH + 1)
        );
        assert!(matches!(
            Template::parse(deep_for).unwrap_err(),
            StencilError::SyntaxError { .. }
        ));
    }

    #[test]
    fn test_include_without_loader() {
        let err = Template::parse("{% include header.html %}").unwrap_err();
        assert!(matches!(err, StencilError::IncludeWithoutLoader));
    }

    #[test]
    fn test_load_without_loader_is_unknown_extension() {
        let err = render("{% load stats %}", json!({})).unwrap_err();
        assert!(matches!(err, StencilError::UnknownExtension { ref name } if name == "stats"));
    }

    #[test]
    fn test_unknown_filter_in_var() {
        let err = render("{{ name|shout }}", json!({"name": "a"})).unwrap_err();
        assert!(matches!(err, StencilError::UnknownFilter { .. }));
    }

    #[test]
    fn test_render_value_requires_object() {
        let template = Template::parse("x").unwrap();
        assert!(matches!(
            template.render_value(json!("nope")).unwrap_err(),
            StencilError::InvalidContext { .. }
        ));
    }
}
