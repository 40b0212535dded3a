use crate::core::context::value_kind;
use crate::core::loader::TemplateLoader;
use crate::core::Storage;
use crate::utils::error::{Result, StencilError};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

const TEMPLATE_EXTENSIONS: [&str; 2] = [".tmpl", ".stencil"];

/// 一次渲染多個模板並透過 `Storage` 寫出
pub struct RenderEngine<S: Storage> {
    storage: S,
    loader: Arc<TemplateLoader>,
    concurrency: usize,
}

impl<S: Storage> RenderEngine<S> {
    pub fn new(storage: S, loader: Arc<TemplateLoader>) -> Self {
        Self::with_concurrency(storage, loader, 4)
    }

    pub fn with_concurrency(storage: S, loader: Arc<TemplateLoader>, concurrency: usize) -> Self {
        Self {
            storage,
            loader,
            concurrency: concurrency.max(1),
        }
    }

    pub fn loader(&self) -> &Arc<TemplateLoader> {
        &self.loader
    }

    /// 渲染單一模板為字串
    pub fn render_one(&self, name: &str, context: &Map<String, Value>) -> Result<String> {
        render_template(&self.loader, name, context.clone())
    }

    /// 所有模板都渲染成功後才寫出；任一失敗時不寫入任何檔案
    pub async fn run(&self, templates: &[String], context: Value) -> Result<Vec<String>> {
        let context = match context {
            Value::Object(map) => map,
            other => {
                return Err(StencilError::InvalidContext {
                    kind: value_kind(&other).to_string(),
                })
            }
        };

        tracing::info!(
            "Rendering {} template(s) with concurrency {}",
            templates.len(),
            self.concurrency
        );
        let started = Instant::now();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(templates.len());

        for name in templates {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| StencilError::TaskError {
                    message: e.to_string(),
                })?;
            let loader = Arc::clone(&self.loader);
            let context = context.clone();
            let name = name.clone();

            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let started = Instant::now();
                let output = render_template(&loader, &name, context);
                tracing::debug!("Rendered '{}' in {:?}", name, started.elapsed());
                output
            }));
        }

        let mut outputs = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for (name, handle) in templates.iter().zip(handles) {
            let result = handle
                .await
                .map_err(|e| StencilError::TaskError {
                    message: format!("{}: {}", name, e),
                })
                .and_then(|output| output);
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    tracing::error!("Failed to render '{}': {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut written = Vec::with_capacity(outputs.len());
        for (name, output) in templates.iter().zip(outputs) {
            let path = self
                .storage
                .write_file(&output_name(name), output.as_bytes())
                .await?;
            tracing::info!("Wrote '{}' -> {}", name, path);
            written.push(path);
        }

        tracing::info!(
            "Finished rendering {} template(s) in {:?}",
            written.len(),
            started.elapsed()
        );
        Ok(written)
    }
}

fn render_template(loader: &TemplateLoader, name: &str, context: Map<String, Value>) -> Result<String> {
    let template = loader.get(name)?;
    let mut context = loader.context(context);
    template.render(&mut context)
}

/// `page.html.tmpl` -> `page.html`
pub fn output_name(template_name: &str) -> String {
    TEMPLATE_EXTENSIONS
        .iter()
        .find_map(|ext| template_name.strip_suffix(ext))
        .filter(|stem| !stem.is_empty())
        .unwrap_or(template_name)
        .to_string()
}

/// 讀取 JSON 或 TOML 格式的上下文檔案
pub async fn load_context_file(path: &str) -> Result<Value> {
    let content = tokio::fs::read_to_string(path).await?;
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    let value: Value = match extension {
        "json" => serde_json::from_str(&content)?,
        "toml" => toml::from_str(&content)?,
        other => {
            return Err(StencilError::InvalidConfigValueError {
                field: "context_file".to_string(),
                value: path.to_string(),
                reason: format!("Unsupported context format '{}'. Use .json or .toml", other),
            })
        }
    };

    if !value.is_object() {
        return Err(StencilError::InvalidContext {
            kind: value_kind(&value).to_string(),
        });
    }

    tracing::debug!("Loaded context from {}", path);
    Ok(value)
}
