use crate::core::context::Context;
use crate::core::filters::FilterRegistry;
use crate::core::template::Template;
use crate::utils::error::{Result, StencilError};
use crate::utils::validation::validate_template_name;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// `{% load name %}` 執行的擴充
pub type Extension = Arc<dyn Fn(&mut Context) -> Result<String> + Send + Sync>;

/// 依搜尋路徑載入並快取模板
pub struct TemplateLoader {
    paths: Vec<PathBuf>,
    cache: RwLock<HashMap<String, Arc<Template>>>,
    extensions: RwLock<HashMap<String, Extension>>,
    filters: Arc<FilterRegistry>,
    this: Weak<TemplateLoader>,
}

impl std::fmt::Debug for TemplateLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateLoader")
            .field("paths", &self.paths)
            .field("cached", &read(&self.cache).len())
            .field("extensions", &read(&self.extensions).len())
            .finish()
    }
}

impl TemplateLoader {
    pub fn new<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Arc<Self> {
        Self::with_filters(paths, Arc::new(FilterRegistry::builtin()))
    }

    pub fn with_filters<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
        filters: Arc<FilterRegistry>,
    ) -> Arc<Self> {
        let paths: Vec<PathBuf> = paths
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf())
            })
            .collect();
        tracing::debug!("Template search paths: {:?}", paths);

        Arc::new_cyclic(|this| Self {
            paths,
            cache: RwLock::new(HashMap::new()),
            extensions: RwLock::new(HashMap::new()),
            filters,
            this: this.clone(),
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn filters(&self) -> Arc<FilterRegistry> {
        Arc::clone(&self.filters)
    }

    /// 新的上下文，帶有本 loader 的過濾器
    pub fn context(&self, data: serde_json::Map<String, serde_json::Value>) -> Context {
        Context::with_filters(data, self.filters())
    }

    /// 從磁碟讀取並解析，不經過快取。找不到時回傳 `None`
    pub fn load(&self, name: &str) -> Result<Option<Template>> {
        validate_template_name(name)?;

        for dir in &self.paths {
            let full_path = dir.join(name);
            if full_path.is_file() {
                tracing::debug!("Loading template '{}' from {}", name, full_path.display());
                let src = std::fs::read_to_string(&full_path)?;
                return Template::parse_bound(src, Some(self.this.clone())).map(Some);
            }
        }

        Ok(None)
    }

    /// 取得已快取的模板，必要時從磁碟載入
    pub fn get(&self, name: &str) -> Result<Arc<Template>> {
        if let Some(template) = read(&self.cache).get(name) {
            return Ok(Arc::clone(template));
        }

        let template = self
            .load(name)?
            .map(Arc::new)
            .ok_or_else(|| StencilError::TemplateNotFound {
                name: name.to_string(),
            })?;

        let mut cache = write(&self.cache);
        let entry = cache
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&template));
        Ok(Arc::clone(entry))
    }

    /// 註冊記憶體中的模板，覆蓋同名的快取
    pub fn from_string(&self, name: impl Into<String>, src: impl Into<String>) -> Result<Arc<Template>> {
        let name = name.into();
        let template = Arc::new(Template::parse_bound(src.into(), Some(self.this.clone()))?);
        write(&self.cache).insert(name, Arc::clone(&template));
        Ok(template)
    }

    pub fn is_cached(&self, name: &str) -> bool {
        read(&self.cache).contains_key(name)
    }

    pub fn clear_cache(&self) {
        write(&self.cache).clear();
    }

    pub fn register_extension<F>(&self, name: impl Into<String>, extension: F)
    where
        F: Fn(&mut Context) -> Result<String> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!("Registering extension '{}'", name);
        write(&self.extensions).insert(name, Arc::new(extension));
    }

    pub fn extension(&self, name: &str) -> Option<Extension> {
        read(&self.extensions).get(name).cloned()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_template(dir: &TempDir, name: &str, src: &str) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, src).unwrap();
    }

    #[test]
    fn test_first_path_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_template(&first, "page.txt", "first");
        write_template(&second, "page.txt", "second");
        write_template(&second, "only.txt", "only second");

        let loader = TemplateLoader::new([first.path(), second.path()]);
        assert_eq!(loader.get("page.txt").unwrap().source(), "first");
        assert_eq!(loader.get("only.txt").unwrap().source(), "only second");
    }

    #[test]
    fn test_cache_returns_same_template() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "a.txt", "A");
        let loader = TemplateLoader::new([dir.path()]);

        assert!(!loader.is_cached("a.txt"));
        let one = loader.get("a.txt").unwrap();
        assert!(loader.is_cached("a.txt"));

        // 快取命中時不再讀取磁碟
        fs::write(dir.path().join("a.txt"), "changed").unwrap();
        let two = loader.get("a.txt").unwrap();
        assert!(Arc::ptr_eq(&one, &two));

        loader.clear_cache();
        assert_eq!(loader.get("a.txt").unwrap().source(), "changed");
    }

    #[test]
    fn test_missing_template() {
        let dir = TempDir::new().unwrap();
        let loader = TemplateLoader::new([dir.path()]);
        assert!(loader.load("nope.txt").unwrap().is_none());
        assert!(matches!(
            loader.get("nope.txt").unwrap_err(),
            StencilError::TemplateNotFound { ref name } if name == "nope.txt"
        ));
    }

    #[test]
    fn test_rejects_escaping_names() {
        let dir = TempDir::new().unwrap();
        let loader = TemplateLoader::new([dir.path()]);
        assert!(matches!(
            loader.get("../etc/passwd").unwrap_err(),
            StencilError::InvalidTemplateName { .. }
        ));
    }

    #[test]
    fn test_include_renders_with_pushed_layer() {
        let loader = TemplateLoader::new(Vec::<PathBuf>::new());
        loader.from_string("item.txt", "[{{ item }}]").unwrap();
        let page = loader
            .from_string("page.txt", "{% for item in items %}{% include item.txt %}{% endfor %}")
            .unwrap();

        let out = page.render_value(json!({"items": [1, 2]})).unwrap();
        assert_eq!(out, "[1][2]");
    }

    #[test]
    fn test_include_missing_template_fails_at_render() {
        let loader = TemplateLoader::new(Vec::<PathBuf>::new());
        let page = loader.from_string("page.txt", "{% include gone.txt %}").unwrap();
        assert!(matches!(
            page.render_value(json!({})).unwrap_err(),
            StencilError::TemplateNotFound { .. }
        ));
    }

    #[test]
    fn test_recursive_include_is_bounded() {
        let loader = TemplateLoader::new(Vec::<PathBuf>::new());
        let page = loader.from_string("loop.txt", "x{% include loop.txt %}").unwrap();
        assert!(matches!(
            page.render_value(json!({})).unwrap_err(),
            StencilError::IncludeDepthExceeded { .. }
        ));
    }

    #[test]
    fn test_load_runs_registered_extension() {
        let loader = TemplateLoader::new(Vec::<PathBuf>::new());
        loader.register_extension("greeting", |context: &mut Context| {
            context.set("greeting", json!("hello"));
            Ok("<loaded>".to_string())
        });
        let page = loader
            .from_string("page.txt", "{% load greeting %}{{ greeting }}")
            .unwrap();
        assert_eq!(page.render_value(json!({})).unwrap(), "<loaded>hello");

        let missing = loader.from_string("bad.txt", "{% load nope %}").unwrap();
        assert!(matches!(
            missing.render_value(json!({})).unwrap_err(),
            StencilError::UnknownExtension { .. }
        ));
    }

    #[test]
    fn test_loader_filters_are_used() {
        let mut filters = FilterRegistry::new();
        filters.register("shout", |v: serde_json::Value| {
            Ok(json!(format!("{}!", v.as_str().unwrap_or_default())))
        });
        let loader = TemplateLoader::with_filters(Vec::<PathBuf>::new(), Arc::new(filters));
        let page = loader.from_string("p.txt", "{{ word|shout }}").unwrap();
        assert_eq!(page.render_value(json!({"word": "hey"})).unwrap(), "hey!");

        let mut context = loader.context(serde_json::Map::new());
        context.set("word", json!("yo"));
        assert_eq!(page.render(&mut context).unwrap(), "yo!");
    }
}
