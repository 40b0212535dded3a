use clap::{CommandFactory, FromArgMatches};
use serde_json::Value;
use stencil::core::engine::load_context_file;
use stencil::core::ConfigProvider;
use stencil::utils::error::{ErrorSeverity, StencilError};
use stencil::utils::{logger, validation::Validate};
use stencil::{CliConfig, LocalStorage, RenderEngine, StencilConfig, TemplateLoader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = CliConfig::command().get_matches();
    let cli = CliConfig::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    // 載入 TOML 配置（若有指定）
    let file_config = match cli.config.as_deref().map(StencilConfig::from_file).transpose() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file: {}", e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    let verbose = cli.verbose || file_config.as_ref().is_some_and(|c| c.verbose());
    if cli.json_logs || file_config.as_ref().is_some_and(|c| c.json_logs()) {
        logger::init_json_logger(verbose);
    } else {
        logger::init_cli_logger(verbose);
    }

    tracing::info!("Starting stencil");
    tracing::debug!("CLI config: {:?}", cli);

    let config: Box<dyn ConfigProvider> = match file_config {
        Some(mut file) => {
            for field in cli.apply_overrides(&matches, &mut file) {
                tracing::info!("🔧 {} overridden from command line", field);
            }
            if let Err(e) = file.validate() {
                exit_with(&e);
            }
            Box::new(file)
        }
        None => {
            if let Err(e) = cli.validate() {
                exit_with(&e);
            }
            Box::new(cli.clone())
        }
    };

    match run(config.as_ref(), cli.stdout).await {
        Ok(paths) => {
            if !cli.stdout {
                tracing::info!("✅ Rendered {} template(s)", paths.len());
                for path in &paths {
                    println!("📁 {}", path);
                }
            }
        }
        Err(e) => exit_with(&e),
    }

    Ok(())
}

async fn run(config: &dyn ConfigProvider, to_stdout: bool) -> stencil::Result<Vec<String>> {
    let context = match config.context_file() {
        Some(path) => load_context_file(path).await?,
        None => Value::Object(Default::default()),
    };

    let loader = TemplateLoader::new(config.template_paths());
    let storage = LocalStorage::new(config.output_path().to_string());
    let engine = RenderEngine::with_concurrency(storage, loader, config.concurrency());

    if to_stdout {
        let context = match context {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        for name in config.templates() {
            print!("{}", engine.render_one(name, &context)?);
        }
        return Ok(Vec::new());
    }

    engine.run(config.templates(), context).await
}

fn exit_with(e: &StencilError) -> ! {
    tracing::error!(
        "❌ Render failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    // 依錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
