//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use deepwell_core::research::ProgressUpdate;
use deepwell_core::{
    Credentials, DeepwellConfig, InvocationFactory, InvocationRequest, ModelRegistry, Prompt,
    ReasoningEffort, ResearchOrchestrator, ResearchRequest,
};
use std::path::Path;
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path, quiet: bool) -> anyhow::Result<()> {
    match command {
        Commands::Models => handle_models(),
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Invoke {
            model,
            system,
            temperature,
            top_p,
            top_k,
            max_tokens,
            effort,
            web_search,
            json,
            prompt,
        } => {
            let prompt = match system {
                Some(system) => Prompt::split(system, prompt),
                None => Prompt::single(prompt),
            };
            let mut request = InvocationRequest::new(model, prompt);
            if web_search {
                request = request.with_web_search(true);
            }
            if let Some(t) = temperature {
                request = request.with_temperature(t);
            }
            if let Some(p) = top_p {
                request = request.with_top_p(p);
            }
            if let Some(k) = top_k {
                request = request.with_top_k(k);
            }
            if let Some(max) = max_tokens {
                request = request.with_max_output_tokens(max);
            }
            if let Some(effort) = effort {
                request = request.with_reasoning_effort(effort);
            }
            handle_invoke(request, workspace, json).await
        }
        Commands::Research {
            depth,
            questions,
            parallel,
            no_grounding,
            instruction,
            post_process,
            output,
            json,
            query,
        } => {
            let mut request = ResearchRequest::new(query);
            request.depth = depth;
            request.max_questions = questions;
            request.parallel_executors = parallel;
            request.instruction = instruction;
            request.post_processing = post_process;
            if no_grounding {
                request.enable_grounding = Some(false);
            }
            handle_research(request, workspace, output.as_deref(), json, quiet).await
        }
    }
}

/// clap value parser for `--effort`.
pub fn parse_effort(s: &str) -> Result<ReasoningEffort, String> {
    match s.trim().to_lowercase().as_str() {
        "minimal" => Ok(ReasoningEffort::Minimal),
        "low" => Ok(ReasoningEffort::Low),
        "medium" => Ok(ReasoningEffort::Medium),
        "high" => Ok(ReasoningEffort::High),
        other => Err(format!(
            "unknown effort '{other}' (expected minimal, low, medium or high)"
        )),
    }
}

fn load(workspace: &Path) -> anyhow::Result<DeepwellConfig> {
    let config = deepwell_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    for warning in config.validate()? {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}

fn build_factory(config: &DeepwellConfig) -> anyhow::Result<InvocationFactory> {
    let credentials = Credentials::from_env(&config.providers);
    Ok(InvocationFactory::from_config(config, &credentials)?)
}

fn handle_models() -> anyhow::Result<()> {
    let registry = ModelRegistry::builtin();
    let mut models = registry.list_available_models();
    models.sort_by(|a, b| (a.provider, &a.id).cmp(&(b.provider, &b.id)));
    for spec in models {
        let params = registry.list_supported_parameters(&spec.id)?;
        println!(
            "{:<24} {:<10} {:>7} ctx {:>6} out  {}",
            spec.id,
            spec.provider.as_str(),
            spec.context_window,
            spec.max_output_tokens,
            params.into_iter().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".deepwell");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&DeepwellConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = deepwell_core::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Validate => {
            let config = deepwell_core::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let warnings = config.validate()?;
            if warnings.is_empty() {
                println!("Configuration OK");
            }
            for warning in warnings {
                println!("warning: {warning}");
            }
            let credentials = Credentials::from_env(&config.providers);
            for family in deepwell_core::ProviderFamily::ALL {
                let state = if credentials.has(family) { "set" } else { "missing" };
                println!(
                    "{family}: {} ({state})",
                    config.providers.get(family).api_key_env
                );
            }
            Ok(())
        }
    }
}

async fn handle_invoke(request: InvocationRequest, workspace: &Path, json: bool) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let factory = build_factory(&config)?;
    let response = factory.call(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    println!("{}", response.content);
    let meta = &response.metadata;
    eprintln!(
        "\n[{} via {} · {} in / {} out tokens · {} attempt(s) · {:.1}s{}]",
        meta.model,
        meta.provider,
        response.usage.input_tokens,
        response.usage.output_tokens,
        meta.attempts,
        response.duration.as_secs_f64(),
        if meta.incomplete { " · incomplete" } else { "" }
    );
    for (i, source) in meta.grounding_sources.iter().enumerate() {
        eprintln!(
            "  [{}] {}",
            i + 1,
            source.url.as_deref().or(source.title.as_deref()).unwrap_or("-")
        );
    }
    Ok(())
}

async fn handle_research(
    request: ResearchRequest,
    workspace: &Path,
    output: Option<&Path>,
    json: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let factory = Arc::new(build_factory(&config)?);
    let orchestrator = ResearchOrchestrator::new(factory, config.research.clone());

    let callback: Arc<dyn deepwell_core::ProgressCallback> = if quiet {
        Arc::new(deepwell_core::NoOpProgressCallback)
    } else {
        Arc::new(|update: &ProgressUpdate| {
            eprintln!(
                "[{:>3}%] {:<10} {}",
                update.progress_percent,
                update.stage.as_str(),
                update.message
            );
        })
    };

    let report = orchestrator.run(request, callback).await?;

    if let Some(path) = output {
        std::fs::write(path, report.to_markdown())?;
        eprintln!("Report written to {}", path.display());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if output.is_none() {
        println!("{}", report.synthesis);
    }
    Ok(())
}
