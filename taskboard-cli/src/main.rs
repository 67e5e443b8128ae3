use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use taskboard_core::models::{schema_by_name, PROJECTS};
use taskboard_core::{
    get_fields, get_fields_with_attr, CoreConfig, DocumentStore, Identity, MemoryStore,
    ProjectService, StatsMerger, TaskVisibility,
};

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(about = "taskboard CLI - project statistics and schema inspection")]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute per-project task statistics from a JSON dump
    Stats {
        /// Dump file: { "projects": [...], "tasks": [...], ... }
        #[arg(long)]
        data: PathBuf,
        /// Report only projects visible to this company
        #[arg(long)]
        company: Option<String>,
        /// Section to report (active or archived)
        #[arg(long, conflicts_with = "all_states")]
        state: Option<String>,
        /// Report every section
        #[arg(long)]
        all_states: bool,
    },
    /// List the declared fields of a model
    Fields {
        /// company, user, project, task or model
        #[arg(long)]
        model: String,
        /// Only fields with this attribute set (embedded fields flattened)
        #[arg(long)]
        attr: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Stats {
            data,
            company,
            state,
            all_states,
        } => stats(&config, &data, company.as_deref(), state.as_deref(), all_states),
        Commands::Fields { model, attr } => fields(&model, attr.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    let config = match path {
        Some(path) => CoreConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => CoreConfig::default(),
    };
    config.apply_logging().context("Invalid log level")?;
    Ok(config)
}

fn load_store(file: &Path) -> Result<MemoryStore> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let dump: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in file: {}", file.display()))?;
    MemoryStore::from_dump(&dump).with_context(|| format!("Invalid dump: {}", file.display()))
}

fn stats(
    config: &CoreConfig,
    data: &Path,
    company: Option<&str>,
    state: Option<&str>,
    all_states: bool,
) -> Result<()> {
    let store = load_store(data)?;

    let output = match company {
        Some(company) => {
            let mut call = Map::new();
            call.insert("include_stats".to_string(), json!(true));
            if all_states {
                call.insert("stats_for_state".to_string(), Value::Null);
            } else if let Some(state) = state {
                call.insert("stats_for_state".to_string(), json!(state));
            }

            let identity = Identity::new(company, "cli");
            let projects = ProjectService::new(&store, &config.stats)
                .get_all_ex(&identity, &call)
                .context("Failed to compute project stats")?;
            json!({ "projects": projects })
        }
        None => {
            let only_state = match (all_states, state) {
                (true, _) => None,
                (false, Some(state)) => Some(state.parse::<TaskVisibility>()?),
                (false, None) => Some(TaskVisibility::Active),
            };
            let ids: Vec<String> = store
                .find(PROJECTS, &json!({}))?
                .iter()
                .filter_map(|p| p.get("_id").and_then(Value::as_str).map(str::to_string))
                .collect();
            let stats = StatsMerger::new(&store, &config.stats)
                .collect(&ids, only_state)
                .context("Failed to compute project stats")?;
            serde_json::to_value(stats)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn fields(model: &str, attr: Option<&str>) -> Result<()> {
    let Some(schema) = schema_by_name(model) else {
        bail!("Unknown model: {}", model);
    };

    match attr {
        None => {
            for name in get_fields(schema) {
                println!("{}", name);
            }
        }
        Some(attr) => {
            for (name, choices) in get_fields_with_attr(schema, attr, false) {
                match choices {
                    Some(choices) => println!("{}\t{}", name, Value::Array(choices)),
                    None => println!("{}", name),
                }
            }
        }
    }
    Ok(())
}
