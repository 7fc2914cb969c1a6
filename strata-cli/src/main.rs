mod config;
mod stack;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use strata_core::graph::DependencyGraph;
use strata_core::schema::ResourceSchema;
use strata_core::synth::{Document, synthesize, topological_order};
use strata_core::tree::ConstructTree;
use strata_state::backends::DEFAULT_STATE_PATH;
use strata_state::diff::{Change, StatePlan, diff};
use strata_state::{LockRetry, StateBackend, StateSession, create_backend, with_lock};

use config::{BackendKind, DeploymentArgs, DeploymentConfig, StateOptions, backend_config};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Synthesize a static site stack and manage its state", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Where state is kept
    #[arg(long, value_enum, default_value = "s3", global = true)]
    backend: BackendKind,

    /// State file for the local backend
    #[arg(long, default_value = DEFAULT_STATE_PATH, global = true)]
    state_path: PathBuf,

    /// Attempts at acquiring a contended state lock
    #[arg(long, default_value_t = 5, global = true)]
    lock_retries: u32,

    /// Wait before the first lock retry, doubled on each further attempt
    #[arg(long, default_value_t = 500, global = true)]
    lock_backoff_ms: u64,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    deployment: DeploymentArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration document
    Synth {
        /// Output file (stdout when omitted)
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Check inputs and declarations without writing anything
    Validate,
    /// Show resources in synthesis order with their dependencies
    Graph,
    /// Compare the document with recorded state
    Plan,
    /// Describe the resource types a stack can declare
    Schema,
    /// State management commands
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Prepare the backend (creates the S3 bucket when allowed)
    Init,
    /// Print the recorded state
    Show,
    /// Forget a resource without touching it
    Rm {
        /// Resource path, e.g. static-site/bucket
        path: String,
    },
    /// Remove a lock left behind by a crashed run
    ForceUnlock {
        /// ID of the lock to remove
        id: String,
    },
}

impl Cli {
    fn state_options(&self) -> StateOptions {
        StateOptions {
            backend: self.backend,
            state_path: self.state_path.clone(),
        }
    }

    fn lock_retry(&self) -> LockRetry {
        LockRetry::new(
            self.lock_retries,
            Duration::from_millis(self.lock_backoff_ms),
        )
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Synth { out } => run_synth(&cli.deployment, out.as_deref()),
        Commands::Validate => run_validate(&cli.deployment),
        Commands::Graph => run_graph(&cli.deployment),
        Commands::Plan => run_plan(&cli).await,
        Commands::Schema => {
            run_schema();
            Ok(())
        }
        Commands::State { command } => run_state_command(&cli, command).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// RUST_LOG applies unless -v is given
fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    let level = match verbose {
        0 => None,
        1 => Some(log::LevelFilter::Info),
        2 => Some(log::LevelFilter::Debug),
        _ => Some(log::LevelFilter::Trace),
    };
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.init();
}

fn load_config(args: &DeploymentArgs) -> Result<DeploymentConfig, String> {
    DeploymentConfig::from_args(args).map_err(|e| format!("Configuration error: {}", e))
}

fn declare(args: &DeploymentArgs) -> Result<(DeploymentConfig, ConstructTree), String> {
    let config = load_config(args)?;
    let tree = stack::declare_site(&config).map_err(|e| format!("Declaration error: {}", e))?;
    Ok((config, tree))
}

fn synth_document(args: &DeploymentArgs) -> Result<Document, String> {
    let (_, tree) = declare(args)?;
    synthesize(&tree).map_err(|e| format!("Synthesis error: {}", e))
}

fn run_synth(args: &DeploymentArgs, out: Option<&Path>) -> Result<(), String> {
    let document = synth_document(args)?;
    let json = document
        .to_json_pretty()
        .map_err(|e| format!("Synthesis error: {}", e))?;

    match out {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
            }
            fs::write(path, format!("{}\n", json))
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            eprintln!(
                "{}",
                format!(
                    "✓ Wrote {} resources to {}",
                    document.resources.len(),
                    path.display()
                )
                .green()
                .bold()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_validate(args: &DeploymentArgs) -> Result<(), String> {
    println!("{}", "Validating...".cyan());

    let (config, tree) = declare(args)?;
    let graph = DependencyGraph::build(&tree).map_err(|e| format!("Graph error: {}", e))?;

    println!(
        "{}",
        format!("✓ {} resources validated successfully.", graph.len())
            .green()
            .bold()
    );
    for (_, resource) in tree.nodes() {
        println!("  • {}.{}", resource.resource_type, resource.logical_id);
    }
    println!("  Serving: {}", config.aliases().join(", "));
    Ok(())
}

fn run_graph(args: &DeploymentArgs) -> Result<(), String> {
    let (_, tree) = declare(args)?;
    let graph = DependencyGraph::build(&tree).map_err(|e| format!("Graph error: {}", e))?;
    let order = topological_order(&graph).map_err(|e| format!("Graph error: {}", e))?;

    println!("{}", "Synthesis Order:".cyan().bold());
    for (index, path) in order.iter().enumerate() {
        println!("  {}. {}", index + 1, path.bold());
        for dependency in graph.dependencies_of(path) {
            println!(
                "       {} {}.{} ({})",
                "←".dimmed(),
                dependency.target,
                dependency.attribute,
                dependency.used_in
            );
        }
    }
    Ok(())
}

fn run_schema() {
    for schema in strata_aws::registry().schemas() {
        let mut lines = schema_lines(schema).into_iter();
        if let Some(heading) = lines.next() {
            println!("{}", heading.cyan().bold());
        }
        for line in lines {
            println!("{}", line);
        }
        println!();
    }
}

fn schema_lines(schema: &ResourceSchema) -> Vec<String> {
    let mut lines = vec![match &schema.description {
        Some(description) => format!("{} - {}", schema.resource_type, description),
        None => schema.resource_type.clone(),
    }];

    for attribute in schema.attributes.values() {
        let mut line = format!("  {}: {}", attribute.name, attribute.attr_type);
        if attribute.required {
            line.push_str(" (required)");
        }
        if let Some(description) = &attribute.description {
            line.push_str(&format!("  {}", description));
        }
        lines.push(line);
    }

    if !schema.outputs.is_empty() {
        let outputs: Vec<_> = schema.outputs.iter().map(String::as_str).collect();
        lines.push(format!("  outputs: {}", outputs.join(", ")));
    }
    lines
}

async fn open_backend(
    options: &StateOptions,
    args: &DeploymentArgs,
) -> Result<Arc<dyn StateBackend>, String> {
    let config = backend_config(options, args).map_err(|e| format!("Configuration error: {}", e))?;
    let backend = create_backend(&config)
        .await
        .map_err(|e| format!("Failed to open state backend: {}", e))?;
    log::info!("Using state backend {}", backend.describe());
    Ok(backend)
}

async fn run_plan(cli: &Cli) -> Result<(), String> {
    let document = synth_document(&cli.deployment)?;
    let backend = open_backend(&cli.state_options(), &cli.deployment).await?;

    let state = with_lock(backend, "plan", &cli.lock_retry(), async |session: &mut StateSession| {
        session.read_state().await
    })
    .await
    .map_err(|e| format!("Failed to read state: {}", e))?;

    print_plan(&diff(&document, state.as_ref()));
    Ok(())
}

fn print_plan(plan: &StatePlan) {
    if !plan.changes().iter().any(|c| c.change.is_change()) {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for planned in plan.changes() {
        let line = planned.to_string();
        let colored = match planned.change {
            Change::Create => line.green(),
            Change::Update { .. } => line.yellow(),
            Change::Delete => line.red(),
            Change::Unknown { .. } => line.cyan(),
            Change::NoChange => continue,
        };
        println!("  {}", colored);
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}

async fn run_state_command(cli: &Cli, command: &StateCommands) -> Result<(), String> {
    let backend = open_backend(&cli.state_options(), &cli.deployment).await?;
    match command {
        StateCommands::Init => run_state_init(backend).await,
        StateCommands::Show => run_state_show(backend, &cli.lock_retry()).await,
        StateCommands::Rm { path } => run_state_rm(backend, &cli.lock_retry(), path).await,
        StateCommands::ForceUnlock { id } => run_force_unlock(backend, id).await,
    }
}

async fn run_state_init(backend: Arc<dyn StateBackend>) -> Result<(), String> {
    backend
        .init()
        .await
        .map_err(|e| format!("Failed to initialize backend: {}", e))?;
    println!(
        "{}",
        format!("✓ Backend {} is ready.", backend.describe())
            .green()
            .bold()
    );
    Ok(())
}

async fn run_state_show(backend: Arc<dyn StateBackend>, retry: &LockRetry) -> Result<(), String> {
    let state = with_lock(backend, "state show", retry, async |session: &mut StateSession| {
        session.read_state().await
    })
    .await
    .map_err(|e| format!("Failed to read state: {}", e))?;

    let Some(state) = state else {
        println!("{}", "No state recorded yet.".yellow());
        return Ok(());
    };

    let json = serde_json::to_string_pretty(&state)
        .map_err(|e| format!("Failed to format state: {}", e))?;
    println!("{}", json);
    Ok(())
}

async fn run_state_rm(
    backend: Arc<dyn StateBackend>,
    retry: &LockRetry,
    path: &str,
) -> Result<(), String> {
    let removed = with_lock(backend, "state rm", retry, async |session: &mut StateSession| {
        let Some(mut state) = session.read_state().await? else {
            return Ok(false);
        };
        if state.remove_resource(path).is_none() {
            return Ok(false);
        }
        session.write_state(&mut state).await?;
        Ok(true)
    })
    .await
    .map_err(|e| format!("Failed to update state: {}", e))?;

    if removed {
        println!("{}", format!("✓ Removed {} from state.", path).green().bold());
        Ok(())
    } else {
        Err(format!("No resource '{}' in state", path))
    }
}

async fn run_force_unlock(backend: Arc<dyn StateBackend>, id: &str) -> Result<(), String> {
    backend
        .force_unlock(id)
        .await
        .map_err(|e| format!("Failed to unlock: {}", e))?;
    println!("{}", format!("✓ Lock {} removed.", id).green().bold());
    Ok(())
}
