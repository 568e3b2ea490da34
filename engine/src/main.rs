//! pipemash CLI - run pipe definitions over JSON items
//!
//! ```bash
//! pipemash run pipeline.json                  # Run a definition, print items
//! pipemash run pipeline.json --input in.json  # Replace the definition's input
//! pipemash run pipeline.json --async          # Run on the cooperative scheduler
//! pipemash pipes                              # List registered pipes
//! pipemash example                            # Print an example definition
//! ```

use clap::{Parser, Subcommand};
use pipemash::{example_definition, logging, pipeline::ExecutionMode, Definition, PipeError, Registry};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pipemash", version)]
#[command(about = "Run composable pipes over JSON records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline definition
    Run {
        /// Definition JSON file
        definition: PathBuf,

        /// JSON array of input items (replaces the definition's input)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Run on the cooperative scheduler
        #[arg(long = "async")]
        run_async: bool,

        /// Fan work out over workers / tasks
        #[arg(long)]
        parallel: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List registered pipes and their kinds
    Pipes,

    /// Print an example definition
    Example {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let result = match cli.command {
        Commands::Run {
            definition,
            input,
            run_async,
            parallel,
            output,
        } => cmd_run(&definition, input.as_deref(), run_async, parallel, output.as_deref()).await,

        Commands::Pipes => cmd_pipes(),

        Commands::Example { output } => cmd_example(output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn cmd_run(
    path: &Path,
    input: Option<&Path>,
    run_async: bool,
    parallel: bool,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Definition: {}", path.display());

    let mut definition = Definition::from_file(path)?;
    if let Some(description) = &definition.description {
        eprintln!("   {}", description);
    }

    if let Some(input) = input {
        let items: Vec<Value> = serde_json::from_str(&fs::read_to_string(input)?)?;
        eprintln!("   Input: {} items from {}", items.len(), input.display());
        definition.main.input = items;
    }
    if run_async {
        definition.runtime.mode = ExecutionMode::Async;
    }
    if parallel {
        definition.runtime.parallel = true;
    }

    let mode = definition.runtime.mode;
    let items = match mode {
        ExecutionMode::Async => definition.run_async().await?,
        ExecutionMode::Sync => tokio::task::spawn_blocking(move || definition.run_sync())
            .await
            .map_err(PipeError::from)??,
    };

    eprintln!("✅ {} items", items.len());
    let json = serde_json::to_string_pretty(&items)?;
    write_output(&json, output)?;
    Ok(())
}

fn cmd_pipes() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n📋 Registered pipes:\n");
    for (name, kind) in Registry::global().kinds() {
        println!("   {:<16} {}", name, kind);
    }
    println!();
    Ok(())
}

fn cmd_example(output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&example_definition())?;
    write_output(&json, output)
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
