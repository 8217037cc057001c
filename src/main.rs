use dataexp::config::DataExpConfig;
use dataexp::storage::ArtifactFormat;
use dataexp::tool_system::Toolbox;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dataexp")]
#[command(about = "Ask questions about a tabular dataset with SQL or plain language")]
#[command(version)]
struct Args {
    /// Dataset file (overrides DATAEXP_DATA_FILE)
    #[arg(long, global = true)]
    data_file: Option<PathBuf>,

    /// Directory for saved results (overrides DATAEXP_OUTPUT_DIR)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shape, column types, null counts and sample rows
    Describe,
    /// Header names only
    Columns,
    /// Run a read-only SQL query against the dataset bound as `df`
    Query {
        sql: String,
    },
    /// Answer a plain-language question
    Ask {
        question: String,
    },
    /// Run a query and save its result
    Save {
        sql: String,

        #[arg(short, long)]
        name: String,

        /// csv, json, parquet or pickle
        #[arg(short, long, default_value = "csv")]
        format: String,
    },
    /// Load a saved result and print its rows
    Load {
        path: PathBuf,
    },
    /// Pick a chart for a query result
    Chart {
        sql: String,

        /// Question text used for keyword matching (defaults to the SQL)
        #[arg(short, long)]
        question: Option<String>,
    },
    /// Print the most recently saved csv result
    Latest,
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = DataExpConfig::from_env();
    if let Some(data_file) = args.data_file {
        config = config.with_data_file(data_file);
    }
    if let Some(output_dir) = args.output_dir {
        config = config.with_output_dir(output_dir);
    }
    info!("Using dataset {}", config.data_file.display());

    let toolbox = Toolbox::new(config);

    let output = match args.command {
        Commands::Describe => toolbox.describe_dataset(None),
        Commands::Columns => toolbox.column_names(None),
        Commands::Query { sql } => toolbox.run_query(None, &sql),
        Commands::Ask { question } => match toolbox.ask(None, &question) {
            Ok(answer) => serde_json::to_string_pretty(&answer)?,
            Err(e) => e.to_sentinel().to_string(),
        },
        Commands::Save { sql, name, format } => {
            match toolbox.save_query(None, &sql, &name, &format) {
                Ok(saved) => serde_json::to_string(&saved)?,
                Err(e) => e.to_sentinel().to_string(),
            }
        }
        Commands::Load { path } => toolbox.load_result(&path),
        Commands::Chart { sql, question } => {
            match toolbox.chart(None, &sql, question.as_deref()) {
                Ok(decision) => serde_json::to_string_pretty(&decision)?,
                Err(e) => e.to_sentinel().to_string(),
            }
        }
        Commands::Latest => match toolbox.store().latest_artifact(ArtifactFormat::Csv)? {
            Some(path) => toolbox.load_result(&path),
            None => serde_json::json!({ "error": "No saved csv results" }).to_string(),
        },
    };

    println!("{}", output);
    Ok(())
}
