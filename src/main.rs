use a3s_pipeline::{HandlerRegistry, PipelineConfig, Server};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// A3S Pipeline — programmable HTTP server
#[derive(Parser)]
#[command(name = "a3s-pipeline", version, about)]
struct Cli {
    /// Path to configuration file (.hcl, .json or .toml)
    #[arg(short, long, default_value = "pipeline.hcl")]
    config: String,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file without starting the server
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long, default_value = "pipeline.hcl")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> a3s_pipeline::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Validate { config: config_path }) = &cli.command {
        return validate_config(config_path).await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("A3S Pipeline v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(config = cli.config, "Loading configuration");
    let mut config = PipelineConfig::from_file(&cli.config).await?;

    if let Some(listen) = &cli.listen {
        config.listen = vec![listen.clone()];
    }

    let server = Server::new(&config, &HandlerRegistry::with_builtins())?;
    server.start().await?;

    tracing::info!("Server ready — press Ctrl+C to stop");
    server.wait_for_shutdown().await;

    Ok(())
}

/// Parse, validate and compile a configuration file and print diagnostics
async fn validate_config(path: &str) -> a3s_pipeline::Result<()> {
    let config = match PipelineConfig::from_file(path).await {
        Ok(c) => {
            println!("✓ Config parsed successfully ({})", path);
            c
        }
        Err(e) => {
            eprintln!("✗ Parse error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("✗ Validation error: {}", e);
        std::process::exit(1);
    }

    let registry = HandlerRegistry::with_builtins();
    if let Err(e) = a3s_pipeline::Pipeline::compile(&config, &registry) {
        eprintln!("✗ Compile error: {}", e);
        std::process::exit(1);
    }

    println!("✓ Configuration is valid");
    println!();
    println!("  Listen:      {}", config.listen.join(", "));
    println!("  Routes:      {}", config.routes.len());
    println!("  Error routes: {}", config.errors.len());
    match &config.logs {
        Some(logs) => println!(
            "  Access logs: default '{}', {} mapped hosts",
            logs.default_logger_name,
            logs.logger_mapping.len() + logs.logger_names.len()
        ),
        None => println!("  Access logs: disabled"),
    }

    Ok(())
}
