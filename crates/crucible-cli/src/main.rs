//! Crucible CI CLI entrypoint.

use clap::Parser;

mod commands;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "crucible")]
#[command(author, version, about = "Crucible CI command-line interface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let ok = match cli.command {
        Commands::Test {
            component,
            features,
            test_options,
            repo_root,
            pipeline,
            store,
        } => {
            handlers::test(
                &component,
                features.as_deref(),
                test_options.as_deref(),
                &repo_root,
                pipeline.as_deref(),
                &store,
            )
            .await?
        }
        Commands::Run {
            pipeline,
            repo_root,
            store,
        } => handlers::run(pipeline.as_deref(), &repo_root, &store).await?,
        Commands::Validate { path } => handlers::validate(path.as_deref())?,
        Commands::Env {
            pipeline,
            store,
            platform,
        } => handlers::env(pipeline.as_deref(), &store, &platform).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
