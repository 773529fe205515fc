use clap::Parser;
use devhost::cli::{Cli, Commands};
use devhost::commands;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_file = cli.global.config_file.as_deref();

    let result = match cli.command {
        Commands::Up { projects } => commands::up::run(config_file, projects).await,
        Commands::Stop { project } => commands::stop::run(config_file, &project).await,
        Commands::Ps => commands::ps::run(config_file),
        Commands::Logs { project, tail } => commands::logs::run(config_file, &project, tail).await,
        Commands::Deps => commands::deps::run(config_file).await,
        Commands::Reconcile => commands::reconcile::run(config_file).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
