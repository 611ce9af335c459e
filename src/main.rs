use clap::Parser;

use flowcron::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = cli::load_and_merge_config(&cli)?;
    cli::init_logger_from_settings(&settings)?;

    tracing::debug!(
        version = flowcron::pkg_version(),
        backend = ?settings.store.backend,
        "Configuration loaded"
    );

    cli::execute_command(&cli, settings).await?;
    Ok(())
}
