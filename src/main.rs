use procbridge::{
    AppResult,
    cli::{Cli, Commands},
    client, config::Config, gateway, init_logging,
};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(&cli.effective_log_level())?;

    tracing::info!("ProcBridge starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    // Load configuration
    let config = Config::load_or_default(&cli.config_file);

    match &cli.command {
        None | Some(Commands::Serve) => {
            gateway::run(&config).await?;
        }
        Some(Commands::Attach) => {
            client::run_attach(&config.client).await?;
        }
        Some(Commands::Config { action }) => {
            Config::handle_command(action, &cli.config_file)?;
        }
    }

    Ok(())
}
