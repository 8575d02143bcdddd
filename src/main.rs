use clap::Parser;
use tracing::{error, Level};

use market_cache::{
    cli::{self, Cli, Commands},
    error::Error,
    handler::market_refresher,
    server,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let result = app_main().await;

    if let Err(err) = &result {
        error!("{}", err);
    }

    result
}

async fn app_main() -> Result<(), Error> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_level(true)
        .with_max_level({
            #[cfg(debug_assertions)]
            {
                Level::DEBUG
            }

            #[cfg(not(debug_assertions))]
            {
                Level::INFO
            }
        })
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => run_server().await,
        Some(Commands::Refresh) => cli::run_refresh().await,
        Some(Commands::Health) => cli::run_health().await,
    }
}

async fn run_server() -> Result<(), Error> {
    let app_state = match cli::init_state().await {
        Ok(app_state) => app_state,
        Err(e) => return Err(Error::ConfigurationError(e.to_string())),
    };

    let (_, _) = tokio::try_join!(
        server::server_task(&app_state),
        market_refresher::refresh_task(app_state.clone()),
    )?;

    Ok(())
}
