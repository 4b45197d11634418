//! Sable desktop console.
//!
//! Drives the desktop state and the sidecar bridge from stdin slash
//! commands. Sidecar notifications are pumped into the notification feed as
//! they arrive; state is saved on exit.

use std::io::IsTerminal;

use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sable::desktop::console::{self, Session};
use sable::error::AppError;
use sable::sidecar::SidecarManager;
use sable::{config, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();

    let mut config_path = None;
    let mut verbosity = 0u8;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: sable-desktop [-f <config>] [-v...]");
                println!();
                println!("{}", console::USAGE);
                return Ok(());
            }
            "-f" | "--config" => config_path = args.next(),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    let config = config::load(config_path.as_deref())?;
    let cli_level = logger::level_for_verbosity(verbosity);
    logger::init(cli_level.unwrap_or(config.log_level.as_str()), cli_level.is_some())?;

    let sidecars = SidecarManager::new(&config.desktop.sidecar_dir);
    let mut events = sidecars.subscribe();
    let mut session = Session::load(&config.desktop.state_file)?;
    info!(
        state_file = %config.desktop.state_file.display(),
        sidecar_dir = %config.desktop.sidecar_dir.display(),
        workspaces = session.state.workspaces.len(),
        "desktop session ready"
    );

    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    let interactive = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();
    let input = BufReader::new(tokio::io::stdin());
    session
        .run(&sidecars, &mut events, input, &mut std::io::stdout(), interactive, &shutdown)
        .await?;

    sidecars.stop_all().await;
    session.save()?;
    info!("desktop state saved");
    Ok(())
}
