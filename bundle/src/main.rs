use std::collections::HashMap;
use std::env;
use std::error::Error;

use bundle_core::Settings;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod setup_tracing;
mod words;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let vars: HashMap<String, String> = env::vars().collect();
    let settings: Settings = vars.try_into()?;
    info!(?settings, "Starting with settings");

    // read from the file given as the first argument, stdin otherwise
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match env::args().nth(1) {
        Some(path) => {
            info!(%path, "Reading words from file");
            Box::new(BufReader::new(tokio::fs::File::open(path).await?))
        }
        None => {
            info!("Reading words from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };

    let cln_token = CancellationToken::new();
    let shutdown_token = cln_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
            shutdown_token.cancel();
        }
    });

    let stats = words::run(&settings, reader, cln_token).await?;
    info!(
        words = stats.words,
        outputs = stats.outputs,
        watermarks = stats.watermarks,
        "Pipeline finished"
    );
    Ok(())
}
