use anyhow::{Context, Result};
use dotenv::dotenv;
use std::process::ExitCode;
use tracing::{error, info};

use feedrelay::environment::Config;
use feedrelay::logging;
use feedrelay::media::{compressor_from_settings, MediaNormalizer};
use feedrelay::persistence::Persister;
use feedrelay::pipeline::Pipeline;
use feedrelay::publish::Publisher;
use feedrelay::rss::{create_http_client, FeedFetcher};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    // Logging is configured from the same settings, so report these on stderr.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            return ExitCode::from(2);
        }
    };

    logging::configure_logging(config.log_dir.as_deref());

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let client = create_http_client(config.request_timeout)?;

    let persister = Persister::from_settings(&config.backend, client.clone());
    info!("Persisting state with the {} backend", persister.name());

    let publisher = Publisher::connect(client.clone(), config.bluesky.as_ref())
        .await
        .context("Failed to connect to the publisher")?;

    let media = MediaNormalizer::new(
        client.clone(),
        compressor_from_settings(&config.compressor),
        config.jpeg_quality,
        config.compressor_timeout,
    );
    let feed = FeedFetcher::new(client, config.feed_url.clone());

    let pipeline = Pipeline::new(
        feed,
        publisher,
        persister,
        media,
        config.database_path.clone(),
        config.guid_policy,
    );

    let report = pipeline.run().await?;
    info!(
        "Run complete: {} fetched, {} new, {} published",
        report.fetched, report.new_items, report.published
    );
    Ok(())
}
