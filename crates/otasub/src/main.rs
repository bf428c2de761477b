//! otasub — MQTT test subscriber for chunked OTA image delivery.
//!
//! Repeatedly runs one exchange against the publisher: announce interest on
//! the kit's notify topic, receive the chunk stream on a fresh per-download
//! topic, reassemble, and report the result. Between exchanges it waits, so
//! a long-running publisher can be exercised indefinitely. Ctrl-C stops it
//! between (not during) broker reads.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;

use otakit_core::config::OtakitConfig;
use otakit_services::mqtt::MqttClient;
use otakit_services::{Outcome, Session};

/// Consecutive idle polls tolerated before the exchange is abandoned.
const MAX_IDLE_POLLS: u32 = 6;
const POLL_WAIT: Duration = Duration::from_secs(10);

fn print_usage() {
    println!("Usage: otasub [options]");
    println!();
    println!("Options:");
    println!("  -b <host[:port]>   broker to connect to");
    println!("  -k <kit>           kit name used in topic construction");
    println!("  -f <file>          output filename for the reassembled image");
    println!("  -d                 use the direct flow instead of the job flow");
    println!("  -l                 verbose logging");
}

fn take<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{flag} requires a value"))
}

fn apply_args(config: &mut OtakitConfig, args: &[String]) -> Result<bool> {
    let mut verbose = false;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-b" => {
                let value = take(args, &mut i)?;
                match value.split_once(':') {
                    Some((host, port)) => {
                        config.broker.host = host.to_string();
                        config.broker.port = port.parse().context("broker port must be a number")?;
                    }
                    None => config.broker.host = value.to_string(),
                }
            }
            "-k" => config.subscriber.kit = take(args, &mut i)?.to_string(),
            "-f" => config.subscriber.output_file = PathBuf::from(take(args, &mut i)?),
            "-d" => config.subscriber.direct_flow = true,
            "-l" => verbose = true,
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown option: {other}");
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    Ok(verbose)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if let Err(e) = OtakitConfig::write_default_if_missing() {
        eprintln!("warning: failed to write default config: {e}");
    }
    let mut config = OtakitConfig::load().unwrap_or_else(|e| {
        eprintln!("warning: failed to load config, using defaults: {e}");
        OtakitConfig::default()
    });
    let verbose = apply_args(&mut config, &args)?;

    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        broker = %config.broker.host,
        port = config.broker.port,
        kit = %config.subscriber.kit,
        direct = config.subscriber.direct_flow,
        "otasub starting"
    );

    loop {
        let wait = tokio::select! {
            result = run_exchange(&config) => match result {
                Ok(true) => {
                    tracing::info!(
                        secs = config.subscriber.restart_wait_secs,
                        "download complete, waiting before the next request"
                    );
                    config.subscriber.restart_wait_secs
                }
                Ok(false) => {
                    tracing::info!(
                        secs = config.subscriber.retry_wait_secs,
                        "no image this round, retrying later"
                    );
                    config.subscriber.retry_wait_secs
                }
                Err(e) => {
                    tracing::warn!(error = %e, "exchange failed, retrying later");
                    config.subscriber.retry_wait_secs
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("otasub stopping");
    Ok(())
}

/// Run one full exchange. Returns whether an image was downloaded.
async fn run_exchange(config: &OtakitConfig) -> Result<bool> {
    let mut rng = rand::thread_rng();
    let nonce: u32 = rng.gen_range(0..100_000);
    let client_id = format!("otakit-{:08x}", rng.gen::<u32>());

    let mut client = MqttClient::connect(
        &config.broker.host,
        config.broker.port,
        &client_id,
        config.broker.keep_alive_secs,
    )
    .await
    .context("broker connection failed")?;

    let unique_topic = config.unique_topic(nonce);
    let publish_topic = config.publish_topic();
    let mut session = Session::new(
        unique_topic.clone(),
        &config.subscriber.output_file,
        config.subscriber.direct_flow,
    );

    client
        .subscribe(&unique_topic)
        .await
        .context("subscription failed")?;
    client
        .publish(&publish_topic, &session.availability_request().to_json(), 1)
        .await
        .context("availability request failed")?;
    tracing::info!(topic = %unique_topic, "waiting for the publisher");

    let mut downloaded = false;
    let mut idle_polls = 0;
    while !session.is_finished() {
        let publish = match client.poll(POLL_WAIT).await? {
            Some(publish) => {
                idle_polls = 0;
                publish
            }
            None => {
                idle_polls += 1;
                if idle_polls >= MAX_IDLE_POLLS {
                    anyhow::bail!("publisher went quiet, giving up on this exchange");
                }
                continue;
            }
        };

        let (outcome, reply) = session.handle_message(&publish.topic, &publish.payload);
        if let Some(reply) = reply {
            client.publish(&publish_topic, &reply.to_json(), 1).await?;
        }
        match outcome {
            Outcome::Continuing => {}
            Outcome::Completed(path) => {
                tracing::info!(path = %path.display(), "image downloaded");
                downloaded = true;
            }
            Outcome::Aborted(e) => {
                tracing::warn!(error = %e, "transfer aborted");
            }
        }
    }

    client.disconnect().await?;
    Ok(downloaded)
}
