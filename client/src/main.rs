use clap::Parser;
use client::network::Scout;
use log::{info, warn};
use shared::PROTOCOL_VERSION;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// A POI report given on the command line as `guid,latE6,lngE6`.
#[derive(Debug, Clone, PartialEq)]
struct PoiArg {
    guid: String,
    lat_e6: i64,
    lng_e6: i64,
}

fn parse_poi(s: &str) -> Result<PoiArg, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [guid, lat, lng] if !guid.is_empty() => Ok(PoiArg {
            guid: guid.to_string(),
            lat_e6: lat.parse().map_err(|e| format!("bad latE6 `{}`: {}", lat, e))?,
            lng_e6: lng.parse().map_err(|e| format!("bad lngE6 `{}`: {}", lng, e))?,
        }),
        _ => Err(format!("expected `guid,latE6,lngE6`, got `{}`", s)),
    }
}

/// An event given on the command line as `type,team`.
fn parse_event(s: &str) -> Result<(String, String), String> {
    match s.split_once(',') {
        Some((kind, team)) if !kind.trim().is_empty() && !team.trim().is_empty() => {
            Ok((kind.trim().to_string(), team.trim().to_string()))
        }
        _ => Err(format!("expected `type,team`, got `{}`", s)),
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL to connect to
    #[arg(short, long, default_value = "ws://127.0.0.1:6543")]
    url: String,

    /// Protocol version to announce
    #[arg(short = 'v', long = "protocol", default_value_t = PROTOCOL_VERSION)]
    protocol: i64,

    /// POI to report, as guid,latE6,lngE6 (repeatable)
    #[arg(long, value_parser = parse_poi)]
    poi: Vec<PoiArg>,

    /// Event to report, as type,team (repeatable)
    #[arg(long, value_parser = parse_event)]
    event: Vec<(String, String)>,

    /// How long to keep printing server messages
    #[arg(short, long, default_value = "5")]
    listen_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut scout = Scout::connect(&args.url).await?;
    scout.handshake(args.protocol).await?;

    for poi in &args.poi {
        info!("Reporting POI {} at ({}, {})", poi.guid, poi.lat_e6, poi.lng_e6);
        scout.report_poi(&poi.guid, poi.lat_e6, poi.lng_e6).await?;
    }
    for (kind, team) in &args.event {
        info!("Reporting event {} for team {}", kind, team);
        scout.report_event(kind, team).await?;
    }

    let deadline = Instant::now() + Duration::from_secs(args.listen_secs);
    loop {
        match timeout_at(deadline, scout.recv()).await {
            Ok(Ok(Some(message))) => info!("Server: {:?}", message),
            Ok(Ok(None)) => {
                warn!("Server closed the connection");
                return Ok(());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break,
        }
    }

    scout.close().await?;
    Ok(())
}
