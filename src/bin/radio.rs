//! Radio Tuner
//!
//! Text front end: lists the station catalog, plays the selected station and
//! forwards playback commands typed on stdin.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radio_tuner::{
    audio::list_output_devices,
    catalog::{Catalog, FavoritesStore, RadioBrowser, StationDirectory},
    config::AppConfig,
    control::PlayerEvent,
    Command, CompletionSignal, PlaybackSnapshot, Player, SessionOutcome, Station,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Radio Tuner");

    let config = AppConfig::load();
    let favorites = config.favorites.resolved_path().map(FavoritesStore::new);

    // Initial catalog; favorites stand in when the directory is unreachable
    let directory: Arc<dyn StationDirectory> =
        Arc::new(RadioBrowser::new(&config.catalog, &config.network));
    let catalog = Arc::new(Catalog::default());
    let initial = {
        let catalog = catalog.clone();
        let directory = directory.clone();
        tokio::task::spawn_blocking(move || catalog.refresh(directory.as_ref())).await?
    };
    if let Err(e) = initial {
        tracing::warn!("Station directory unavailable: {}", e);
        if let Some(store) = &favorites {
            catalog.replace(store.load_or_default());
        }
    }
    let _refresh = catalog
        .clone()
        .spawn_refresh(directory, config.catalog.refresh_interval());

    let player = Arc::new(Player::from_config(&config));
    spawn_event_printer(&player);

    print_stations("Stations", &catalog.stations());
    print_help();

    let mut current: Option<Station> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "quit" | "q" | "exit" => break,
            "help" | "h" | "?" => print_help(),
            "list" | "l" => print_stations("Stations", &catalog.stations()),
            "status" => print_status(&player.snapshot()),
            "devices" => print_devices(),
            "fav" => match (&favorites, &current) {
                (Some(store), Some(station)) => match store.add(station.clone()) {
                    Ok(true) => println!("Added {} to favorites", station.name),
                    Ok(false) => println!("{} is already a favorite", station.name),
                    Err(e) => println!("Could not save favorites: {}", e),
                },
                (None, _) => println!("Favorites are unavailable on this system"),
                (_, None) => println!("Nothing is playing"),
            },
            "favs" => match &favorites {
                Some(store) => print_stations("Favorites", &store.load_or_default()),
                None => println!("Favorites are unavailable on this system"),
            },
            _ => {
                let selection = if let Some(rest) = input.strip_prefix('f') {
                    rest.parse::<usize>().ok().and_then(|n| {
                        let favs = favorites.as_ref()?.load_or_default();
                        n.checked_sub(1).and_then(|i| favs.get(i).cloned())
                    })
                } else {
                    input.parse::<usize>().ok().and_then(|n| catalog.select(n))
                };

                if let Some(station) = selection {
                    println!("Tuning to {}", station.name);
                    current = Some(station.clone());
                    let player = player.clone();
                    let signal =
                        tokio::task::spawn_blocking(move || player.start_playback(station))
                            .await??;
                    spawn_completion_watcher(signal);
                } else if let Some(command) = Command::parse(input) {
                    if let Err(e) = player.send_command(command) {
                        println!("{}", e);
                    }
                } else {
                    println!("Unknown input '{}', type 'help' for commands", input);
                }
            }
        }
    }

    tracing::info!("Shutting down");
    let player_for_stop = player.clone();
    tokio::task::spawn_blocking(move || player_for_stop.stop()).await?;

    Ok(())
}

fn spawn_event_printer(player: &Player) {
    let events = player.events();
    let spawned = std::thread::Builder::new()
        .name("event-printer".to_string())
        .spawn(move || {
            for event in events.iter() {
                match event {
                    PlayerEvent::StateChanged { station, to, .. } => {
                        println!("[{}] {}", station.name, to.label());
                    }
                    PlayerEvent::FormatDetected {
                        station,
                        codec,
                        format,
                    } => {
                        println!(
                            "[{}] {} {} Hz, {} channels",
                            station.name, codec, format.sample_rate, format.channels
                        );
                    }
                    PlayerEvent::VolumeChanged { volume, gain } => {
                        println!("Volume {:+.2} (gain {:.2})", volume, gain);
                    }
                    PlayerEvent::Error { station, message } => {
                        println!("[{}] error: {}", station.name, message);
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Event printer unavailable: {}", e);
    }
}

fn spawn_completion_watcher(signal: CompletionSignal) {
    let id = signal.session_id();
    let spawned = std::thread::Builder::new()
        .name(format!("session-watch-{}", id))
        .spawn(move || match signal.wait() {
            Some(SessionOutcome::Failed(e)) if e.is_network_failure() => {
                println!("Station unreachable ({}), pick another one", e);
            }
            Some(SessionOutcome::Finished) => println!("Stream ended"),
            Some(outcome) => tracing::debug!("Session {} ended: {:?}", id, outcome),
            None => {}
        });
    if let Err(e) = spawned {
        tracing::warn!("Session {} watcher unavailable: {}", id, e);
    }
}

fn print_stations(title: &str, stations: &[Station]) {
    println!("\n=== {} ===", title);
    if stations.is_empty() {
        println!("  (none)");
    }
    for (i, station) in stations.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, station.name);
    }
    println!();
}

fn print_status(snapshot: &PlaybackSnapshot) {
    let station = snapshot.station_name.as_deref().unwrap_or("-");
    println!(
        "{} | {} | {} Hz x{} | vol {:+.2} (gain {:.2}){} | {} | underruns {}",
        snapshot.state.label(),
        station,
        snapshot.sample_rate,
        snapshot.channels,
        snapshot.volume,
        snapshot.gain,
        if snapshot.muted { " muted" } else { "" },
        snapshot.meter(20),
        snapshot.underruns
    );
    if let Some(error) = &snapshot.last_error {
        println!("last error: {}", error);
    }
}

fn print_devices() {
    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

fn print_help() {
    println!("Commands:");
    println!("  <n>          play station n");
    println!("  f<n>         play favorite n");
    println!("  pause|p      pause (silence, keeps the stream position)");
    println!("  resume|r     resume");
    println!("  stop|s       stop playback");
    println!("  up|+ down|-  volume");
    println!("  status       playback status");
    println!("  fav / favs   add current station to favorites / list favorites");
    println!("  list         list stations");
    println!("  devices      list output devices");
    println!("  quit         exit");
}
