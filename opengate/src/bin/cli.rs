//! Command-line editor for the gate settings document.
//!
//! Edits the same file the daemon reads. A running daemon picks changes up
//! with its next position fix.

use std::env;

use anyhow::{Context, Result, bail};

use opengate::config::{DaemonConfig, SETTINGS_VAR};
use opengate::geo::Coordinate;
use opengate::settings::{FileStore, MAX_RADIUS_M, MIN_RADIUS_M, SettingsStore};

fn usage() -> ! {
    eprintln!("Usage: opengate-cli <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status              Show gate settings");
    eprintln!("  set-number NUMBER   Set the gate phone number");
    eprintln!("  set-home LAT LON    Set the gate location");
    eprintln!("  clear-home          Forget the gate location");
    eprintln!("  set-radius METERS   Set the trigger radius ({MIN_RADIUS_M}-{MAX_RADIUS_M} m)");
    eprintln!("  reset-flag          Allow a call on the current visit");
    eprintln!("  clear               Reset all settings");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  {SETTINGS_VAR}   Settings file (default: ~/.config/opengate/settings.json)");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        usage();
    };
    let rest = &args[2..];

    let config = DaemonConfig::from_env()?;
    let store = FileStore::open(config.settings_path.clone())
        .await
        .with_context(|| format!("loading {}", config.settings_path.display()))?;

    match (command.as_str(), rest) {
        ("status", []) => cmd_status(&store).await?,
        ("set-number", [number]) => cmd_set_number(&store, number).await?,
        ("set-home", [lat, lon]) => cmd_set_home(&store, lat, lon).await?,
        ("clear-home", []) => {
            store.set_home(None).await?;
            println!("Home cleared");
        }
        ("set-radius", [meters]) => cmd_set_radius(&store, meters).await?,
        ("reset-flag", []) => {
            store.set_has_triggered(false).await?;
            println!("Triggered flag reset");
        }
        ("clear", []) => {
            store.clear().await?;
            println!("Settings cleared");
        }
        _ => {
            eprintln!("Unknown command or wrong arguments: {}", args[1..].join(" "));
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn cmd_status(store: &FileStore) -> Result<()> {
    let document = store.snapshot().await?;
    let gate = &document.gate;

    println!("Settings:  {}", store.path().display());
    if gate.phone_number.is_empty() {
        println!("Number:    (not set)");
    } else {
        println!("Number:    {}", gate.phone_number);
    }
    match gate.home {
        Some(home) => println!("Home:      {home}"),
        None => println!("Home:      (not set)"),
    }
    println!("Radius:    {} m", gate.radius_m);
    println!(
        "Triggered: {}",
        if document.has_triggered { "yes" } else { "no" }
    );

    if !gate.is_armed() {
        println!();
        println!("Calls are disabled until both number and home are set.");
    }

    Ok(())
}

async fn cmd_set_number(store: &FileStore, number: &str) -> Result<()> {
    if number.trim().is_empty() {
        bail!("phone number is empty");
    }
    store.set_phone_number(number).await?;
    println!("Number set to {}", number.trim());
    Ok(())
}

async fn cmd_set_home(store: &FileStore, lat: &str, lon: &str) -> Result<()> {
    let latitude: f64 = lat.parse().with_context(|| format!("bad latitude {lat:?}"))?;
    let longitude: f64 = lon.parse().with_context(|| format!("bad longitude {lon:?}"))?;
    let home = Coordinate::new(latitude, longitude);
    if !home.is_valid() {
        bail!("{home} is not a valid position");
    }

    store.set_home(Some(home)).await?;
    println!("Home set to {home}");
    Ok(())
}

async fn cmd_set_radius(store: &FileStore, meters: &str) -> Result<()> {
    let requested: f32 = meters
        .parse()
        .with_context(|| format!("bad radius {meters:?}"))?;
    let stored = store.set_radius(requested).await?;

    if stored == requested {
        println!("Radius set to {stored} m");
    } else {
        println!("Radius set to {stored} m (clamped from {requested})");
    }
    Ok(())
}
