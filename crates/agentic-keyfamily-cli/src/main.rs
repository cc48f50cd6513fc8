//! AgenticKeyFamily CLI — `akf` command.
//!
//! Loads a raw key set and a chain-link file, replays the chain, and prints
//! the trusted key view: roles, windows, revocations, and devices.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use agentic_keyfamily::time::unix_to_rfc3339;
use agentic_keyfamily::{
    replay, Config, Context, DeviceId, GenericKey, KeyBundleParser, KeyRegistry,
    KeyStatusStore, LinkRecord, NaclBundleParser, RawKeySet, TrustedKeyView,
};

// ── CLI structure ─────────────────────────────────────────────────────────────

/// AgenticKeyFamily CLI — replay a key family's chain and inspect which
/// keys are trusted, when, and on which device.
#[derive(Parser, Debug)]
#[command(
    name = "akf",
    about = "AgenticKeyFamily CLI",
    version,
    long_about = "akf — AgenticKeyFamily CLI\n\nReplay an identity's delegation chain over the server's key set\nand inspect the resulting trusted key view."
)]
struct Cli {
    /// JSON config file ({"username": ..., "device_id": ..., "clock": ...})
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Username the identity claims (overrides the config file)
    #[arg(long, global = true)]
    username: Option<String>,

    /// This process's own device id (overrides the config file)
    #[arg(long, global = true)]
    device: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a chain and print every key's status
    Inspect {
        #[command(flatten)]
        input: ChainInput,

        /// Evaluate at this time (Unix seconds or RFC 3339; default: now)
        #[arg(long)]
        at: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Replay a chain and print the serialized status store
    Store {
        #[command(flatten)]
        input: ChainInput,

        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Replay a chain and list devices with their active keys
    Devices {
        #[command(flatten)]
        input: ChainInput,
    },

    /// Decode a NaCl key bundle
    Bundle {
        /// Hex-encoded bundle
        bundle: String,
    },
}

#[derive(clap::Args, Debug)]
struct ChainInput {
    /// Raw key set JSON ({"all_bundles": [...]})
    #[arg(long)]
    keys: PathBuf,

    /// Chain links JSON (an array of link records)
    #[arg(long)]
    chain: PathBuf,
}

// ── Main entry point ──────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = || {
        load_config(
            cli.config.as_deref(),
            cli.username.as_deref(),
            cli.device.as_deref(),
        )
    };

    match cli.command {
        Commands::Inspect { input, at, json } => {
            let at = at.as_deref().map(parse_time).transpose()?;
            cmd_inspect(config()?, &input, at, json)
        }
        Commands::Store { input, out } => cmd_store(config()?, &input, out.as_deref()),
        Commands::Devices { input } => cmd_devices(config()?, &input),
        Commands::Bundle { bundle } => cmd_bundle(&bundle),
    }
}

// ── Loading helpers ───────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>, username: Option<&str>, device: Option<&str>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            Config::from_json(&raw).context("failed to parse config")?
        }
        None => Config::default(),
    };
    if let Some(u) = username {
        config.username = u.to_string();
    }
    if let Some(d) = device {
        config.device_id = Some(DeviceId::new(d));
    }
    if config.username.is_empty() {
        return Err(anyhow!("a username is required (--username or --config)"));
    }
    Ok(config)
}

/// Parse "1700000000" or "2023-11-14T22:13:20Z" into Unix seconds.
fn parse_time(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<i64>() {
        return Ok(secs);
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .map_err(|e| anyhow!("invalid time '{s}': {e}"))
}

fn load_view(config: Config, input: &ChainInput) -> Result<TrustedKeyView> {
    let raw = std::fs::read_to_string(&input.keys)
        .with_context(|| format!("failed to read key set {}", input.keys.display()))?;
    let key_set = RawKeySet::from_json(&raw).context("failed to parse key set")?;
    let registry =
        KeyRegistry::parse(&key_set, &NaclBundleParser).context("failed to parse key bundles")?;

    let raw = std::fs::read_to_string(&input.chain)
        .with_context(|| format!("failed to read chain {}", input.chain.display()))?;
    let links: Vec<LinkRecord> = serde_json::from_str(&raw).context("failed to parse chain")?;

    let mut view = TrustedKeyView::new(Context::new(config), registry, KeyStatusStore::new());
    let replayer = replay(&mut view, &links).context("chain replay failed")?;
    log::info!("replayed {} link(s)", replayer.applied());
    Ok(view)
}

fn window(ctime: i64, etime: i64) -> String {
    let end = if etime == 0 {
        "forever".to_string()
    } else {
        unix_to_rfc3339(etime)
    };
    format!("{} .. {end}", unix_to_rfc3339(ctime))
}

// ── Command implementations ───────────────────────────────────────────────────

/// `akf inspect --keys FILE --chain FILE [--at TIME] [--json]`
fn cmd_inspect(config: Config, input: &ChainInput, at: Option<i64>, as_json: bool) -> Result<()> {
    let view = load_view(config, input)?;
    let t = at.unwrap_or_else(|| view.context().now());

    let mut keys: Vec<_> = view.registry().keys().cloned().collect();
    keys.sort_by(|a, b| a.kid().cmp(b.kid()));

    let mut rows = Vec::new();
    for key in &keys {
        let kid = key.kid();
        let status = view.store().get_by_kid(kid);
        let state = match view.status_active_at(&key.key_ref(), t) {
            Ok(_) => "active".to_string(),
            Err(e) => e.to_string(),
        };
        rows.push(json!({
            "kid": kid,
            "algorithm": format!("{:?}", key.algorithm()),
            "role": view.role_at(kid, t),
            "state": state,
            "eldest": status.is_some_and(|s| s.eldest),
            "ctime": status.map(|s| s.ctime),
            "etime": status.map(|s| s.etime),
            "parent": status.and_then(|s| s.parent.clone()),
            "device": view.store().device_id_for_kid(kid),
        }));
    }

    if as_json {
        let out = json!({
            "at": t,
            "keys": rows,
            "server_nuked": view.server_nuked_keys(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Key family of '{}' at {}", view.context().username(), unix_to_rfc3339(t));
    for key in &keys {
        let kid = key.kid();
        println!("  {kid}");
        println!("    Algorithm: {:?}", key.algorithm());
        println!("    Role:      {:?}", view.role_at(kid, t));
        match view.store().get_by_kid(kid) {
            Some(status) => {
                if status.eldest {
                    println!("    Eldest:    yes");
                }
                println!("    Window:    {}", window(status.ctime, status.etime));
                if let Some(at) = status.revoked_at {
                    println!("    Revoked:   {at}");
                }
                if let Some(parent) = &status.parent {
                    println!("    Parent:    {parent}");
                }
            }
            None => println!("    Status:    not delegated"),
        }
        if let Some(device) = view.device_for_key(kid) {
            println!("    Device:    {}", device.id);
        }
    }
    for kid in view.server_nuked_keys() {
        println!("  {kid} (no longer listed by the server)");
    }
    if !view.has_any_active_key() {
        println!("  No active sibkeys: the key family has been fully revoked");
    }
    Ok(())
}

/// `akf store --keys FILE --chain FILE [--out FILE]`
fn cmd_store(config: Config, input: &ChainInput, out: Option<&Path>) -> Result<()> {
    let view = load_view(config, input)?;
    let json = view.store().to_json().context("failed to serialize store")?;
    match out {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} status(es) to {}", view.store().len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// `akf devices --keys FILE --chain FILE`
fn cmd_devices(config: Config, input: &ChainInput) -> Result<()> {
    let view = load_view(config, input)?;
    let mut devices = view.all_devices();
    if devices.is_empty() {
        println!("No devices");
        return Ok(());
    }
    devices.sort_by(|a, b| a.id.cmp(&b.id));

    for device in devices {
        let current = view.context().device_id() == Some(&device.id);
        println!(
            "{}{}",
            device.id,
            if current { " (this device)" } else { "" }
        );
        if let Some(kind) = device.kind {
            println!("  Kind: {kind:?}");
        }
        if let Some(desc) = &device.description {
            println!("  Description: {desc}");
        }
        for kid in view.keys_for_device(&device.id)? {
            println!("  Key: {kid} ({:?})", view.role(&kid));
        }
    }
    Ok(())
}

/// `akf bundle HEX`
fn cmd_bundle(bundle: &str) -> Result<()> {
    let key = NaclBundleParser
        .parse_bundle(bundle)
        .context("failed to decode bundle")?;
    print_key(key.as_ref());
    Ok(())
}

fn print_key(key: &dyn GenericKey) {
    println!("Kid:       {}", key.kid());
    println!("Algorithm: {:?}", key.algorithm());
    println!("Signs:     {}", key.can_sign());
    println!("Encrypts:  {}", key.can_encrypt());
}
