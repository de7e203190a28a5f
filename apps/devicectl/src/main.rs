//! devicectl: manage a local Olm device stored in SQLite.
//!
//! # Usage
//!
//! ```bash
//! export OLMDEV_PICKLE_KEY=$(head -c 32 /dev/urandom | base64)
//! devicectl identity
//! devicectl generate-keys 10
//! devicectl publish-keys
//! devicectl verify <ed25519-key> "message" <signature>
//! ```

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use olmdev_crypto::config::DeviceConfig;
use olmdev_crypto::signature;
use olmdev_crypto::storage::SqliteKeyStore;
use olmdev_crypto::{OlmDevice, PickleKey};
use olmdev_shared::error::OlmdevError;

/// Local Olm device key management
#[derive(Parser, Debug)]
#[command(name = "devicectl")]
#[command(version)]
struct Cli {
    /// Key store path, overrides config
    #[arg(long)]
    store: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print the device's public identity keys
    Identity,
    /// Generate unpublished one-time keys
    GenerateKeys { count: usize },
    /// Mark all unpublished one-time keys as published
    PublishKeys,
    /// List unpublished one-time keys
    OneTimeKeys,
    /// List sessions with a remote device, most recently used first
    Sessions { device_key: String },
    /// Sign a message with the device's Ed25519 key
    Sign { message: String },
    /// Verify an Ed25519 signature
    Verify {
        key: String,
        message: String,
        signature: String,
    },
}

fn pickle_key_from_env() -> Result<PickleKey, OlmdevError> {
    let encoded = std::env::var("OLMDEV_PICKLE_KEY")
        .map_err(|_| OlmdevError::Config("OLMDEV_PICKLE_KEY is not set".into()))?;
    PickleKey::from_base64(&encoded).map_err(|e| OlmdevError::Config(e.to_string()))
}

fn open_device(config: &DeviceConfig) -> Result<OlmDevice<SqliteKeyStore>, OlmdevError> {
    let store = SqliteKeyStore::open(&config.store_path)?;
    Ok(OlmDevice::open(store, pickle_key_from_env()?, config)?)
}

fn run(command: Command, config: &DeviceConfig) -> Result<(), OlmdevError> {
    match command {
        // Verification needs no local identity.
        Command::Verify {
            key,
            message,
            signature: sig,
        } => {
            signature::verify_signature(&key, message.as_bytes(), &sig)?;
            println!("signature ok");
            Ok(())
        }
        other => run_with_device(other, &open_device(config)?),
    }
}

fn run_with_device(
    command: Command,
    device: &OlmDevice<SqliteKeyStore>,
) -> Result<(), OlmdevError> {
    match command {
        Command::Identity => {
            let keys = serde_json::json!({
                "curve25519": device.curve25519_key(),
                "ed25519": device.ed25519_key(),
            });
            println!("{keys:#}");
        }
        Command::GenerateKeys { count } => {
            if count == 0 {
                return Err(OlmdevError::Validation("count must be at least 1".into()));
            }
            let evicted = device.generate_one_time_keys(count)?;
            if !evicted.is_empty() {
                println!("{} published one-time keys evicted", evicted.len());
            }
            println!(
                "{} unpublished one-time keys (max {})",
                device.one_time_keys()?.len(),
                device.max_number_of_one_time_keys()?
            );
        }
        Command::PublishKeys => {
            device.mark_keys_as_published()?;
            println!("one-time keys marked as published");
        }
        Command::OneTimeKeys => {
            let keys = serde_json::json!({ "curve25519": device.one_time_keys()? });
            println!("{keys:#}");
        }
        Command::Sessions { device_key } => {
            let sessions: Vec<_> = device
                .session_info_for_device(&device_key)?
                .into_iter()
                .map(|info| {
                    serde_json::json!({
                        "session_id": info.session_id,
                        "has_received_message": info.has_received_message,
                    })
                })
                .collect();
            if sessions.is_empty() {
                return Err(OlmdevError::NotFound);
            }
            println!("{:#}", serde_json::Value::Array(sessions));
        }
        Command::Sign { message } => {
            println!("{}", device.sign(message.as_bytes())?);
        }
        Command::Verify { .. } => {
            return Err(OlmdevError::Internal("verify does not use the device".into()))
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = DeviceConfig::load().map_err(OlmdevError::from)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(store = %config.store_path, "opening key store");
    run(cli.command, &config)?;
    Ok(())
}
