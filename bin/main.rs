#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use mmail::{Dialer, config::Config};
use mmail_common::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config_path = find_config_file()?;
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let config: Config = toml::from_str(&config_content)?;

    let dialer = Dialer::from_config(&config.server);
    let message = config.message.build();

    let mut failed = 0;
    for outcome in dialer.dial_and_send(&message).await? {
        match outcome.result {
            Ok(reply) => println!("{}: {reply}", outcome.recipient),
            Err(err) => {
                failed += 1;
                println!("{}: {err}", outcome.recipient);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} recipient(s) were not delivered");
    }

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `MMAIL_CONFIG` environment variable
/// 2. ./mmail.toml (current working directory)
/// 3. /etc/mmail/mmail.toml (system-wide config)
fn find_config_file() -> anyhow::Result<std::path::PathBuf> {
    if let Ok(env_path) = std::env::var("MMAIL_CONFIG") {
        let path = std::path::PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "MMAIL_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = vec![
        std::path::PathBuf::from("./mmail.toml"),
        std::path::PathBuf::from("/etc/mmail/mmail.toml"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - MMAIL_CONFIG environment variable\n{paths_tried}"
    )
}
