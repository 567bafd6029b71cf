//! 🚀 sfx-cli: the front door, the bouncer, the maitre d' of sfx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, and lets the library do the heavy lifting.
//! Like a manager. 🦆

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sfx::aggregate::HostnameRepository;
use sfx::store::{DocumentStore, StoreBackend};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 🔭 Normalize sensor conn/dns logs into a store and fold them into hostname summaries.
#[derive(Parser, Debug)]
#[command(name = "sfx", version, about)]
struct Cli {
    /// Path to the TOML configuration file. Env vars (`SFX_*`) fill in whatever it leaves out.
    #[arg(env = "SFX_CONFIG", default_value = "sfx.toml")]
    config: PathBuf,

    /// Print the converged summary for this hostname after the run. Repeatable.
    #[arg(long = "host")]
    hosts: Vec<String>,
}

/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("onnection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("unreachable")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like the store isn't reachable. \
                Double-check that Elasticsearch is actually running and that the url in \
                [store_config.Elasticsearch] points at it. If you're using Docker, \
                `docker ps` is a good first stop. ☕"
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // 🔒 validate the config file exists before we get too emotionally attached
    let config_file = cli.config.as_path();
    let config_file = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Could not even check whether the configuration file exists. \
             Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => {
            info!(
                "📭 No configuration file at '{}', going with SFX_* env vars alone",
                config_file.display()
            );
            None
        }
    };

    let app_config = sfx::app_config::load_config(config_file).context(
        "💀 In sfx-cli we couldn't load the configuration. Take a look at the file \
         and the SFX_* env vars, and make sure a [source_config] is in there somewhere.",
    )?;
    let hostname_table = app_config.storage.hostname_table.clone();

    let store: Arc<dyn DocumentStore> = Arc::new(
        StoreBackend::from_config(&app_config.store_config)
            .await
            .context("💀 Could not bring up the configured store")?,
    );
    let report = sfx::run_with_store(app_config, Arc::clone(&store)).await?;
    println!("{}", sfx::progress::render_report(&report));

    let repository = HostnameRepository::new(store, hostname_table);
    for host in &cli.hosts {
        match repository.summary(host).await? {
            Some(summary) => println!("🧺 {host}: {summary:#?}"),
            None => println!("🤷 {host}: no summary yet"),
        }
    }
    Ok(())
}
