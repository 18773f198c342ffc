//! vault-unseal — keeps a Vault server unsealed.
//!
//! Polls Vault's seal status every `TIME_INTERVAL_SECONDS` and submits the
//! configured `UNSEAL_KEY_*` shares when it finds Vault sealed. Settings
//! come from `VU_`-prefixed environment variables and `vault-unseal.json`
//! (the file wins).
//!
//! # Usage
//!
//! ```text
//! VU_ADDRESS_URL=http://vault:8200 VU_TIME_INTERVAL_SECONDS=10 \
//! VU_UNSEAL_KEY_1=... VU_UNSEAL_KEY_2=... vault-unseal
//! ```
//!
//! Exit statuses: 1 invalid settings, 2 every key submitted and Vault still
//! sealed, 3 a `--once` cycle failed. A clean shutdown exits 0.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use unseal_agent::{CycleOutcome, HttpVaultClient, Unsealer, VaultApi};
use unseal_core::config::debug_enabled;
use unseal_core::settings::DEFAULT_SETTINGS_FILE;
use unseal_core::{ConfigSources, Configuration, ExitStatus};

#[derive(Parser)]
#[command(name = "vault-unseal", about = "Keep a Vault server unsealed", version)]
struct Cli {
    /// Settings file (JSON object of setting names to values).
    #[arg(short, long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// Run a single poll/unseal cycle and exit.
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            eprintln!("vault-unseal: {e:#}");
            ExitCode::from(ExitStatus::InvalidConfig.code())
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitStatus> {
    let settings = ConfigSources::with_file(&cli.config).load();
    let debug = debug_enabled(&settings);
    init_tracing(debug, cli.json_logs)?;

    info!("vault-unseal version {}", env!("CARGO_PKG_VERSION"));
    if debug {
        let names: Vec<&str> = settings.names().collect();
        debug!(file = %cli.config.display(), ?names, "recognized settings");
    }

    let config = match Configuration::resolve(&settings) {
        Ok(config) => config,
        Err(e) => {
            error!(setting = e.setting(), file = %cli.config.display(), "Error: {e}");
            return Ok(ExitStatus::InvalidConfig);
        }
    };
    print_banner(&config);

    let client = HttpVaultClient::from_config(&config);
    let unsealer = Unsealer::new(client, config);

    if cli.once {
        return Ok(run_once(&unsealer).await);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    match unsealer.run(shutdown_rx).await {
        Ok(()) => Ok(ExitStatus::Success),
        Err(e) => {
            error!(exit_code = ExitStatus::UnsealExhausted.code(), "{e}");
            Ok(ExitStatus::UnsealExhausted)
        }
    }
}

fn init_tracing(debug: bool, json: bool) -> anyhow::Result<()> {
    let default_directives = if debug {
        "info,vault_unseal=debug,unseal_agent=debug,unseal_core=debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_directives))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

fn print_banner(config: &Configuration) {
    info!("ADDRESS_URL = {}", config.service_url);
    info!("TIME_INTERVAL_SECONDS = {}", config.poll_interval.as_secs());
    info!("Number of unseal keys: {}", config.unseal_keys.len());
    if config.debug {
        for key in &config.unseal_keys {
            debug!(key_id = %key.id, key = key.share.expose(), "unseal key");
        }
    }
    info!(
        "If you do not see any output below, it means that the vault is contacted successfully and it is unsealed"
    );
    info!(
        "Vault will be contacted every {} seconds",
        config.poll_interval.as_secs()
    );
    info!("Run with environment variable VU_DEBUG set to 1 for debug output");
}

async fn run_once<A: VaultApi>(unsealer: &Unsealer<A>) -> ExitStatus {
    match unsealer.run_cycle().await {
        Ok(CycleOutcome::AlreadyUnsealed) => {
            info!("vault is unsealed");
            ExitStatus::Success
        }
        Ok(CycleOutcome::Unsealed { .. }) => ExitStatus::Success,
        Err(e) => {
            unsealer.report(&e);
            if e.is_fatal() {
                ExitStatus::UnsealExhausted
            } else {
                ExitStatus::CycleFailed
            }
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use clap::CommandFactory;
    use tracing_subscriber::fmt::MakeWriter;
    use unseal_core::{KeyShare, UnsealKey};

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["vault-unseal"]);
        assert_eq!(cli.config, PathBuf::from("vault-unseal.json"));
        assert!(!cli.once);
        assert!(!cli.json_logs);
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from(["vault-unseal", "--config", "/etc/vu.json", "--once"]);
        assert_eq!(cli.config, PathBuf::from("/etc/vu.json"));
        assert!(cli.once);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn banner_output(debug: bool) -> String {
        let config = Configuration {
            service_url: "http://vault:8200".to_string(),
            poll_interval: Duration::from_secs(10),
            unseal_keys: vec![UnsealKey {
                id: "UNSEAL_KEY_1".to_string(),
                share: KeyShare::new("banner-share-secret"),
            }],
            request_timeout: Duration::from_secs(10),
            debug,
        };
        let buf = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buf.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || print_banner(&config));
        let bytes = buf.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn banner_hides_shares_without_debug() {
        let out = banner_output(false);
        assert!(out.contains("Number of unseal keys: 1"), "{out}");
        assert!(!out.contains("banner-share-secret"), "{out}");
    }

    #[test]
    fn banner_lists_shares_in_debug_mode() {
        let out = banner_output(true);
        assert!(out.contains("banner-share-secret"), "{out}");
    }
}
