//! Daemon entry point: CLI, logging and startup sequencing.
//!
//! Startup order matters: configuration is validated first (failures exit
//! non-zero before any kernel contact), then the netlink socket comes up and
//! the family is resolved, then the medium workers spawn, the daemon
//! registers for frames, and the dispatcher loop takes over the main thread.

use anyhow::Context;
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;

use airmedium::config::{self, format_mac};
use airmedium::hwsim;
use airmedium::netlink::NetlinkSocket;
use airmedium::runtime;

#[derive(Parser)]
#[command(
    name = "airmedium",
    version,
    about = "a wireless medium simulator for mac80211_hwsim",
    after_help = "Communication protocol with mac80211_hwsim version 2.\n\
                  Severity levels: >= 3 errors, >= 5 startup, >= 6 dropped \
                  frames (default), == 7 all frames."
)]
struct Cli {
    /// Input configuration file
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Logging level (RFC 5424 severity, 0-7)
    #[arg(short = 'l', long = "log-level", default_value_t = 6)]
    log_level: u8,

    /// Run one worker thread per medium
    #[arg(short = 't', long = "threaded")]
    threaded: bool,
}

/// Map an RFC 5424 severity onto the log facade's filter.
fn level_filter(severity: u8) -> LevelFilter {
    match severity {
        0..=2 => LevelFilter::Off,
        3 => LevelFilter::Error,
        4 => LevelFilter::Warn,
        5 => LevelFilter::Info,
        6 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() {
    let cli = Cli::parse();
    if cli.log_level > 7 {
        eprintln!(
            "airmedium: invalid RFC 5424 severity level: {}",
            cli.log_level
        );
        std::process::exit(1);
    }
    Builder::new()
        .filter_level(level_filter(cli.log_level))
        .init();

    if let Err(err) = run(&cli) {
        log::error!("{err:#}");
        eprintln!("airmedium: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    log::info!("input configuration file: {}", cli.config.display());
    let plans = config::load(&cli.config).context("configuration failed")?;
    for plan in &plans {
        log::info!(
            "medium {}: {} interfaces [{}]",
            plan.id,
            plan.interfaces.len(),
            plan.interfaces
                .iter()
                .map(|itf| format_mac(&itf.addr))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let socket = NetlinkSocket::connect().context("netlink socket setup failed")?;
    let family = socket
        .resolve_family(hwsim::FAMILY_NAME)
        .context("is the mac80211_hwsim module loaded?")?;
    log::info!("resolved {} to family id {}", hwsim::FAMILY_NAME, family);

    runtime::run(plans, Arc::new(socket), family, cli.threaded)
}
