use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    config::DEFAULT_CONFIG_FILE,
    orchestrator::Presets,
    race::{RENDEZVOUS_PORT, RaceSettings},
};

/// Serverless two-person chat: listens for and dials the partner at the same time.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Display name shown to your partner. Prompted for when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Partner's name. Skips the saved configuration together with --partner-ip.
    #[arg(long)]
    pub partner_name: Option<String>,

    /// Partner's IP address or hostname.
    #[arg(long)]
    pub partner_ip: Option<String>,

    /// Rendezvous port to listen on.
    #[arg(long, default_value_t = RENDEZVOUS_PORT)]
    pub port: u16,

    /// Port to dial on the partner. Defaults to --port.
    #[arg(long)]
    pub partner_port: Option<u16>,

    /// Seconds to wait for a connection before giving up.
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// File holding the saved partner configuration.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

impl Cli {
    pub fn presets(&self) -> Presets {
        Presets {
            name: self.name.clone(),
            partner_name: self.partner_name.clone(),
            partner_ip: self.partner_ip.clone(),
        }
    }

    pub fn race_settings(&self) -> RaceSettings {
        RaceSettings {
            listen_port: self.port,
            partner_port: self.partner_port.unwrap_or(self.port),
            deadline: Duration::from_secs(self.timeout),
            ..RaceSettings::default()
        }
    }
}
