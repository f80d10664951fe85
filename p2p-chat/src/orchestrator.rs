//! Top-level flow: identify both users, race for a connection, then chat.

use std::process::ExitCode;

use anyhow::{Result, bail};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{error, info, warn};

use crate::{
    config::{ConfigStore, PartnerIdentity, SaveOutcome},
    race::{self, RaceSettings},
    session::{self, SessionReport},
    terminal::{Console, LineInput},
};

pub const WELCOME_BANNER: &str = "Welcome to the P2P Chat App!";
pub const ESTABLISHED_NOTICE: &str = "Chat connection established. You can start messaging now.";
pub const UNREACHABLE_NOTICE: &str =
    "Unable to establish connection. Please check the partner's IP address and try again.";

/// Values supplied up front; anything missing is asked for interactively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presets {
    pub name: Option<String>,
    pub partner_name: Option<String>,
    pub partner_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    SessionEnded(SessionReport),
    /// The race timed out; nothing was persisted and no session ran.
    Unreachable,
}

pub struct Orchestrator<R, W> {
    input: LineInput<R>,
    console: Console<W>,
    store: ConfigStore,
    race: RaceSettings,
    presets: Presets,
}

impl<R, W> Orchestrator<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        input: LineInput<R>,
        console: Console<W>,
        store: ConfigStore,
        race: RaceSettings,
        presets: Presets,
    ) -> Self {
        Self {
            input,
            console,
            store,
            race,
            presets,
        }
    }

    pub async fn start(self) -> ExitCode {
        match self.run().await {
            Ok(Outcome::SessionEnded(_)) => ExitCode::SUCCESS,
            Ok(Outcome::Unreachable) => ExitCode::FAILURE,
            Err(err) => {
                error!(error = ?err, "chat aborted");
                ExitCode::FAILURE
            }
        }
    }

    pub async fn run(mut self) -> Result<Outcome> {
        self.console.line(WELCOME_BANNER).await?;
        let local_name = match self.presets.name.take() {
            Some(name) => name,
            None => self.ask("Enter your name: ").await?,
        };
        let partner = self.partner().await?;

        let race_config = self.race.toward(partner.address.clone());
        info!(partner = %partner.name, address = %partner.address, "connecting to partner");
        let established = match race::resolve(race_config).await {
            Ok(established) => established,
            Err(err) => {
                warn!(error = %err, "giving up on partner");
                self.console.line(UNREACHABLE_NOTICE).await?;
                return Ok(Outcome::Unreachable);
            }
        };
        info!(peer = %established.peer, branch = %established.via, "chat connection ready");

        self.persist(&partner).await?;
        self.console.line(ESTABLISHED_NOTICE).await?;

        let report = session::run(established.stream, local_name, self.input, self.console).await?;
        Ok(Outcome::SessionEnded(report))
    }

    /// Presets first, then the saved configuration if the user accepts it, then prompts.
    async fn partner(&mut self) -> Result<PartnerIdentity> {
        let preset_name = self.presets.partner_name.take();
        let preset_ip = self.presets.partner_ip.take();

        match (preset_name, preset_ip) {
            (Some(name), Some(address)) => Ok(PartnerIdentity { name, address }),
            (None, None) => match self.saved_partner().await? {
                Some(saved) => Ok(saved),
                None => self.prompt_partner(None, None).await,
            },
            (name, address) => self.prompt_partner(name, address).await,
        }
    }

    async fn saved_partner(&mut self) -> Result<Option<PartnerIdentity>> {
        let Some(saved) = self.store.load().await else {
            return Ok(None);
        };
        let answer = self.ask("Saved configuration found. Use it? (Y/N): ").await?;
        if !answer.eq_ignore_ascii_case("y") {
            return Ok(None);
        }
        self.console
            .line(&format!(
                "Using saved configuration: Partner Name: {}, IP: {}",
                saved.name, saved.address
            ))
            .await?;
        Ok(Some(saved))
    }

    async fn prompt_partner(
        &mut self,
        name: Option<String>,
        address: Option<String>,
    ) -> Result<PartnerIdentity> {
        let name = match name {
            Some(name) => name,
            None => self.ask("Enter your partner's name: ").await?,
        };
        let address = match address {
            Some(address) => address,
            None => self.ask("Enter your partner's IP address: ").await?,
        };
        Ok(PartnerIdentity { name, address })
    }

    async fn persist(&self, partner: &PartnerIdentity) -> Result<()> {
        let notice = match self.store.save(partner).await {
            Ok(SaveOutcome::Unchanged) => "Configuration already saved, no update needed.".to_string(),
            Ok(SaveOutcome::Written) => "Configuration saved successfully.".to_string(),
            Err(err) => {
                warn!(error = ?err, "continuing without saving configuration");
                format!("Error saving configuration: {err:#}")
            }
        };
        self.console.line(&notice).await?;
        Ok(())
    }

    async fn ask(&mut self, question: &str) -> Result<String> {
        self.console.prompt(question).await?;
        match self.input.next_line().await? {
            Some(answer) => Ok(answer.trim().to_string()),
            None => bail!("input ended while waiting for: {}", question.trim_end()),
        }
    }
}
