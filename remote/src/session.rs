use common::Interaction;
use tracing::instrument;

use crate::launcher::{Invocation, Launcher};
use crate::route::{DEFAULT_SSH_PORT, Route};

/// Intermediate ssh host used when the destination is not directly reachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    pub host: String,
    /// Asked for interactively on open when missing
    pub username: Option<String>,
    /// Local end of the forward
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Username on the destination host
    pub username: String,
    pub destination: String,
    pub destination_port: u16,
    pub gateway: Option<Gateway>,
    /// Delay after spawning the tunnel before it is used
    pub grace: std::time::Duration,
}

impl SessionConfig {
    /// Session towards `destination` using the user, gateway and port from `settings`
    pub fn from_settings(settings: &common::Settings, destination: &str) -> Self {
        Self {
            username: settings.username.clone(),
            destination: destination.to_string(),
            destination_port: DEFAULT_SSH_PORT,
            gateway: settings.server.as_ref().map(|host| Gateway {
                host: host.clone(),
                username: settings.server_username.clone(),
                port: settings.port,
            }),
            grace: settings.tunnel_grace,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("gateway {gateway} is required but the tunnel on local port {port} is not open")]
    GatewayUnavailable { gateway: String, port: u16 },
    #[error("failed to launch {program}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} failed with {status}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
    },
    #[error("path does not exist: {0:?}")]
    NotFound(std::path::PathBuf),
    #[error("prompt failed: {0:#}")]
    Prompt(#[source] anyhow::Error),
}

/// Result of an operation that may be declined at the confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Completed,
    Declined,
}

/// Connection to one destination host, optionally through a gateway tunnel
///
/// A session is not meant to be shared: callers either serialize operations on one session or
/// create one session per transfer. Call [`Session::close`] when done; a tunnel left running
/// is killed when the launcher's process handle is dropped.
pub struct Session<'a, L: Launcher> {
    config: SessionConfig,
    route: Route,
    launcher: &'a L,
    interaction: &'a dyn Interaction,
    tunnel: Option<L::Child>,
}

impl<L: Launcher> std::fmt::Debug for Session<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("route", &self.route)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<L: Launcher> std::fmt::Display for Session<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ssh: {}", self.destination_login())?;
        if let (Some(gateway), true) = (&self.config.gateway, self.is_open()) {
            write!(f, " (forwarding to {} over {})", gateway.host, gateway.port)?;
        }
        Ok(())
    }
}

impl<'a, L: Launcher> Session<'a, L> {
    pub fn new(config: SessionConfig, launcher: &'a L, interaction: &'a dyn Interaction) -> Self {
        let route = Route::resolve(&config);
        Self {
            config,
            route,
            launcher,
            interaction,
            tunnel: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Whether the gateway tunnel is running
    pub fn is_open(&self) -> bool {
        self.tunnel.is_some()
    }

    /// Whether transfers can be attempted: direct sessions always are
    pub fn is_ready(&self) -> bool {
        self.config.gateway.is_none() || self.is_open()
    }

    fn destination_login(&self) -> String {
        format!("{}@{}", self.config.username, self.config.destination)
    }

    /// Start the gateway tunnel if one is configured and not already running
    ///
    /// Failing to start the tunnel is reported but not fatal; the return value tells whether
    /// the session is ready for transfers.
    #[instrument(skip(self), fields(destination = %self.config.destination))]
    pub async fn open(&mut self) -> bool {
        if self.is_ready() {
            return true;
        }
        let Some(gateway) = self.config.gateway.as_mut() else {
            return true;
        };
        self.interaction
            .report(&format!("connecting to {}", gateway.host));
        let username = match &gateway.username {
            Some(username) => username.clone(),
            None => match self.interaction.username(&gateway.host) {
                Ok(username) => {
                    gateway.username = Some(username.clone());
                    username
                }
                Err(error) => {
                    tracing::warn!("no username for gateway {}: {:#}", gateway.host, error);
                    self.interaction.report("failed to open connection");
                    return false;
                }
            },
        };
        let forward = format!(
            "{}:{}:{}",
            gateway.port, self.config.destination, self.config.destination_port
        );
        let tunnel = Invocation::new("ssh")
            .args(["-N", "-L"])
            .arg(forward)
            .arg(format!("{username}@{}", gateway.host));
        tracing::debug!("starting tunnel: {}", tunnel);
        match self.launcher.spawn(&tunnel) {
            Ok(child) => {
                self.tunnel = Some(child);
                tracing::info!(
                    "forwarding {} to {}:{} through {}",
                    gateway.port,
                    self.config.destination,
                    self.config.destination_port,
                    gateway.host
                );
                self.interaction.report(&format!(
                    "forwarding to {} on port {}",
                    self.config.destination, gateway.port
                ));
                if !self.config.grace.is_zero() {
                    tokio::time::sleep(self.config.grace).await;
                }
                true
            }
            Err(error) => {
                tracing::warn!("failed to start tunnel through {}: {}", gateway.host, error);
                self.interaction.report("failed to open connection");
                false
            }
        }
    }

    /// Open the tunnel if needed; a gateway session that cannot be opened is an error
    async fn ensure_ready(&mut self) -> Result<(), Error> {
        if self.open().await {
            return Ok(());
        }
        match &self.config.gateway {
            Some(gateway) => Err(Error::GatewayUnavailable {
                gateway: gateway.host.clone(),
                port: gateway.port,
            }),
            None => Ok(()),
        }
    }

    fn confirm(&self, ask: bool) -> Result<bool, Error> {
        if !ask {
            return Ok(true);
        }
        self.interaction
            .confirm(common::interact::CONTINUE_PROMPT)
            .map_err(Error::Prompt)
    }

    fn rsync(&self, source: String, destination: String, dry_run: bool) -> Invocation {
        let mut rsync = Invocation::new("rsync").arg("-aP");
        if let Some(rsh) = self.route.rsh() {
            rsync = rsync.arg(format!("--rsh={rsh}"));
        }
        if dry_run {
            rsync = rsync.arg("--dry-run");
        }
        rsync.arg(source).arg(destination)
    }

    async fn execute(&self, invocation: &Invocation) -> Result<(), Error> {
        tracing::debug!("running: {}", invocation);
        let status = self
            .launcher
            .run(invocation)
            .await
            .map_err(|source| Error::Launch {
                program: invocation.program.clone(),
                source,
            })?;
        if !status.success() {
            tracing::error!("{} failed with {}", invocation.program, status);
            return Err(Error::Failed {
                program: invocation.program.clone(),
                status,
            });
        }
        Ok(())
    }

    /// Copy `source` on the destination host to `destination` on the local machine
    ///
    /// Trailing slashes follow rsync: `dir/` copies the contents of `dir`.
    #[instrument(skip(self))]
    pub async fn download(
        &mut self,
        source: &str,
        destination: &str,
        dry_run: bool,
        ask: bool,
    ) -> Result<Transfer, Error> {
        self.ensure_ready().await?;
        let true_source = format!("{}:{source}", self.destination_login());
        self.interaction
            .report(&format!("data will be downloaded from: '{true_source}'"));
        self.interaction
            .report(&format!("data will be downloaded to: '{destination}'"));
        if !self.confirm(ask)? {
            return Ok(Transfer::Declined);
        }
        self.interaction.report(&format!(
            "downloading data as {}",
            self.destination_login()
        ));
        let local = common::expand_tilde(destination);
        let rsync = self.rsync(
            self.route.location(&self.config.username, source),
            local.to_string_lossy().into_owned(),
            dry_run,
        );
        self.execute(&rsync).await?;
        tracing::info!("downloaded {} to {}", true_source, destination);
        Ok(Transfer::Completed)
    }

    /// Copy local `source` to `destination` on the destination host
    #[instrument(skip(self))]
    pub async fn upload(
        &mut self,
        source: &str,
        destination: &str,
        dry_run: bool,
        ask: bool,
    ) -> Result<Transfer, Error> {
        let local = common::expand_tilde(source);
        if !local.exists() {
            return Err(Error::NotFound(local));
        }
        self.ensure_ready().await?;
        let true_destination = format!("{}:{destination}", self.destination_login());
        self.interaction
            .report(&format!("data will be uploaded from: '{source}'"));
        self.interaction
            .report(&format!("data will be uploaded to: '{true_destination}'"));
        if !self.confirm(ask)? {
            return Ok(Transfer::Declined);
        }
        self.interaction
            .report(&format!("uploading data as {}", self.destination_login()));
        let rsync = self.rsync(
            local.to_string_lossy().into_owned(),
            self.route.location(&self.config.username, destination),
            dry_run,
        );
        self.execute(&rsync).await?;
        tracing::info!("uploaded {} to {}", source, true_destination);
        Ok(Transfer::Completed)
    }

    /// Run rsync on the destination host, copying `source` to `destination` there or on `target`
    #[instrument(skip(self))]
    pub async fn relay(
        &mut self,
        source: &str,
        destination: &str,
        target: Option<&str>,
        dry_run: bool,
        ask: bool,
    ) -> Result<Transfer, Error> {
        self.ensure_ready().await?;
        let origin = self.destination_login();
        let (target_login, rsync_destination) = match target {
            Some(target) => {
                let login = format!("{}@{target}", self.config.username);
                (login.clone(), format!("{login}:{destination}"))
            }
            None => (origin.clone(), destination.to_string()),
        };
        self.interaction
            .report(&format!("data will be copied from: '{origin}:{source}'"));
        self.interaction.report(&format!(
            "data will be copied to: '{target_login}:{destination}'"
        ));
        if !self.confirm(ask)? {
            return Ok(Transfer::Declined);
        }
        let mut ssh = Invocation::new("ssh")
            .args(self.route.ssh_args())
            .arg(self.route.login(&self.config.username))
            .args(["rsync", "-aP"]);
        if dry_run {
            ssh = ssh.arg("--dry-run");
        }
        let ssh = ssh.arg(source).arg(rsync_destination);
        self.execute(&ssh).await?;
        Ok(Transfer::Completed)
    }

    /// Install a public key in the destination's authorized keys
    #[instrument(skip(self))]
    pub async fn copy_id(
        &mut self,
        identity_file: &std::path::Path,
        ask: bool,
    ) -> Result<Transfer, Error> {
        if !identity_file.is_file() {
            return Err(Error::NotFound(identity_file.to_path_buf()));
        }
        self.ensure_ready().await?;
        self.interaction.report(&format!(
            "key will be uploaded from: '{}'",
            identity_file.display()
        ));
        self.interaction.report(&format!(
            "key will be uploaded to: '{}'",
            self.destination_login()
        ));
        if !self.confirm(ask)? {
            return Ok(Transfer::Declined);
        }
        self.interaction
            .report(&format!("copying key as {}", self.destination_login()));
        let copy_id = Invocation::new("ssh-copy-id")
            .arg("-i")
            .arg(identity_file.to_string_lossy())
            .args(self.route.ssh_args())
            .arg(self.route.login(&self.config.username));
        self.execute(&copy_id).await?;
        Ok(Transfer::Completed)
    }

    /// Attach the terminal to a shell on the destination host
    #[instrument(skip(self))]
    pub async fn shell(&mut self) -> Result<(), Error> {
        self.ensure_ready().await?;
        self.interaction
            .report(&format!("connecting as {}", self.destination_login()));
        let ssh = Invocation::new("ssh")
            .args(self.route.ssh_args())
            .arg(self.route.login(&self.config.username));
        self.execute(&ssh).await
    }

    /// Stop the gateway tunnel; does nothing if it is not running
    pub async fn close(&mut self) {
        let Some(child) = self.tunnel.take() else {
            return;
        };
        if let Some(gateway) = &self.config.gateway {
            self.interaction
                .report(&format!("closing connection to {}", gateway.host));
        }
        if let Err(error) = self.launcher.terminate(child).await {
            tracing::warn!("failed to stop tunnel: {}", error);
        }
    }
}
