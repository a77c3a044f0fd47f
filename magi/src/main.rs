use anyhow::{Context, Result};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "magi",
    version,
    about = "Magi cluster utilities",
    long_about = "`magi` opens shells on the Magi nodes, installs ssh keys there and moves files \
to, from and between them with rsync. Off the cluster every connection goes through the gateway \
server over a local port forward.

EXAMPLE:
    # Copy a directory from Magi-02 to this machine
    magi download --node 02 Scratch/run1/ ~/data/run1/

    # Copy between nodes without passing through this machine
    magi sync --node 03 Scratch/run1 Scratch/run1 --target 01"
)]
struct Args {
    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

/// Where and as whom to connect
#[derive(clap::Args, Debug, Clone)]
struct Remote {
    /// Magi node (default: the dataset host)
    #[arg(long, value_name = "NODE", value_parser = ["01", "02", "03"])]
    node: Option<String>,

    /// Local port for gateway forwarding: a port, ranges like "8000-8099" or "auto"
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<String>,

    /// Magi user
    #[arg(short = 'u', long, value_name = "USER")]
    user: Option<String>,

    /// Gateway server user
    #[arg(short = 'L', long, value_name = "USER")]
    login: Option<String>,

    /// Gateway server host
    #[arg(short = 'S', long, value_name = "HOST")]
    server: Option<String>,
}

impl Remote {
    fn session_config(&self, settings: &mut common::Settings) -> Result<remote::SessionConfig> {
        if let Some(user) = &self.user {
            settings.username.clone_from(user);
        }
        if self.login.is_some() {
            settings.server_username.clone_from(&self.login);
        }
        if self.server.is_some() {
            settings.server.clone_from(&self.server);
        }
        let destination = match &self.node {
            Some(node) => settings.node_host(node),
            None => settings
                .remote_host
                .clone()
                .unwrap_or_else(|| settings.node_host("03")),
        };
        if settings.server.is_some() {
            settings.port = match &self.port {
                Some(choice) => remote::PortChoice::parse(choice)?.pick()?,
                None => remote::find_forward_port(settings.port)?,
            };
        }
        Ok(remote::SessionConfig::from_settings(settings, &destination))
    }
}

#[derive(clap::Subcommand, Debug, Clone)]
enum Command {
    /// Connect an ssh session to a Magi node
    Connect {
        #[command(flatten)]
        remote: Remote,
    },

    /// Copy an ssh public key to a Magi node
    CopyId {
        /// Public key file to install
        id_file: std::path::PathBuf,

        /// Ask to confirm before copying
        #[arg(short = 'a', long)]
        ask: bool,

        #[command(flatten)]
        remote: Remote,
    },

    /// Download file(s) from a Magi node
    Download {
        /// Source file/directory on the node
        src: String,

        /// Local destination file/directory
        dest: String,

        /// Ask to confirm before downloading
        #[arg(short = 'a', long)]
        ask: bool,

        /// Show what would be transferred
        #[arg(short = 'n', long)]
        dry_run: bool,

        #[command(flatten)]
        remote: Remote,
    },

    /// Upload file(s) to a Magi node
    Upload {
        /// Local source file/directory
        src: String,

        /// Destination file/directory on the node
        dest: String,

        /// Ask to confirm before uploading
        #[arg(short = 'a', long)]
        ask: bool,

        /// Show what would be transferred
        #[arg(short = 'n', long)]
        dry_run: bool,

        #[command(flatten)]
        remote: Remote,
    },

    /// Sync file(s) on a Magi node, or from it to another node
    Sync {
        /// Source file/directory on the node
        src: String,

        /// Destination file/directory
        dest: String,

        /// Node receiving the files (default: the same node)
        #[arg(long = "target", value_name = "NODE", value_parser = ["01", "02", "03"])]
        target: Option<String>,

        /// Ask to confirm before syncing
        #[arg(short = 'a', long)]
        ask: bool,

        /// Show what would be transferred
        #[arg(short = 'n', long)]
        dry_run: bool,

        #[command(flatten)]
        remote: Remote,
    },
}

impl Command {
    fn remote(&self) -> &Remote {
        match self {
            Command::Connect { remote }
            | Command::CopyId { remote, .. }
            | Command::Download { remote, .. }
            | Command::Upload { remote, .. }
            | Command::Sync { remote, .. } => remote,
        }
    }
}

async fn execute<L: remote::Launcher>(
    session: &mut remote::Session<'_, L>,
    settings: &common::Settings,
    command: Command,
) -> Result<remote::Transfer, remote::Error> {
    match command {
        Command::Connect { .. } => {
            session.shell().await?;
            Ok(remote::Transfer::Completed)
        }
        Command::CopyId { id_file, ask, .. } => session.copy_id(&id_file, ask).await,
        Command::Download {
            src,
            dest,
            ask,
            dry_run,
            ..
        } => session.download(&src, &dest, dry_run, ask).await,
        Command::Upload {
            src,
            dest,
            ask,
            dry_run,
            ..
        } => session.upload(&src, &dest, dry_run, ask).await,
        Command::Sync {
            src,
            dest,
            target,
            ask,
            dry_run,
            ..
        } => {
            let target = target.map(|node| settings.node_host(&node));
            session
                .relay(&src, &dest, target.as_deref(), dry_run, ask)
                .await
        }
    }
}

#[instrument]
async fn async_main(args: Args) -> Result<()> {
    let mut settings = common::Settings::from_env().context("invalid environment")?;
    let config = args.command.remote().session_config(&mut settings)?;
    let launcher = remote::SystemLauncher;
    let ui = common::Terminal;
    let mut session = remote::Session::new(config, &launcher, &ui);
    tracing::info!("{}", session);
    let result = execute(&mut session, &settings, args.command).await;
    session.close().await;
    if result? == remote::Transfer::Declined {
        println!("cancelled");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
    };
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let res = common::run(output, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::Invocation;
    use remote::testutils::{RecordingLauncher, Scripted};

    fn laptop() -> common::Settings {
        common::Settings::resolve("laptop", |var| {
            (var == common::config::ENV_LOGIN).then(|| "me".to_string())
        })
        .unwrap()
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn node_selects_destination() {
        let args = Args::parse_from(["magi", "connect", "--node", "02", "-p", "auto"]);
        let mut settings = laptop();
        let config = args.command.remote().session_config(&mut settings).unwrap();
        assert_eq!(config.destination, "Magi-02");
        let gateway = config.gateway.unwrap();
        assert_eq!(gateway.host, common::config::DEFAULT_GATEWAY);
        assert_eq!(gateway.username.as_deref(), Some("me"));
        assert_ne!(gateway.port, 0);
    }

    #[test]
    fn cluster_connections_are_direct() {
        let args = Args::parse_from(["magi", "download", "data/", "/tmp/data/"]);
        let mut settings = common::Settings::resolve("Magi-01.local", |_| None).unwrap();
        let config = args.command.remote().session_config(&mut settings).unwrap();
        assert_eq!(config.destination, "Magi-03.local");
        assert!(config.gateway.is_none());
    }

    #[test]
    fn unknown_node_is_rejected() {
        assert!(Args::try_parse_from(["magi", "connect", "--node", "04"]).is_err());
    }

    #[tokio::test]
    async fn sync_relays_to_target_node() {
        let args = Args::parse_from([
            "magi", "sync", "--node", "03", "Scratch/a", "Scratch/b", "--target", "01", "-u",
            "viteklab",
        ]);
        let mut settings = common::Settings::resolve("Magi-02", |_| None).unwrap();
        let config = args.command.remote().session_config(&mut settings).unwrap();
        let launcher = RecordingLauncher::default();
        let ui = Scripted::default();
        let mut session = remote::Session::new(config, &launcher, &ui);
        let outcome = execute(&mut session, &settings, args.command).await.unwrap();
        session.close().await;
        assert_eq!(outcome, remote::Transfer::Completed);
        assert_eq!(
            launcher.ran(),
            vec![Invocation::new("ssh").args([
                "viteklab@Magi-03.local",
                "rsync",
                "-aP",
                "Scratch/a",
                "viteklab@Magi-01.local:Scratch/b"
            ])]
        );
    }
}
