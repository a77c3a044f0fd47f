//! Configuration types for the catalog and the remote session settings

/// Lab nodes that can reach the dataset host without a gateway
pub const KNOWN_NODES: [&str; 3] = ["Magi-01", "Magi-02", "Magi-03"];

pub const DEFAULT_DBPATH: &str = "/Volumes/Datasets/";
pub const DEFAULT_REMOTE_PATH: &str = "/Volumes/Datasets";
pub const DEFAULT_REMOTE_HOST: &str = "Magi-03";
pub const DEFAULT_USERNAME: &str = "viteklab";
pub const DEFAULT_GATEWAY: &str = "login.khoury.northeastern.edu";
pub const DEFAULT_FORWARD_PORT: u16 = 8080;
pub const DEFAULT_TUNNEL_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

pub const ENV_DBPATH: &str = "MSI_DBPATH";
pub const ENV_USER: &str = "MAGI_USER";
pub const ENV_LOGIN: &str = "MAGI_LOGIN";
pub const ENV_PORT: &str = "MSI_PORT";
pub const ENV_TUNNEL_GRACE: &str = "MSI_TUNNEL_GRACE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid port in ${var}: '{value}'")]
    Port {
        var: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid duration in ${var}: '{value}'")]
    Duration {
        var: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
}

/// Settings read once at process start
///
/// Defaults depend on where the tools run: on one of the [`KNOWN_NODES`] the dataset host is
/// reachable directly, anywhere else the connection goes through the gateway server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Local storage root (holds `MSIResearch/` and the scope directories)
    pub dbpath: std::path::PathBuf,
    /// Username on the dataset host
    pub username: String,
    /// Dataset host
    pub remote_host: Option<String>,
    /// Storage root on the dataset host
    pub remote_path: Option<String>,
    /// Gateway server, `None` for direct connections
    pub server: Option<String>,
    /// Username on the gateway server, asked for interactively when missing
    pub server_username: Option<String>,
    /// Local port used for gateway forwarding
    pub port: u16,
    /// How long to wait for a freshly spawned tunnel before the first transfer
    pub tunnel_grace: std::time::Duration,
    /// Whether we are running on one of the lab nodes
    pub on_cluster: bool,
}

impl Settings {
    /// Build settings from the process environment and the local hostname
    pub fn from_env() -> Result<Self, ConfigError> {
        let hostname = local_hostname();
        Self::resolve(&hostname, |var| std::env::var(var).ok())
    }

    /// Build settings for `hostname` with environment lookups going through `env`
    pub fn resolve(
        hostname: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let on_cluster = is_known_node(hostname);
        let dbpath = env(ENV_DBPATH).unwrap_or_else(|| DEFAULT_DBPATH.to_string());
        let port = match env(ENV_PORT) {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|source| ConfigError::Port {
                    var: ENV_PORT,
                    value: value.clone(),
                    source,
                })?,
            None => DEFAULT_FORWARD_PORT,
        };
        let tunnel_grace = match env(ENV_TUNNEL_GRACE) {
            Some(value) => {
                humantime::parse_duration(value.trim()).map_err(|source| {
                    ConfigError::Duration {
                        var: ENV_TUNNEL_GRACE,
                        value: value.clone(),
                        source,
                    }
                })?
            }
            None => DEFAULT_TUNNEL_GRACE,
        };
        let settings = if on_cluster {
            Settings {
                dbpath: dbpath.into(),
                username: login_name(&env).unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
                remote_host: Some(format!("{DEFAULT_REMOTE_HOST}.local")),
                remote_path: Some(DEFAULT_REMOTE_PATH.to_string()),
                server: None,
                server_username: None,
                port,
                tunnel_grace,
                on_cluster,
            }
        } else {
            Settings {
                dbpath: dbpath.into(),
                username: env(ENV_USER).unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
                remote_host: Some(DEFAULT_REMOTE_HOST.to_string()),
                remote_path: Some(DEFAULT_REMOTE_PATH.to_string()),
                server: Some(DEFAULT_GATEWAY.to_string()),
                server_username: env(ENV_LOGIN),
                port,
                tunnel_grace,
                on_cluster,
            }
        };
        tracing::debug!("resolved settings for host '{}': {:?}", hostname, settings);
        Ok(settings)
    }

    /// Hostname of a lab node given its number, e.g. "02" -> "Magi-02"
    pub fn node_host(&self, node: &str) -> String {
        if self.on_cluster {
            format!("Magi-{node}.local")
        } else {
            format!("Magi-{node}")
        }
    }
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
}

pub fn is_known_node(hostname: &str) -> bool {
    let short = hostname.strip_suffix(".local").unwrap_or(hostname);
    KNOWN_NODES
        .iter()
        .any(|node| node.eq_ignore_ascii_case(short))
}

fn local_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(errno) => {
            tracing::warn!("failed to read hostname: {}", errno);
            String::new()
        }
    }
}

fn login_name(env: &impl Fn(&str) -> Option<String>) -> Option<String> {
    env("USER").or_else(|| env("LOGNAME")).or_else(|| {
        nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|user| user.name)
    })
}
