use crate::session::SessionConfig;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Host key checks are skipped for the loopback hop only
pub const LOOPBACK_HOST_OPTION: &str = "NoHostAuthenticationForLocalhost=yes";

/// Where ssh-based commands actually connect to
///
/// Resolved once per session: direct sessions address the destination host, gateway sessions
/// address the local end of the forwarded port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub host: String,
    pub port: Option<u16>,
    pub ssh_options: Vec<String>,
}

impl Route {
    pub fn resolve(config: &SessionConfig) -> Self {
        match &config.gateway {
            Some(gateway) => Route {
                host: "localhost".to_string(),
                port: Some(gateway.port),
                ssh_options: vec!["-o".to_string(), LOOPBACK_HOST_OPTION.to_string()],
            },
            None => Route {
                host: config.destination.clone(),
                port: (config.destination_port != DEFAULT_SSH_PORT)
                    .then_some(config.destination_port),
                ssh_options: Vec::new(),
            },
        }
    }

    /// `user@host`
    pub fn login(&self, user: &str) -> String {
        format!("{user}@{}", self.host)
    }

    /// `user@host:path`
    pub fn location(&self, user: &str, path: &str) -> String {
        format!("{user}@{}:{path}", self.host)
    }

    /// Options to pass to ssh (and ssh-copy-id) ahead of the login
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = self.ssh_options.clone();
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args
    }

    /// Transport override for rsync, `None` when plain `ssh` will do
    pub fn rsh(&self) -> Option<String> {
        let args = self.ssh_args();
        if args.is_empty() {
            None
        } else {
            Some(format!("ssh {}", args.join(" ")))
        }
    }
}
