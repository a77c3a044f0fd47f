//! Process launching for ssh, ssh-copy-id and rsync
//!
//! Everything the session runs goes through [`Launcher`], so the command lines can be
//! inspected in tests without touching the network.

use std::process::ExitStatus;

/// A program and its arguments, passed to the OS without a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

pub trait Launcher: Sync {
    /// Handle of a background process
    type Child: Send;

    /// Run to completion with the caller's terminal attached
    fn run(
        &self,
        invocation: &Invocation,
    ) -> impl std::future::Future<Output = std::io::Result<ExitStatus>> + Send;

    /// Start in the background
    fn spawn(&self, invocation: &Invocation) -> std::io::Result<Self::Child>;

    /// Stop a background process and reap it
    fn terminate(
        &self,
        child: Self::Child,
    ) -> impl std::future::Future<Output = std::io::Result<()>> + Send;
}

/// [`Launcher`] running real processes through tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    type Child = tokio::process::Child;

    async fn run(&self, invocation: &Invocation) -> std::io::Result<ExitStatus> {
        tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .status()
            .await
    }

    fn spawn(&self, invocation: &Invocation) -> std::io::Result<Self::Child> {
        // the tunnel must not outlive a session that was dropped without close()
        tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .kill_on_drop(true)
            .spawn()
    }

    async fn terminate(&self, mut child: Self::Child) -> std::io::Result<()> {
        if let Some(id) = child.id() {
            let pid = i32::try_from(id).map_err(std::io::Error::other)?;
            let pid = nix::unistd::Pid::from_raw(pid);
            if let Err(errno) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                tracing::debug!("SIGTERM to {} failed ({}), killing instead", pid, errno);
                child.start_kill()?;
            }
        }
        let status = child.wait().await?;
        tracing::debug!("background process exited with {}", status);
        Ok(())
    }
}
