//! Remote access for the MSI tools: ssh tunnels through a gateway and rsync transfers
//!
//! A [`Session`] talks to a single destination host. When a [`Gateway`] is configured the
//! session first starts a background `ssh -N -L` forward through it and every later command
//! addresses `localhost:<port>` instead of the destination; without a gateway commands go to
//! the destination directly. Which address to use is decided once, by [`Route::resolve`].
//!
//! The actual bytes are moved by the system `rsync`, `ssh` and `ssh-copy-id` binaries,
//! started through the [`Launcher`] trait.

pub mod launcher;
pub mod ports;
pub mod route;
pub mod session;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use launcher::{Invocation, Launcher, SystemLauncher};
pub use ports::{PortChoice, find_forward_port};
pub use route::Route;
pub use session::{Error, Gateway, Session, SessionConfig, Transfer};
