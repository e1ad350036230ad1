#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use std::io;

use thiserror::Error;

mod privs;
mod report;

pub use privs::{drop_privileges, PrivilegeError};
pub use report::{spawn_reporter, Reporter};
pub use udpstress_common::{constants, Stats, StatsSnapshot};
pub use udpstress_socket::*;
pub use udpstress_transport::*;
pub use udpstress_wire::{fabricate_unreachable, payload};

/// Anything that ends a run of one of the binaries.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
}

/// Installs the log subscriber of the binaries. `RUST_LOG` takes precedence over
/// `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}
