use nix::{
    libc::rlim_t,
    sys::resource::{getrlimit, setrlimit, Resource},
};
use tracing::debug;

use crate::TransportError;

/// Makes sure the soft limit of open files is at least `required`, raising it if
/// needed. Returns the effective soft limit.
pub fn raise_nofile_limit(required: u64) -> Result<u64, TransportError> {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).map_err(TransportError::GetLimit)?;
    if soft as u64 >= required {
        return Ok(soft as u64);
    }

    setrlimit(Resource::RLIMIT_NOFILE, required as rlim_t, hard)
        .map_err(|source| TransportError::SetLimit { limit: required, source })?;
    debug!(from = soft as u64, to = required, "raised open file limit");

    Ok(required)
}
