use std::{env, num::IntErrorKind};

use nix::unistd::{setgid, setuid, Gid, Uid};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrivilegeError {
    #[error("{var} is {reason}: {value}")]
    InvalidId { var: &'static str, value: String, reason: &'static str },
    #[error("setgid {gid}: {source}")]
    SetGid { gid: u32, source: nix::Error },
    #[error("setuid {uid}: {source}")]
    SetUid { uid: u32, source: nix::Error },
}

/// Switches a root process back to the user that invoked it through sudo, as given
/// by `SUDO_GID` and `SUDO_UID`. Sockets needing privileges must be open by now.
pub fn drop_privileges() -> Result<(), PrivilegeError> {
    if !Uid::effective().is_root() {
        return Ok(());
    }

    if let Some(gid) = sudo_id("SUDO_GID")? {
        setgid(Gid::from_raw(gid)).map_err(|source| PrivilegeError::SetGid { gid, source })?;
    }
    if let Some(uid) = sudo_id("SUDO_UID")? {
        setuid(Uid::from_raw(uid)).map_err(|source| PrivilegeError::SetUid { uid, source })?;
        info!(uid, "dropped privileges");
    }

    Ok(())
}

fn sudo_id(var: &'static str) -> Result<Option<u32>, PrivilegeError> {
    match env::var(var) {
        Ok(value) => parse_id(var, &value).map(Some),
        Err(_) => Ok(None),
    }
}

/// Parses a user or group id in `1..=u32::MAX`.
fn parse_id(var: &'static str, value: &str) -> Result<u32, PrivilegeError> {
    let invalid = |reason| PrivilegeError::InvalidId { var, value: value.to_owned(), reason };

    match value.parse::<u32>() {
        Ok(0) => Err(invalid("too small")),
        Ok(id) => Ok(id),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Err(invalid("too large")),
        Err(_) => Err(invalid("invalid")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids() {
        assert_eq!(parse_id("SUDO_UID", "1000"), Ok(1000));
        assert_eq!(parse_id("SUDO_UID", "4294967295"), Ok(u32::MAX));
    }

    #[test]
    fn rejects_out_of_range_ids() {
        let err = parse_id("SUDO_GID", "0").unwrap_err();
        assert_eq!(err.to_string(), "SUDO_GID is too small: 0");

        let err = parse_id("SUDO_UID", "4294967296").unwrap_err();
        assert_eq!(err.to_string(), "SUDO_UID is too large: 4294967296");

        let err = parse_id("SUDO_UID", "bob").unwrap_err();
        assert_eq!(err.to_string(), "SUDO_UID is invalid: bob");
    }
}
