use thiserror::Error;

mod checksum;
pub mod icmp;
pub mod payload;

pub use checksum::{checksum, verify_checksum};
pub use icmp::fabricate_unreachable;
pub use payload::payload;

#[derive(Debug, Error)]
pub enum Error {
    #[error("buffer too small for {0} header")]
    BufferTooSmall(&'static str),
}
