use bytes::Bytes;
use rand::Rng;
use udpstress_common::constants::MAX_PAYLOAD;

/// Request sent by client flows.
pub const REQUEST: &[u8] = b"foo\n";
/// Reply sent from a per-flow connected reply socket.
pub const REPLY_CONNECTED: &[u8] = b"bar\n";
/// Reply sent from the shared listening socket.
pub const REPLY: &[u8] = b"baz\n";

static FILLER: [u8; MAX_PAYLOAD] = [0; MAX_PAYLOAD];

/// Selects the next payload to transmit.
///
/// With a `bound`, the payload is zero filler with a length drawn uniformly from
/// `[0, bound]` (capped at [`MAX_PAYLOAD`]). Without one, the `literal` is used.
pub fn payload(bound: Option<usize>, literal: &'static [u8]) -> Bytes {
    match bound {
        Some(bound) => {
            let len = rand::thread_rng().gen_range(0..=bound.min(MAX_PAYLOAD));
            Bytes::from_static(&FILLER[..len])
        }
        None => Bytes::from_static(literal),
    }
}
