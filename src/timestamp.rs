use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of payload bytes occupied by the send timestamp. This is also the
/// minimum payload size of an echo request.
pub(crate) const TIMESTAMP_LEN: usize = 8;

// Filler for payload bytes past the timestamp. Must not be zero so that a
// padded payload is distinguishable from an uninitialized buffer.
const PADDING_BYTE: u8 = 0x01;

/// Encodes a wall-clock instant as big-endian nanoseconds since the epoch.
pub(crate) fn pack(time: SystemTime) -> [u8; TIMESTAMP_LEN] {
    let nanos = time
        .duration_since(UNIX_EPOCH)
        .map_or(0u64, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
    nanos.to_be_bytes()
}

pub(crate) fn unpack(bytes: [u8; TIMESTAMP_LEN]) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(u64::from_be_bytes(bytes))
}

/// Builds an echo request payload of `size` bytes: the current timestamp
/// followed by constant padding. `size` below [`TIMESTAMP_LEN`] is treated
/// as [`TIMESTAMP_LEN`].
pub(crate) fn payload_now(size: usize) -> Vec<u8> {
    let mut payload = vec![PADDING_BYTE; size.max(TIMESTAMP_LEN)];
    payload[..TIMESTAMP_LEN].copy_from_slice(&pack(SystemTime::now()));
    payload
}
