//! Protocol version management.

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Minimum supported protocol version.
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Newer peers are expected to keep speaking the versions they announce
/// support for, so only a floor is enforced.
pub fn is_compatible(peer_version: u32) -> bool {
    peer_version >= MIN_PROTOCOL_VERSION
}
