//! Extra data stamped into mined blocks.

use bincode::Options;

use ess_ethash::MAXIMUM_EXTRA_DATA_SIZE;

/// Client identifier in the default extra data.
pub const CLIENT_IDENTIFIER: &str = "ess";

/// `major << 16 | minor << 8 | patch` of this crate.
pub fn version_number() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    part(env!("CARGO_PKG_VERSION_MAJOR")) << 16
        | part(env!("CARGO_PKG_VERSION_MINOR")) << 8
        | part(env!("CARGO_PKG_VERSION_PATCH"))
}

/// The extra data the miner uses.
///
/// Empty input selects the varint-encoded tuple of client version,
/// identifier, OS and architecture. Anything longer than the protocol
/// maximum is dropped with a warning.
pub fn make_extra_data(extra: &[u8]) -> Vec<u8> {
    let extra = if extra.is_empty() {
        let tag = (
            version_number(),
            CLIENT_IDENTIFIER,
            std::env::consts::OS,
            std::env::consts::ARCH,
        );
        match bincode::DefaultOptions::new().with_varint_encoding().serialize(&tag) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode default extra data");
                return Vec::new();
            }
        }
    } else {
        extra.to_vec()
    };
    if extra.len() > MAXIMUM_EXTRA_DATA_SIZE {
        tracing::warn!(
            extra = %hex::encode(&extra),
            len = extra.len(),
            max = MAXIMUM_EXTRA_DATA_SIZE,
            "miner extra data exceeds limit"
        );
        return Vec::new();
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_extra_decodes_to_client_tag() {
        let extra = make_extra_data(&[]);
        assert!(!extra.is_empty());
        assert!(extra.len() <= MAXIMUM_EXTRA_DATA_SIZE);
        let (version, name, os, arch): (u32, String, String, String) = bincode::DefaultOptions::new()
            .with_varint_encoding()
            .deserialize(&extra)
            .unwrap();
        assert_eq!(version, version_number());
        assert_eq!(name, "ess");
        assert_eq!(os, std::env::consts::OS);
        assert_eq!(arch, std::env::consts::ARCH);
    }

    #[test]
    fn custom_extra_is_kept() {
        assert_eq!(make_extra_data(b"hello"), b"hello".to_vec());
    }

    #[test]
    fn oversized_extra_is_dropped() {
        assert!(make_extra_data(&[1u8; MAXIMUM_EXTRA_DATA_SIZE + 1]).is_empty());
        assert_eq!(make_extra_data(&[1u8; MAXIMUM_EXTRA_DATA_SIZE]).len(), MAXIMUM_EXTRA_DATA_SIZE);
    }
}
