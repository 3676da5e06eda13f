//! Account address derivation from public keys.

use ess_types::{Address, PublicKey};

use crate::blake2b_256;

/// Derive the account address of an Ed25519 public key: the last 20 bytes of
/// its Blake2b-256 digest.
pub fn derive_address(public_key: &PublicKey) -> Address {
    let digest = blake2b_256(&public_key.0);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair_from_seed;

    #[test]
    fn derivation_is_deterministic() {
        let kp = keypair_from_seed(&[3u8; 32]);
        assert_eq!(derive_address(&kp.public), derive_address(&kp.public));
    }

    #[test]
    fn different_keys_give_different_addresses() {
        let a = derive_address(&keypair_from_seed(&[1u8; 32]).public);
        let b = derive_address(&keypair_from_seed(&[2u8; 32]).public);
        assert_ne!(a, b);
        assert!(!a.is_zero());
    }
}
