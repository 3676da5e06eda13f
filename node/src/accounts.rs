//! Local accounts able to sign on behalf of the node.

use std::sync::{Arc, RwLock};

use thiserror::Error;

use ess_consensus::SignerFn;
use ess_types::{Address, KeyPair, PrivateKey, PublicKey, Signature};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("unknown account {0}")]
    UnknownAccount(Address),
}

/// A collection of accounts behind one signing backend.
pub trait Wallet: Send + Sync {
    fn url(&self) -> String;
    /// Accounts in creation order.
    fn accounts(&self) -> Vec<Address>;
    fn contains(&self, address: &Address) -> bool {
        self.accounts().contains(address)
    }
    /// Sign `hash` with the key of `address`.
    fn sign_hash(&self, address: &Address, hash: &[u8]) -> Result<(PublicKey, Signature), AccountError>;
}

/// Ed25519 keys held in memory.
pub struct KeyStoreWallet {
    url: String,
    keys: RwLock<Vec<(Address, KeyPair)>>,
}

impl KeyStoreWallet {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            keys: RwLock::new(Vec::new()),
        }
    }

    /// Create a fresh key and return its address.
    pub fn generate(&self) -> Address {
        self.insert(ess_crypto::generate_keypair())
    }

    pub fn import(&self, private: PrivateKey) -> Address {
        self.insert(ess_crypto::keypair_from_private(private))
    }

    fn insert(&self, pair: KeyPair) -> Address {
        let address = ess_crypto::derive_address(&pair.public);
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        if !keys.iter().any(|(a, _)| *a == address) {
            keys.push((address, pair));
        }
        address
    }
}

impl Wallet for KeyStoreWallet {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn accounts(&self) -> Vec<Address> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(a, _)| *a)
            .collect()
    }

    fn sign_hash(&self, address: &Address, hash: &[u8]) -> Result<(PublicKey, Signature), AccountError> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        let (_, pair) = keys
            .iter()
            .find(|(a, _)| a == address)
            .ok_or(AccountError::UnknownAccount(*address))?;
        Ok((pair.public, ess_crypto::sign_message(hash, &pair.private)))
    }
}

/// Every wallet known to the node.
#[derive(Default)]
pub struct AccountManager {
    wallets: RwLock<Vec<Arc<dyn Wallet>>>,
}

impl AccountManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wallet(&self, wallet: Arc<dyn Wallet>) {
        tracing::debug!(url = %wallet.url(), "wallet added");
        self.wallets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(wallet);
    }

    pub fn wallets(&self) -> Vec<Arc<dyn Wallet>> {
        self.wallets.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The wallet holding `address`.
    pub fn find(&self, address: &Address) -> Result<Arc<dyn Wallet>, AccountError> {
        self.wallets()
            .into_iter()
            .find(|w| w.contains(address))
            .ok_or(AccountError::UnknownAccount(*address))
    }
}

/// Adapt a wallet into the signing callback consensus engines use.
pub fn signer_fn(wallet: Arc<dyn Wallet>) -> SignerFn {
    Arc::new(move |address: Address, digest: &[u8]| -> Result<(PublicKey, Signature), String> {
        wallet.sign_hash(&address, digest).map_err(|e| e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_locates_owning_wallet() {
        let manager = AccountManager::new();
        let first = Arc::new(KeyStoreWallet::new("keystore://a"));
        let second = Arc::new(KeyStoreWallet::new("keystore://b"));
        first.generate();
        let wanted = second.generate();
        manager.add_wallet(first);
        manager.add_wallet(second);

        assert_eq!(manager.find(&wanted).unwrap().url(), "keystore://b");
        assert!(matches!(
            manager.find(&Address::new([9; 20])),
            Err(AccountError::UnknownAccount(_))
        ));
    }

    #[test]
    fn signer_fn_produces_verifiable_signature() {
        let wallet = Arc::new(KeyStoreWallet::new("keystore://sign"));
        let address = wallet.generate();
        let sign = signer_fn(wallet);
        let (public, signature) = sign(address, b"digest").unwrap();
        assert_eq!(ess_crypto::derive_address(&public), address);
        assert!(ess_crypto::verify_signature(b"digest", &signature, &public));
        assert!(sign(Address::new([1; 20]), b"digest").is_err());
    }

    #[test]
    fn import_is_idempotent() {
        let wallet = KeyStoreWallet::new("keystore://import");
        let a = wallet.import(PrivateKey([7; 32]));
        let b = wallet.import(PrivateKey([7; 32]));
        assert_eq!(a, b);
        assert_eq!(wallet.accounts(), vec![a]);
    }
}
