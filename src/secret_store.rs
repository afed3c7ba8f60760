//! C1: durable mapping from token identifier to signing secret.
//!
//! Backed by an embedded transactional KV store (`sled`). Atomic
//! create-if-absent is implemented with the store's native
//! compare-and-swap, not an in-process lock, so the exactly-once
//! guarantee holds even if this store is ever shared between processes.

use rand::RngCore;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const TREE_NAME: &str = "lsat/proxy/secrets";

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret already exists for this id")]
    AlreadyExists,
    #[error("no secret found for this id")]
    NotFound,
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] sled::Error),
    #[error("secret store worker task panicked")]
    WorkerPanicked,
}

/// Persistent store for token-signing secrets, namespaced under a single
/// reserved prefix (`lsat/proxy/secrets/`) so the backing `sled` database
/// may be shared with other keyspaces.
#[derive(Clone)]
pub struct SecretStore {
    tree: sled::Tree,
}

impl SecretStore {
    pub fn open(path: &Path) -> Result<Self, SecretStoreError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { tree })
    }

    fn key(id: &[u8; 32]) -> String {
        hex::encode(id)
    }

    /// Generates a 32-byte secret and persists it under `id` if absent.
    /// Two concurrent calls for the same `id` are guaranteed to resolve
    /// to exactly one success and one [`SecretStoreError::AlreadyExists`].
    pub async fn new_secret(&self, id: [u8; 32]) -> Result<[u8; 32], SecretStoreError> {
        let tree = self.tree.clone();
        let key = Self::key(&id);
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);

        tokio::task::spawn_blocking(move || {
            let result = tree.compare_and_swap(
                key.as_bytes(),
                None::<&[u8]>,
                Some(secret.to_vec()),
            )?;
            match result {
                Ok(()) => Ok(secret),
                Err(_) => Err(SecretStoreError::AlreadyExists),
            }
        })
        .await
        .map_err(|_| SecretStoreError::WorkerPanicked)?
    }

    pub async fn reveal_secret(&self, id: [u8; 32]) -> Result<[u8; 32], SecretStoreError> {
        let tree = self.tree.clone();
        let key = Self::key(&id);

        let bytes = tokio::task::spawn_blocking(move || tree.get(key.as_bytes()))
            .await
            .map_err(|_| SecretStoreError::WorkerPanicked)??;

        let bytes = bytes.ok_or(SecretStoreError::NotFound)?;
        let mut secret = [0u8; 32];
        if bytes.len() != 32 {
            return Err(SecretStoreError::NotFound);
        }
        secret.copy_from_slice(&bytes);
        Ok(secret)
    }

    pub async fn revoke_secret(&self, id: [u8; 32]) -> Result<(), SecretStoreError> {
        let tree = self.tree.clone();
        let key = Self::key(&id);
        tokio::task::spawn_blocking(move || tree.remove(key.as_bytes()))
            .await
            .map_err(|_| SecretStoreError::WorkerPanicked)??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> SecretStore {
        let dir = tempfile::tempdir().expect("tempdir");
        // Leak the tempdir so the sled database stays alive for the test's duration.
        let path = dir.into_path();
        SecretStore::open(&path).expect("open secret store")
    }

    #[tokio::test]
    async fn new_secret_then_reveal_round_trips() {
        let store = temp_store();
        let id = [1u8; 32];
        let secret = store.new_secret(id).await.unwrap();
        let revealed = store.reveal_secret(id).await.unwrap();
        assert_eq!(secret, revealed);
    }

    #[tokio::test]
    async fn new_secret_twice_for_same_id_fails_second_time() {
        let store = temp_store();
        let id = [2u8; 32];
        store.new_secret(id).await.unwrap();
        let err = store.new_secret(id).await.unwrap_err();
        assert!(matches!(err, SecretStoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn reveal_unknown_id_fails_not_found() {
        let store = temp_store();
        let err = store.reveal_secret([9u8; 32]).await.unwrap_err();
        assert!(matches!(err, SecretStoreError::NotFound));
    }

    #[tokio::test]
    async fn revoke_then_reveal_fails_not_found() {
        let store = temp_store();
        let id = [3u8; 32];
        store.new_secret(id).await.unwrap();
        store.revoke_secret(id).await.unwrap();
        let err = store.reveal_secret(id).await.unwrap_err();
        assert!(matches!(err, SecretStoreError::NotFound));
    }

    #[tokio::test]
    async fn concurrent_new_secret_yields_exactly_one_success() {
        let store = Arc::new(temp_store());
        let id = [4u8; 32];
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.new_secret(id).await }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
