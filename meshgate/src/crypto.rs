//! Credential encryption at rest. AES-256-GCM with a per-tenant key derived
//! by mixing the tenant id into the master key; the packaged ciphertext is
//! `base64(nonce || ciphertext)` and is opaque to the store.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use meshgate_types::{GatewayError, ToolCredential};

const NONCE_LEN: usize = 12;

pub struct CredentialCipher {
    master_key: SecretString,
}

impl CredentialCipher {
    /// Fails fast on an unusable key; this is the one initialisation-time
    /// hard error the gateway permits.
    pub fn new(master_key: SecretString) -> anyhow::Result<Self> {
        if master_key.expose_secret().len() < 16 {
            anyhow::bail!("encryption master key must be at least 16 bytes");
        }
        Ok(Self { master_key })
    }

    fn tenant_key(&self, tenant_id: &str) -> Key<Aes256Gcm> {
        let mut hasher = Sha256::new();
        hasher.update(self.master_key.expose_secret().as_bytes());
        hasher.update(b":");
        hasher.update(tenant_id.as_bytes());
        let digest = hasher.finalize();
        Key::<Aes256Gcm>::clone_from_slice(&digest)
    }

    pub fn encrypt(&self, tenant_id: &str, plaintext: &[u8]) -> Result<String, GatewayError> {
        let cipher = Aes256Gcm::new(&self.tenant_key(tenant_id));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|e| {
            tracing::error!(tenant_id, "credential encryption failed: {e}");
            GatewayError::Encryption
        })?;

        let mut packaged = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        packaged.extend_from_slice(&nonce_bytes);
        packaged.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(packaged))
    }

    pub fn decrypt(&self, tenant_id: &str, packaged: &str) -> Result<Vec<u8>, GatewayError> {
        let raw = BASE64.decode(packaged).map_err(|e| {
            tracing::error!(tenant_id, "credential package is not valid base64: {e}");
            GatewayError::Encryption
        })?;
        if raw.len() < NONCE_LEN {
            tracing::error!(tenant_id, "credential package too short");
            return Err(GatewayError::Encryption);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.tenant_key(tenant_id));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| {
                tracing::error!(tenant_id, "credential decryption failed: {e}");
                GatewayError::Encryption
            })
    }

    pub fn encrypt_credential(
        &self,
        tenant_id: &str,
        credential: &ToolCredential,
    ) -> Result<String, GatewayError> {
        let plaintext = serde_json::to_vec(credential)?;
        self.encrypt(tenant_id, &plaintext)
    }

    pub fn decrypt_credential(
        &self,
        tenant_id: &str,
        packaged: &str,
    ) -> Result<ToolCredential, GatewayError> {
        let plaintext = self.decrypt(tenant_id, packaged)?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            tracing::error!(tenant_id, "decrypted credential is not valid JSON: {e}");
            GatewayError::Encryption
        })
    }
}
