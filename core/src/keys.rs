//! Persistent API key registry.
//!
//! The registry is a versioned JSON document rewritten whole on every
//! mutation via a temp file + rename, so a crash mid-write never leaves a
//! truncated keys file. Secrets are stored only as a salted SHA-256
//! (`"{salt_hex}${digest_hex}"`); the cleartext is returned exactly once, at
//! creation.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine;
use chrono::DateTime;
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

use crate::error::GatewayErr;
use crate::error::Result;

const KEYS_FILE_VERSION: u32 = 1;
const SECRET_PREFIX: &str = "oclaw_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: String,
    pub label: String,
    /// `"{salt_hex}${digest_hex}"` of the secret.
    pub hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Rate spec like `"10/m"`; empty means unlimited.
    #[serde(default)]
    pub rate: String,
    #[serde(default)]
    pub burst: u32,
    #[serde(default)]
    pub quota_tokens: u64,
    #[serde(default)]
    pub token_balance: i64,
    #[serde(default)]
    pub token_allowance: i64,
    #[serde(default)]
    pub allowance_duration_secs: u64,
}

impl KeyRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KeysDocument {
    version: u32,
    keys: Vec<KeyRecord>,
}

pub struct KeyStore {
    path: PathBuf,
    keys: Mutex<Vec<KeyRecord>>,
}

fn salted_hash(salt: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; 16];
    rand::rng().fill_bytes(&mut salt);
    let salt_hex: String = salt.iter().map(|b| format!("{b:02x}")).collect();
    format!("{salt_hex}${}", salted_hash(&salt, secret))
}

fn matches_secret(stored: &str, secret: &str) -> bool {
    let Some((salt_hex, digest)) = stored.split_once('$') else {
        return false;
    };
    let Ok(salt) = (0..salt_hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(salt_hex.get(i..i + 2).unwrap_or(""), 16))
        .collect::<std::result::Result<Vec<u8>, _>>()
    else {
        return false;
    };
    salted_hash(&salt, secret) == digest
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!(
        "{SECRET_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

impl KeyStore {
    /// Load the registry, pruning keys whose expiry has already passed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut keys = match std::fs::read(&path) {
            Ok(bytes) => {
                let doc: KeysDocument = serde_json::from_slice(&bytes)?;
                doc.keys
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let now = Utc::now();
        let before = keys.len();
        keys.retain(|k| !k.is_expired(now));
        let store = Self {
            path,
            keys: Mutex::new(keys),
        };
        if before != store.len() {
            store.persist_snapshot()?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a new key. Returns the stored record together with the
    /// cleartext secret, which is not retained.
    pub fn add(
        &self,
        label: &str,
        rate: &str,
        burst: u32,
        quota_tokens: u64,
        provided_secret: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<(KeyRecord, String)> {
        if label.trim().is_empty() {
            return Err(GatewayErr::Malformed("key label must not be empty".into()));
        }
        let secret = match provided_secret {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => generate_secret(),
        };
        let now = Utc::now();
        let record = KeyRecord {
            id: Uuid::new_v4().to_string(),
            label: label.to_string(),
            hash: hash_secret(&secret),
            created_at: now,
            expires_at: ttl.and_then(|d| {
                chrono::TimeDelta::from_std(d).ok().map(|delta| now + delta)
            }),
            revoked_at: None,
            rate: rate.to_string(),
            burst,
            quota_tokens,
            token_balance: 0,
            token_allowance: 0,
            allowance_duration_secs: 0,
        };
        {
            let mut keys = self
                .keys
                .lock()
                .map_err(|_| GatewayErr::Malformed("key store poisoned".into()))?;
            keys.push(record.clone());
        }
        self.persist_snapshot()?;
        Ok((record, secret))
    }

    /// Look a key up by secret. Equality and revoked/expired status are
    /// checked under the same lock so a revocation is visible to the very
    /// next call.
    pub fn validate(&self, secret: &str) -> Option<KeyRecord> {
        let now = Utc::now();
        let keys = self.keys.lock().ok()?;
        let record = keys.iter().find(|k| matches_secret(&k.hash, secret))?;
        if record.is_revoked() || record.is_expired(now) {
            return None;
        }
        Some(record.clone())
    }

    /// Mark a key revoked, addressed by id or by secret. Idempotent; a
    /// no-op on unknown keys.
    pub fn revoke(&self, id_or_secret: &str) -> Result<()> {
        let mut changed = false;
        {
            let mut keys = self
                .keys
                .lock()
                .map_err(|_| GatewayErr::Malformed("key store poisoned".into()))?;
            for key in keys.iter_mut() {
                if key.id == id_or_secret || matches_secret(&key.hash, id_or_secret) {
                    if key.revoked_at.is_none() {
                        key.revoked_at = Some(Utc::now());
                        changed = true;
                    }
                    break;
                }
            }
        }
        if changed {
            self.persist_snapshot()?;
        }
        Ok(())
    }

    /// Revoke the key and issue a fresh secret under a new id, preserving
    /// label, rate, burst and quota.
    pub fn rotate(&self, id: &str) -> Result<(KeyRecord, String)> {
        let (label, rate, burst, quota) = {
            let mut keys = self
                .keys
                .lock()
                .map_err(|_| GatewayErr::Malformed("key store poisoned".into()))?;
            let Some(key) = keys.iter_mut().find(|k| k.id == id) else {
                return Err(GatewayErr::Malformed(format!("unknown key id: {id}")));
            };
            key.revoked_at.get_or_insert_with(Utc::now);
            (
                key.label.clone(),
                key.rate.clone(),
                key.burst,
                key.quota_tokens,
            )
        };
        self.persist_snapshot()?;
        self.add(&label, &rate, burst, quota, None, None)
    }

    pub fn set_token_policy(
        &self,
        id: &str,
        balance: i64,
        allowance: i64,
        duration: Duration,
    ) -> Result<()> {
        {
            let mut keys = self
                .keys
                .lock()
                .map_err(|_| GatewayErr::Malformed("key store poisoned".into()))?;
            let Some(key) = keys.iter_mut().find(|k| k.id == id) else {
                return Err(GatewayErr::Malformed(format!("unknown key id: {id}")));
            };
            key.token_balance = balance;
            key.token_allowance = allowance;
            key.allowance_duration_secs = duration.as_secs();
        }
        self.persist_snapshot()
    }

    pub fn add_tokens(&self, id: &str, delta: i64) -> Result<()> {
        {
            let mut keys = self
                .keys
                .lock()
                .map_err(|_| GatewayErr::Malformed("key store poisoned".into()))?;
            let Some(key) = keys.iter_mut().find(|k| k.id == id) else {
                return Err(GatewayErr::Malformed(format!("unknown key id: {id}")));
            };
            key.token_balance = key.token_balance.saturating_add(delta);
        }
        self.persist_snapshot()
    }

    fn persist_snapshot(&self) -> Result<()> {
        let snapshot = {
            let keys = self
                .keys
                .lock()
                .map_err(|_| GatewayErr::Malformed("key store poisoned".into()))?;
            keys.clone()
        };
        let doc = KeysDocument {
            version: KEYS_FILE_VERSION,
            keys: snapshot,
        };
        write_atomically(&self.path, &serde_json::to_vec_pretty(&doc)?)
    }
}

/// Serialize to a temp file in the target directory, then rename over the
/// destination.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    std::io::Write::write_all(&mut tmp, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = tmp
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
        {
            warn!(error = %e, "failed to restrict keys file permissions");
        }
    }
    tmp.persist(path)
        .map_err(|e| GatewayErr::Io(e.error))?;
    Ok(())
}
