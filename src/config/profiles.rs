use aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::config_dir;

const PROFILES_FILE: &str = "profiles.json";
const KEY_FILE: &str = "key.bin";

/// A saved connection, with the password in the clear.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub schema: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
struct StoredProfile {
    name: String,
    host: String,
    port: u16,
    database: String,
    username: String,
    /// Plaintext password from hand-edited files; never written by us.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    password_cipher: Option<String>,
    password_nonce: Option<String>,
    #[serde(default)]
    schema: Option<String>,
}

/// Saved profiles in `<dir>/profiles.json`, passwords sealed with AES-256-GCM.
#[derive(Serialize, Deserialize)]
pub struct ProfileStore {
    profiles: BTreeMap<String, StoredProfile>,
    #[serde(skip)]
    dir: PathBuf,
}

impl ProfileStore {
    /// Load the store from `~/.pgdeck`.
    pub fn load() -> Result<Self> {
        Self::load_from(config_dir())
    }

    /// Load the store kept in `dir`, starting empty if there is no file yet.
    pub fn load_from(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let path = dir.join(PROFILES_FILE);

        if !path.exists() {
            return Ok(ProfileStore {
                profiles: BTreeMap::new(),
                dir,
            });
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut store: ProfileStore = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        store.dir = dir;
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(self.dir.join(PROFILES_FILE), raw)?;
        Ok(())
    }

    /// Add or replace a profile. Call [`save`](Self::save) to persist it.
    pub fn add(&mut self, profile: ConnectionProfile) -> Result<()> {
        let (cipher, nonce) = encrypt_password(&self.dir, &profile.password)?;
        let stored = StoredProfile {
            name: profile.name,
            host: profile.host,
            port: profile.port,
            database: profile.database,
            username: profile.username,
            password: None,
            password_cipher: Some(cipher),
            password_nonce: Some(nonce),
            schema: profile.schema,
        };
        self.profiles.insert(stored.name.clone(), stored);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<ConnectionProfile>> {
        let Some(stored) = self.profiles.get(name).cloned() else {
            return Ok(None);
        };

        let password = match (&stored.password_cipher, &stored.password_nonce) {
            (Some(cipher), Some(nonce)) => decrypt_password(&self.dir, cipher, nonce)
                .with_context(|| format!("Cannot decrypt password of profile '{name}'"))?,
            _ => stored
                .password
                .clone()
                .ok_or_else(|| anyhow!("Profile '{name}' has no password"))?,
        };

        Ok(Some(ConnectionProfile {
            name: stored.name,
            host: stored.host,
            port: stored.port,
            database: stored.database,
            username: stored.username,
            password,
            schema: stored.schema,
        }))
    }

    /// Profile names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.profiles.remove(name).is_some()
    }
}

fn get_or_create_key(dir: &Path) -> Result<[u8; 32]> {
    let path = dir.join(KEY_FILE);
    if !path.exists() {
        fs::create_dir_all(dir)?;
        let mut key = [0u8; 32];
        rand::rng().fill(&mut key);
        fs::write(&path, key)?;
        return Ok(key);
    }
    let data = fs::read(&path)?;
    if data.len() < 32 {
        bail!("Key file {} is corrupt", path.display());
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&data[..32]);
    Ok(key)
}

fn encrypt_password(dir: &Path, plain: &str) -> Result<(String, String)> {
    let key = get_or_create_key(dir)?;
    let cipher = Aes256Gcm::new(&key.into());
    let mut nonce_bytes = [0u8; 12];
    rand::rng().fill(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ct = cipher
        .encrypt(nonce, plain.as_bytes())
        .map_err(|_| anyhow!("encryption failed"))?;
    Ok((STANDARD.encode(ct), STANDARD.encode(nonce_bytes)))
}

fn decrypt_password(dir: &Path, cipher_b64: &str, nonce_b64: &str) -> Result<String> {
    let key = get_or_create_key(dir)?;
    let cipher = Aes256Gcm::new(&key.into());
    let nonce_bytes = STANDARD.decode(nonce_b64)?;
    if nonce_bytes.len() != 12 {
        bail!("invalid nonce length");
    }
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ct = STANDARD.decode(cipher_b64)?;
    let pt = cipher
        .decrypt(nonce, ct.as_ref())
        .map_err(|_| anyhow!("decryption failed"))?;
    Ok(String::from_utf8(pt)?)
}
