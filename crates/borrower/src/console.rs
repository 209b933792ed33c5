//! # Validator Key Console
//!
//! Narrow capability interface to the validator engine's control console:
//! validation keys are created, registered and used for signing there, and
//! only referenced here by hash.
//!
//! ## Commands
//!
//! | Operation              | Console command                     | Expected output                 |
//! |------------------------|-------------------------------------|---------------------------------|
//! | `sync_status`          | `getstats`                          | `unixtime`, `masterchainblocktime` lines |
//! | `find_existing_key`    | `getconfig`                         | JSON with `validators[]`        |
//! | `new_key`              | `newkey`                            | `created new key <HEX>`         |
//! | `register_permanent`   | `addpermkey <key> <since> <until>`  | last line `success`             |
//! | `register_temporary`   | `addtempkey <key> <key> <until>`    | last line `success`             |
//! | `bind_network_address` | `addvalidatoraddr <key> <adnl> <until>` | last line `success`         |
//! | `export_public_key`    | `exportpub <key>`                   | `got public key: <base64>`      |
//! | `sign`                 | `sign <key> <HEX>`                  | `got signature <base64>`        |
//!
//! ## Concurrency
//!
//! The console is a single external process. [`EngineConsole`] serialises
//! calls behind an async mutex so at most one command is in flight.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Seconds the node may lag behind wall-clock time and still count as synced.
pub const MAX_SYNC_LAG_SECS: i64 = 60;

// ════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════

/// Handle of a key held by the console (uppercase hex of its 256-bit id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHash(String);

impl KeyHash {
    pub fn parse(s: &str) -> Result<Self, ConsoleError> {
        let s = s.trim();
        let bytes = hex::decode(s).map_err(|_| ConsoleError::output("key hash", s))?;
        if bytes.len() != 32 {
            return Err(ConsoleError::output("key hash", s));
        }
        Ok(Self(hex::encode_upper(bytes)))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Node clock versus latest masterchain block time, from `getstats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub unixtime: i64,
    pub masterchain_block_time: i64,
}

impl SyncStatus {
    pub fn lag_secs(&self) -> i64 {
        self.unixtime - self.masterchain_block_time
    }

    pub fn is_synced(&self) -> bool {
        self.lag_secs() < MAX_SYNC_LAG_SECS
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("cannot run console: {0}")]
    Spawn(String),

    #[error("console command '{command}' timed out")]
    Timeout { command: String },

    #[error("console command '{command}' exited with {status}: {stderr}")]
    Exit { command: String, status: String, stderr: String },

    #[error("unexpected console output for {what}: {output}")]
    Output { what: String, output: String },

    #[error("console command '{command}' did not succeed: {status}")]
    Status { command: String, status: String },
}

impl ConsoleError {
    fn output(what: &str, output: &str) -> Self {
        Self::Output { what: what.to_string(), output: output.trim().to_string() }
    }

    /// Process-level failures, as opposed to output the console did produce.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Spawn(_) | Self::Timeout { .. } | Self::Exit { .. })
    }

    /// Name of the command involved, for logs.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Timeout { command } | Self::Exit { command, .. } | Self::Status { command, .. } => {
                Some(command)
            }
            _ => None,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait KeyConsole: Send + Sync {
    async fn sync_status(&self) -> Result<SyncStatus, ConsoleError>;

    /// The permanent key already registered for the round starting at
    /// `round_since`, if any.
    async fn find_existing_key(&self, round_since: u32) -> Result<Option<KeyHash>, ConsoleError>;

    async fn new_key(&self) -> Result<KeyHash, ConsoleError>;

    async fn register_permanent(&self, key: &KeyHash, since: u32, until: u32) -> Result<(), ConsoleError>;

    /// Repeating this or [`bind_network_address`](Self::bind_network_address)
    /// with the same arguments is accepted.
    async fn register_temporary(&self, key: &KeyHash, until: u32) -> Result<(), ConsoleError>;

    async fn bind_network_address(&self, key: &KeyHash, adnl: &[u8; 32], until: u32) -> Result<(), ConsoleError>;

    async fn export_public_key(&self, key: &KeyHash) -> Result<[u8; 32], ConsoleError>;

    async fn sign(&self, key: &KeyHash, data: &[u8]) -> Result<[u8; 64], ConsoleError>;
}

// ════════════════════════════════════════════════════════════════════════════
// OUTPUT PARSING
// ════════════════════════════════════════════════════════════════════════════

/// Remainder of the first line starting with `prefix`, trimmed.
fn token_after<'a>(out: &'a str, prefix: &str) -> Option<&'a str> {
    out.lines()
        .find_map(|line| line.strip_prefix(prefix))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn last_line(out: &str) -> &str {
    out.trim().lines().last().unwrap_or("").trim()
}

fn expect_success(command: &str, out: &str) -> Result<(), ConsoleError> {
    let status = last_line(out);
    if status != "success" {
        return Err(ConsoleError::Status { command: command.to_string(), status: status.to_string() });
    }
    Ok(())
}

pub(crate) fn parse_getstats(out: &str) -> Result<SyncStatus, ConsoleError> {
    let field = |name: &str| {
        token_after(out, name)
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(|| ConsoleError::output("getstats", out))
    };
    Ok(SyncStatus {
        unixtime: field("unixtime")?,
        masterchain_block_time: field("masterchainblocktime")?,
    })
}

#[derive(Debug, Deserialize)]
struct EngineConfig {
    #[serde(default)]
    validators: Vec<ValidatorEntry>,
}

#[derive(Debug, Deserialize)]
struct ValidatorEntry {
    id: String,
    election_date: u32,
}

pub(crate) fn parse_getconfig(out: &str, round_since: u32) -> Result<Option<KeyHash>, ConsoleError> {
    // The JSON body sits between connection chatter and a trailing line.
    let start = out.find('{').ok_or_else(|| ConsoleError::output("getconfig", out))?;
    let end = out.rfind('}').ok_or_else(|| ConsoleError::output("getconfig", out))?;
    if end < start {
        return Err(ConsoleError::output("getconfig", out));
    }
    let config: EngineConfig = serde_json::from_str(&out[start..=end])
        .map_err(|e| ConsoleError::output("getconfig", &e.to_string()))?;

    for v in config.validators {
        if v.election_date == round_since {
            let id = BASE64
                .decode(v.id.as_bytes())
                .map_err(|_| ConsoleError::output("getconfig validator id", &v.id))?;
            let id: [u8; 32] = id
                .try_into()
                .map_err(|_| ConsoleError::output("getconfig validator id", &v.id))?;
            return Ok(Some(KeyHash::from_bytes(&id)));
        }
    }
    Ok(None)
}

pub(crate) fn parse_new_key(out: &str) -> Result<KeyHash, ConsoleError> {
    let hex = token_after(out, "created new key").ok_or_else(|| ConsoleError::output("newkey", out))?;
    KeyHash::parse(hex)
}

pub(crate) fn parse_public_key(out: &str) -> Result<[u8; 32], ConsoleError> {
    let b64 = token_after(out, "got public key:").ok_or_else(|| ConsoleError::output("exportpub", out))?;
    let bytes = BASE64
        .decode(b64.as_bytes())
        .map_err(|_| ConsoleError::output("exportpub", out))?;
    if bytes.len() < 32 {
        return Err(ConsoleError::output("exportpub", out));
    }
    // The exported form carries a TL prefix before the raw key.
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[bytes.len() - 32..]);
    Ok(key)
}

pub(crate) fn parse_signature(out: &str) -> Result<[u8; 64], ConsoleError> {
    let b64 = token_after(out, "got signature").ok_or_else(|| ConsoleError::output("sign", out))?;
    let bytes = BASE64
        .decode(b64.as_bytes())
        .map_err(|_| ConsoleError::output("sign", out))?;
    bytes.try_into().map_err(|_| ConsoleError::output("sign", out))
}

// ════════════════════════════════════════════════════════════════════════════
// ENGINE CONSOLE
// ════════════════════════════════════════════════════════════════════════════

/// Connection settings for the console executable.
#[derive(Debug, Clone)]
pub struct EngineConsoleConfig {
    pub executable: PathBuf,
    pub client_key: PathBuf,
    pub server_key: PathBuf,
    pub ip: String,
    pub control_port: u16,
    pub timeout: Duration,
}

/// Runs the console executable once per command.
pub struct EngineConsole {
    config: EngineConsoleConfig,
    lock: tokio::sync::Mutex<()>,
}

impl EngineConsole {
    pub fn new(config: EngineConsoleConfig) -> Self {
        Self { config, lock: tokio::sync::Mutex::new(()) }
    }

    async fn run(&self, command: &str) -> Result<String, ConsoleError> {
        let _guard = self.lock.lock().await;
        let address = format!("{}:{}", self.config.ip, self.config.control_port);
        debug!(command, "running console command");

        let mut cmd = tokio::process::Command::new(&self.config.executable);
        cmd.arg("-k")
            .arg(&self.config.client_key)
            .arg("-p")
            .arg(&self.config.server_key)
            .arg("-a")
            .arg(&address)
            .arg("-c")
            .arg(command)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.timeout, cmd.output())
            .await
            .map_err(|_| ConsoleError::Timeout { command: command_name(command) })?
            .map_err(|e| ConsoleError::Spawn(format!("{}: {}", self.config.executable.display(), e)))?;

        if !output.status.success() {
            return Err(ConsoleError::Exit {
                command: command_name(command),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// First word of a command line; key material never reaches the logs.
fn command_name(command: &str) -> String {
    command.split_whitespace().next().unwrap_or("").to_string()
}

#[async_trait]
impl KeyConsole for EngineConsole {
    async fn sync_status(&self) -> Result<SyncStatus, ConsoleError> {
        parse_getstats(&self.run("getstats").await?)
    }

    async fn find_existing_key(&self, round_since: u32) -> Result<Option<KeyHash>, ConsoleError> {
        parse_getconfig(&self.run("getconfig").await?, round_since)
    }

    async fn new_key(&self) -> Result<KeyHash, ConsoleError> {
        parse_new_key(&self.run("newkey").await?)
    }

    async fn register_permanent(&self, key: &KeyHash, since: u32, until: u32) -> Result<(), ConsoleError> {
        let out = self.run(&format!("addpermkey {} {} {}", key, since, until)).await?;
        expect_success("addpermkey", &out)
    }

    async fn register_temporary(&self, key: &KeyHash, until: u32) -> Result<(), ConsoleError> {
        let out = self.run(&format!("addtempkey {} {} {}", key, key, until)).await?;
        expect_success("addtempkey", &out)
    }

    async fn bind_network_address(&self, key: &KeyHash, adnl: &[u8; 32], until: u32) -> Result<(), ConsoleError> {
        let out = self
            .run(&format!("addvalidatoraddr {} {} {}", key, hex::encode_upper(adnl), until))
            .await?;
        expect_success("addvalidatoraddr", &out)
    }

    async fn export_public_key(&self, key: &KeyHash) -> Result<[u8; 32], ConsoleError> {
        parse_public_key(&self.run(&format!("exportpub {}", key)).await?)
    }

    async fn sign(&self, key: &KeyHash, data: &[u8]) -> Result<[u8; 64], ConsoleError> {
        parse_signature(&self.run(&format!("sign {} {}", key, hex::encode_upper(data))).await?)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK CONSOLE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct MockConsoleState {
    keys: HashMap<KeyHash, SigningKey>,
    /// `since` of each permanent registration.
    permanent: HashMap<KeyHash, u32>,
    /// Expiry of each temporary registration.
    temporary: HashMap<KeyHash, u32>,
    adnl: HashMap<KeyHash, [u8; 32]>,
    commands: Vec<String>,
    fail_command: Option<String>,
    lag_secs: i64,
}

/// In-process console that signs with real ed25519 keys.
#[derive(Default)]
pub struct MockConsole {
    state: Mutex<MockConsoleState>,
}

impl MockConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call of `command` (e.g. `"addtempkey"`) fail.
    pub fn fail_on(&self, command: &str) {
        self.state.lock().fail_command = Some(command.to_string());
    }

    pub fn clear_failure(&self) {
        self.state.lock().fail_command = None;
    }

    pub fn set_lag_secs(&self, lag: i64) {
        self.state.lock().lag_secs = lag;
    }

    /// Command names in call order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Whether `key` has its permanent, temporary and network address
    /// registrations.
    pub fn is_provisioned(&self, key: &KeyHash) -> bool {
        let state = self.state.lock();
        state.permanent.contains_key(key) && state.temporary.contains_key(key) && state.adnl.contains_key(key)
    }

    /// Public key for `key`, if the mock created it.
    pub fn verifying_key(&self, key: &KeyHash) -> Option<ed25519_dalek::VerifyingKey> {
        self.state.lock().keys.get(key).map(|k| k.verifying_key())
    }

    fn record(&self, command: &str) -> Result<(), ConsoleError> {
        let mut state = self.state.lock();
        state.commands.push(command.to_string());
        if state.fail_command.as_deref() == Some(command) {
            return Err(ConsoleError::Status { command: command.to_string(), status: "error".to_string() });
        }
        Ok(())
    }

    fn with_key<T>(&self, command: &str, key: &KeyHash, f: impl FnOnce(&SigningKey) -> T) -> Result<T, ConsoleError> {
        self.state
            .lock()
            .keys
            .get(key)
            .map(f)
            .ok_or_else(|| ConsoleError::Status { command: command.to_string(), status: format!("unknown key {}", key) })
    }
}

#[async_trait]
impl KeyConsole for MockConsole {
    async fn sync_status(&self) -> Result<SyncStatus, ConsoleError> {
        self.record("getstats")?;
        let lag = self.state.lock().lag_secs;
        Ok(SyncStatus { unixtime: 1_700_000_000 + lag, masterchain_block_time: 1_700_000_000 })
    }

    async fn find_existing_key(&self, round_since: u32) -> Result<Option<KeyHash>, ConsoleError> {
        self.record("getconfig")?;
        Ok(self
            .state
            .lock()
            .permanent
            .iter()
            .find(|(_, since)| **since == round_since)
            .map(|(key, _)| key.clone()))
    }

    async fn new_key(&self) -> Result<KeyHash, ConsoleError> {
        self.record("newkey")?;
        let signing = SigningKey::generate(&mut rand::rngs::OsRng);
        let id: [u8; 32] = Sha256::digest(signing.verifying_key().as_bytes()).into();
        let key = KeyHash::from_bytes(&id);
        self.state.lock().keys.insert(key.clone(), signing);
        Ok(key)
    }

    async fn register_permanent(&self, key: &KeyHash, since: u32, _until: u32) -> Result<(), ConsoleError> {
        self.record("addpermkey")?;
        self.with_key("addpermkey", key, |_| ())?;
        self.state.lock().permanent.insert(key.clone(), since);
        Ok(())
    }

    async fn register_temporary(&self, key: &KeyHash, until: u32) -> Result<(), ConsoleError> {
        self.record("addtempkey")?;
        self.with_key("addtempkey", key, |_| ())?;
        self.state.lock().temporary.insert(key.clone(), until);
        Ok(())
    }

    async fn bind_network_address(&self, key: &KeyHash, adnl: &[u8; 32], _until: u32) -> Result<(), ConsoleError> {
        self.record("addvalidatoraddr")?;
        self.with_key("addvalidatoraddr", key, |_| ())?;
        self.state.lock().adnl.insert(key.clone(), *adnl);
        Ok(())
    }

    async fn export_public_key(&self, key: &KeyHash) -> Result<[u8; 32], ConsoleError> {
        self.record("exportpub")?;
        self.with_key("exportpub", key, |k| k.verifying_key().to_bytes())
    }

    async fn sign(&self, key: &KeyHash, data: &[u8]) -> Result<[u8; 64], ConsoleError> {
        self.record("sign")?;
        self.with_key("sign", key, |k| k.sign(data).to_bytes())
    }
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<EngineConsole>();
        assert_send_sync::<MockConsole>();
    }
    let _ = check;
};
