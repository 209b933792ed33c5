//! # Wallet / Transaction Signer
//!
//! Sends one internal message from the operator's standard wallet and waits
//! until the wallet's `seqno` advances, which means the transfer executed.
//!
//! ## Transfer Body
//!
//! ```text
//! signature:bits512
//! subwallet_id:uint32 valid_until:uint32 seqno:uint32
//! [op:uint8]            (v4r2 only, 0 = simple send)
//! mode:uint8
//! ^internal_message
//! ```
//!
//! The signature covers the representation hash of the same body without
//! the signature field.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use borrower_common::{message, Address, Cell, CellBuilder, CellError, Coins};
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::chain::{BlockRef, ChainClient, ChainError, StackEntry};
use crate::clock::unix_now;

/// Default `subwallet_id` of basechain standard wallets.
pub const DEFAULT_SUBWALLET_ID: u32 = 698_983_191;

/// Pay fees separately and ignore action-phase errors.
const SEND_MODE: u64 = 3;

const SEQNO_POLL_INTERVAL: Duration = Duration::from_secs(3);

// ════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletVersion {
    V3r2,
    V4r2,
}

/// Message the wallet is asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub dest: Address,
    pub value: Coins,
    pub bounce: bool,
    pub body: Cell,
}

/// Proof that the wallet executed a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Seqno consumed by the transfer.
    pub seqno: u32,
    /// Hash of the signed external message body.
    pub body_hash: [u8; 32],
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("wallet message encoding: {0}")]
    Codec(#[from] CellError),

    #[error("wallet key: {0}")]
    Key(String),

    #[error("transfer with seqno {seqno} not confirmed within {timeout_secs}s")]
    NotConfirmed { seqno: u32, timeout_secs: u64 },
}

impl WalletError {
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Chain(e) => e.is_transport(),
            Self::NotConfirmed { .. } => true,
            _ => false,
        }
    }
}

#[async_trait]
pub trait Wallet: Send + Sync {
    fn address(&self) -> Address;

    async fn balance(&self, block: &BlockRef) -> Result<Coins, WalletError>;

    /// Sends `message` and waits up to `timeout` for it to execute.
    async fn send_and_wait(&self, message: OutboundMessage, timeout: Duration) -> Result<TxReceipt, WalletError>;
}

// ════════════════════════════════════════════════════════════════════════════
// KEY LOADING
// ════════════════════════════════════════════════════════════════════════════

/// Reads an ed25519 private key file.
///
/// Accepted contents: 32 raw seed bytes, 64 raw `seed || public` bytes, or
/// either of those hex-encoded.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, WalletError> {
    let raw = std::fs::read(path).map_err(|e| WalletError::Key(format!("{}: {}", path.display(), e)))?;
    let bytes = match std::str::from_utf8(&raw).ok().map(str::trim) {
        Some(text) if (text.len() == 64 || text.len() == 128) && text.bytes().all(|b| b.is_ascii_hexdigit()) => {
            hex::decode(text).map_err(|e| WalletError::Key(format!("{}: {}", path.display(), e)))?
        }
        _ => raw,
    };
    if bytes.len() != 32 && bytes.len() != 64 {
        return Err(WalletError::Key(format!(
            "{}: expected 32 or 64 key bytes, got {}",
            path.display(),
            bytes.len()
        )));
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&bytes[..32]);
    Ok(SigningKey::from_bytes(&seed))
}

// ════════════════════════════════════════════════════════════════════════════
// STANDARD WALLET
// ════════════════════════════════════════════════════════════════════════════

pub struct StandardWallet {
    chain: Arc<dyn ChainClient>,
    address: Address,
    version: WalletVersion,
    subwallet_id: u32,
    key: SigningKey,
    poll_interval: Duration,
    lock: tokio::sync::Mutex<()>,
}

impl StandardWallet {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        address: Address,
        version: WalletVersion,
        subwallet_id: u32,
        key: SigningKey,
    ) -> Self {
        Self {
            chain,
            address,
            version,
            subwallet_id,
            key,
            poll_interval: SEQNO_POLL_INTERVAL,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    async fn seqno(&self) -> Result<u32, WalletError> {
        let head = self.chain.current_chain_head().await?;
        let stack = self.chain.run_get_method(&head, &self.address, "seqno", &[]).await?;
        match stack.first() {
            Some(StackEntry::Int(n)) => u32::try_from(*n)
                .map_err(|_| WalletError::from(ChainError::stack("seqno", 0, format!("out of range: {}", n)))),
            Some(other) => Err(ChainError::stack("seqno", 0, format!("expected int, got {}", other.kind())).into()),
            None => Err(ChainError::stack("seqno", 0, "empty stack").into()),
        }
    }

    fn body_fields(&self, builder: CellBuilder, seqno: u32, valid_until: u32, msg: Cell) -> Result<CellBuilder, CellError> {
        let mut b = builder
            .store_uint(self.subwallet_id as u64, 32)?
            .store_uint(valid_until as u64, 32)?
            .store_uint(seqno as u64, 32)?;
        if self.version == WalletVersion::V4r2 {
            b = b.store_uint(0, 8)?;
        }
        b.store_uint(SEND_MODE, 8)?.store_ref(msg)
    }

    /// Signed transfer body carrying `msg`.
    pub fn transfer_body(&self, seqno: u32, valid_until: u32, msg: Cell) -> Result<Cell, CellError> {
        let unsigned = self.body_fields(CellBuilder::new(), seqno, valid_until, msg.clone())?.build();
        let signature = self.key.sign(&unsigned.hash());
        Ok(self
            .body_fields(CellBuilder::new().store_bytes(&signature.to_bytes())?, seqno, valid_until, msg)?
            .build())
    }
}

#[async_trait]
impl Wallet for StandardWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn balance(&self, block: &BlockRef) -> Result<Coins, WalletError> {
        Ok(self.chain.get_account(block, &self.address).await?.balance)
    }

    async fn send_and_wait(&self, out: OutboundMessage, timeout: Duration) -> Result<TxReceipt, WalletError> {
        let _guard = self.lock.lock().await;

        let seqno = self.seqno().await?;
        let valid_until = (unix_now() + timeout.as_secs().max(60)) as u32;
        let msg = message::internal(&out.dest, out.value, out.bounce, out.body)?;
        let body = self.transfer_body(seqno, valid_until, msg)?;
        let body_hash = body.hash();

        self.chain.send_external_message(&self.address, body).await?;
        info!(seqno, dest = %out.dest, value = %out.value, "wallet transfer broadcast");

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            match self.seqno().await {
                Ok(current) if current > seqno => return Ok(TxReceipt { seqno, body_hash }),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "seqno poll failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WalletError::NotConfirmed { seqno, timeout_secs: timeout.as_secs() });
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK WALLET
// ════════════════════════════════════════════════════════════════════════════

struct MockWalletState {
    balance: Coins,
    sent: Vec<OutboundMessage>,
    next_error: Option<WalletError>,
    seqno: u32,
}

/// Wallet with a fixed balance that records every message it is asked to send.
pub struct MockWallet {
    address: Address,
    state: Mutex<MockWalletState>,
}

impl MockWallet {
    pub fn new(address: Address, balance: Coins) -> Self {
        Self {
            address,
            state: Mutex::new(MockWalletState { balance, sent: Vec::new(), next_error: None, seqno: 0 }),
        }
    }

    pub fn set_balance(&self, balance: Coins) {
        self.state.lock().balance = balance;
    }

    /// Makes the next `send_and_wait` fail with `error`.
    pub fn fail_next_send(&self, error: WalletError) {
        self.state.lock().next_error = Some(error);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().sent.clone()
    }
}

#[async_trait]
impl Wallet for MockWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn balance(&self, _block: &BlockRef) -> Result<Coins, WalletError> {
        Ok(self.state.lock().balance)
    }

    async fn send_and_wait(&self, out: OutboundMessage, _timeout: Duration) -> Result<TxReceipt, WalletError> {
        let mut state = self.state.lock();
        if let Some(e) = state.next_error.take() {
            return Err(e);
        }
        let body_hash = out.body.hash();
        state.sent.push(out);
        state.seqno += 1;
        Ok(TxReceipt { seqno: state.seqno - 1, body_hash })
    }
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<StandardWallet>();
        assert_send_sync::<MockWallet>();
    }
    let _ = check;
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use ed25519_dalek::{Signature, Verifier};
    use std::io::Write;

    fn wallet_addr() -> Address {
        Address::new(-1, [0x77; 32])
    }

    fn make_wallet(chain: Arc<MockChainClient>, version: WalletVersion) -> StandardWallet {
        StandardWallet::new(chain, wallet_addr(), version, DEFAULT_SUBWALLET_ID, SigningKey::from_bytes(&[9u8; 32]))
            .with_poll_interval(Duration::from_millis(1))
    }

    fn inner_message() -> Cell {
        message::internal(&Address::new(-1, [1; 32]), Coins::from_coins(2), true, Cell::empty()).unwrap()
    }

    #[test]
    fn test_transfer_body_layout_and_signature() {
        let wallet = make_wallet(Arc::new(MockChainClient::new()), WalletVersion::V4r2);
        let body = wallet.transfer_body(7, 1_700_000_000, inner_message()).unwrap();
        assert_eq!(body.bit_len(), 512 + 32 * 3 + 8 + 8);

        let mut s = body.parse();
        let sig: [u8; 64] = s.load_bytes(64).unwrap().try_into().unwrap();
        assert_eq!(s.load_uint(32).unwrap(), DEFAULT_SUBWALLET_ID as u64);
        assert_eq!(s.load_uint(32).unwrap(), 1_700_000_000);
        assert_eq!(s.load_uint(32).unwrap(), 7);
        assert_eq!(s.load_uint(8).unwrap(), 0);
        assert_eq!(s.load_uint(8).unwrap(), SEND_MODE);

        let unsigned = wallet.body_fields(CellBuilder::new(), 7, 1_700_000_000, inner_message()).unwrap().build();
        let vk = ed25519_dalek::VerifyingKey::from_bytes(&wallet.public_key()).unwrap();
        assert!(vk.verify(&unsigned.hash(), &Signature::from_bytes(&sig)).is_ok());
    }

    #[test]
    fn test_v3_body_has_no_op_byte() {
        let wallet = make_wallet(Arc::new(MockChainClient::new()), WalletVersion::V3r2);
        let body = wallet.transfer_body(0, 0, inner_message()).unwrap();
        assert_eq!(body.bit_len(), 512 + 32 * 3 + 8);
    }

    #[tokio::test]
    async fn test_send_and_wait_confirms_on_seqno_advance() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_head(BlockRef { workchain: -1, shard: i64::MIN, seqno: 1 });
        chain.push_method_result(wallet_addr(), "seqno", Ok(vec![StackEntry::Int(4)]));
        chain.push_method_result(wallet_addr(), "seqno", Ok(vec![StackEntry::Int(4)]));
        chain.push_method_result(wallet_addr(), "seqno", Ok(vec![StackEntry::Int(5)]));

        let wallet = make_wallet(chain.clone(), WalletVersion::V4r2);
        let out = OutboundMessage {
            dest: Address::new(-1, [1; 32]),
            value: Coins::from_coins(3),
            bounce: true,
            body: Cell::empty(),
        };
        let receipt = wallet.send_and_wait(out, Duration::from_secs(5)).await.unwrap();
        assert_eq!(receipt.seqno, 4);

        let sent = chain.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, wallet_addr());
        assert_eq!(sent[0].1.hash(), receipt.body_hash);
    }

    #[tokio::test]
    async fn test_send_and_wait_times_out() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_head(BlockRef { workchain: -1, shard: i64::MIN, seqno: 1 });
        chain.set_method(wallet_addr(), "seqno", vec![StackEntry::Int(9)]);

        let wallet = make_wallet(chain, WalletVersion::V3r2);
        let out = OutboundMessage { dest: wallet_addr(), value: Coins::ZERO, bounce: false, body: Cell::empty() };
        let err = wallet.send_and_wait(out, Duration::from_millis(5)).await.unwrap_err();
        assert!(matches!(err, WalletError::NotConfirmed { seqno: 9, .. }));
        assert!(err.is_transport());
    }

    #[test]
    fn test_load_signing_key_forms() {
        let mut raw = tempfile::NamedTempFile::new().unwrap();
        raw.write_all(&[5u8; 64]).unwrap();
        let from_raw = load_signing_key(raw.path()).unwrap();

        let mut text = tempfile::NamedTempFile::new().unwrap();
        writeln!(text, "{}", hex::encode([5u8; 32])).unwrap();
        let from_hex = load_signing_key(text.path()).unwrap();
        assert_eq!(from_raw.to_bytes(), from_hex.to_bytes());

        let mut short = tempfile::NamedTempFile::new().unwrap();
        short.write_all(&[1u8; 10]).unwrap();
        assert!(matches!(load_signing_key(short.path()), Err(WalletError::Key(_))));
    }

    #[tokio::test]
    async fn test_mock_wallet_records_and_fails() {
        let wallet = MockWallet::new(wallet_addr(), Coins::from_coins(10));
        wallet.fail_next_send(WalletError::Key("locked".into()));
        let out = OutboundMessage { dest: wallet_addr(), value: Coins::ZERO, bounce: true, body: Cell::empty() };
        assert!(wallet.send_and_wait(out.clone(), Duration::from_secs(1)).await.is_err());
        assert!(wallet.send_and_wait(out, Duration::from_secs(1)).await.is_ok());
        assert_eq!(wallet.sent().len(), 1);
    }
}
