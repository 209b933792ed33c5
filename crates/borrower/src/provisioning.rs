//! Validation-key provisioning and the signed stake confirmation.
//!
//! ```text
//! find_existing_key(round) ──► found ──────────────┐
//!          │                                        ▼
//!          └─ none ─► new_key ─► addpermkey ─► addtempkey ─► addvalidatoraddr
//!                                                                    │
//!                      exportpub ◄───────────────────────────────────┘
//!                          │
//!                          ▼
//!      StakeConfirmation ─► sign(data bits) ─► StakeConfirmationEnvelope
//! ```
//!
//! Every registration uses the same expiry. A reused permanent key gets its
//! temporary key and network address registered again, so a tick aborted
//! by a console failure after `addpermkey` is completed by the next one.

use borrower_common::Address;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::{debug, info};

use crate::console::{ConsoleError, KeyConsole, KeyHash};
use crate::error::TickError;
use crate::records::{StakeConfirmation, StakeConfirmationEnvelope};

/// Inputs of one stake confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationRequest<'a> {
    pub round_since: u32,
    pub expire_at: u32,
    pub max_factor: u32,
    pub loan_address: &'a Address,
    pub adnl_address: &'a [u8; 32],
}

/// Reuses the round's permanent key or creates and registers a new one.
pub async fn provision_key(
    console: &dyn KeyConsole,
    round_since: u32,
    expire_at: u32,
    adnl_address: &[u8; 32],
) -> Result<KeyHash, ConsoleError> {
    let key = match console.find_existing_key(round_since).await? {
        Some(key) => {
            info!(round = round_since, key = %key, "🔑 reusing validation key");
            key
        }
        None => {
            let key = console.new_key().await?;
            console.register_permanent(&key, round_since, expire_at).await?;
            info!(round = round_since, key = %key, expire_at, "🔑 created validation key");
            key
        }
    };
    console.register_temporary(&key, expire_at).await?;
    console.bind_network_address(&key, adnl_address, expire_at).await?;
    Ok(key)
}

/// Provisions a key and returns the signed confirmation envelope.
///
/// The console's signature is checked against the exported public key
/// before it is used.
pub async fn sign_confirmation(
    console: &dyn KeyConsole,
    req: ConfirmationRequest<'_>,
) -> Result<StakeConfirmationEnvelope, TickError> {
    let key = provision_key(console, req.round_since, req.expire_at, req.adnl_address).await?;
    let public_key = console.export_public_key(&key).await?;

    let confirmation = StakeConfirmation {
        round_since: req.round_since,
        max_factor: req.max_factor,
        loan_address: req.loan_address.hash,
        adnl_address: *req.adnl_address,
    };
    let message = confirmation.signing_bytes()?;
    let signature = console.sign(&key, &message).await?;

    let verifying = VerifyingKey::from_bytes(&public_key).map_err(|e| ConsoleError::Output {
        what: "exportpub".to_string(),
        output: e.to_string(),
    })?;
    verifying
        .verify(&message, &Signature::from_bytes(&signature))
        .map_err(|_| ConsoleError::Output {
            what: "sign".to_string(),
            output: "signature does not match exported public key".to_string(),
        })?;
    debug!(round = req.round_since, key = %key, "stake confirmation signed");

    Ok(StakeConfirmationEnvelope {
        validator_pubkey: public_key,
        stake_at: req.round_since,
        max_factor: req.max_factor,
        adnl_address: *req.adnl_address,
        signature,
    })
}
