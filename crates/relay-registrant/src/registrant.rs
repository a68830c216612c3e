//! # Registrant
//!
//! Finalizes staged envelopes: stamps the sequence position, computes the
//! expiry from the configured retention period, and signs the marshaled
//! unsigned envelope.

use crate::errors::RegistrantError;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use shared_types::{GatewayEnvelope, OriginatorId, StagedEnvelope, UnsignedGatewayEnvelope};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Domain-separation tag for originator envelope signatures.
const SIGNING_DOMAIN: &[u8] = b"relay-mesh/originator-envelope/v1";

/// Default retention period applied to published envelopes.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Computes the digest an originator signs: SHA-256 over the domain tag and
/// the marshaled unsigned envelope bytes.
#[must_use]
pub fn signing_digest(unsigned_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SIGNING_DOMAIN);
    hasher.update(unsigned_bytes);
    hasher.finalize().into()
}

/// The node's signing identity.
pub struct Registrant {
    node_id: OriginatorId,
    signing_key: SigningKey,
    retention_days: u32,
}

impl Registrant {
    /// Creates a registrant from an existing signing key.
    pub fn new(
        node_id: OriginatorId,
        signing_key: SigningKey,
        retention_days: u32,
    ) -> Result<Self, RegistrantError> {
        if node_id == 0 {
            return Err(RegistrantError::InvalidNodeId);
        }

        let registrant = Self {
            node_id,
            signing_key,
            retention_days,
        };
        info!(
            originator_id = node_id,
            public_key = %hex_key(&registrant.public_key()),
            "registrant identified"
        );
        Ok(registrant)
    }

    /// Creates a registrant from a 32-byte secret seed.
    pub fn from_seed(
        node_id: OriginatorId,
        seed: [u8; 32],
        retention_days: u32,
    ) -> Result<Self, RegistrantError> {
        Self::new(node_id, SigningKey::from_bytes(&seed), retention_days)
    }

    /// Generates a registrant with a fresh random key. Test and bootstrap
    /// use only; production nodes load their registered key.
    pub fn generate(node_id: OriginatorId) -> Result<Self, RegistrantError> {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());
        Self::new(node_id, signing_key, DEFAULT_RETENTION_DAYS)
    }

    /// Returns this node's originator ID.
    #[must_use]
    pub fn node_id(&self) -> OriginatorId {
        self.node_id
    }

    /// Returns this node's public key bytes.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Finalizes a staged envelope into a signed, sequence-stamped gateway
    /// envelope.
    ///
    /// The sequence ID is the staging ID; the expiry is now plus the
    /// configured retention period.
    pub fn sign_staged_envelope(
        &self,
        staged: &StagedEnvelope,
    ) -> Result<GatewayEnvelope, RegistrantError> {
        if staged.id <= 0 {
            return Err(RegistrantError::InvalidStagingId(staged.id));
        }

        let unsigned = UnsignedGatewayEnvelope {
            originator_id: self.node_id,
            sequence_id: staged.id as u64,
            topic: staged.topic.clone(),
            payload: staged.payload.clone(),
            gateway_ns: staged.staged_at_ns,
            expiry_unixtime: now_unixtime()
                .saturating_add(u64::from(self.retention_days) * 24 * 60 * 60),
        };

        let unsigned_bytes = unsigned.encode()?;
        let signature = self.signing_key.sign(&signing_digest(&unsigned_bytes));

        Ok(GatewayEnvelope {
            unsigned_bytes,
            signature: signature.to_bytes(),
        })
    }
}

/// Verifies a gateway envelope signature against an originator public key.
pub fn verify_gateway_envelope(
    public_key: &[u8; 32],
    envelope: &GatewayEnvelope,
) -> Result<(), RegistrantError> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| RegistrantError::InvalidPublicKey)?;
    let signature = ed25519_dalek::Signature::from_bytes(&envelope.signature);

    verifying_key
        .verify(&signing_digest(&envelope.unsigned_bytes), &signature)
        .map_err(|_| RegistrantError::SignatureVerificationFailed)
}

fn now_unixtime() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn hex_key(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
