//! Seam to the external threshold-encryption module.
//!
//! The core never holds per-message signing keys; authenticity on the
//! broadcast path is bound by the threshold scheme, which this crate sees
//! only through [`ThresholdAuth`]. The production implementation lives in
//! the threshold-encryption module; tests plug in stubs.

use crate::message::PeerId;

/// The authenticity primitives the messenger needs from the threshold
/// scheme.
pub trait ThresholdAuth: Send + Sync {
    /// Produce the authenticity binding for an outgoing payload.
    fn sign(&self, payload: &[u8]) -> Vec<u8>;

    /// Check the authenticity binding on a payload received from `from`.
    fn verify(&self, payload: &[u8], signature: &[u8], from: PeerId) -> bool;
}

/// Accept-everything implementation for tests and local bring-up.
#[cfg(any(test, feature = "dev-context-only-utils"))]
pub struct NullAuth;

#[cfg(any(test, feature = "dev-context-only-utils"))]
impl ThresholdAuth for NullAuth {
    fn sign(&self, _payload: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    fn verify(&self, _payload: &[u8], _signature: &[u8], _from: PeerId) -> bool {
        true
    }
}

/// Reject-everything implementation for exercising the authentication gate.
#[cfg(any(test, feature = "dev-context-only-utils"))]
pub struct RejectAuth;

#[cfg(any(test, feature = "dev-context-only-utils"))]
impl ThresholdAuth for RejectAuth {
    fn sign(&self, _payload: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    fn verify(&self, _payload: &[u8], _signature: &[u8], _from: PeerId) -> bool {
        false
    }
}
