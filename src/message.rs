//! Wire types and serialization for the messenger core.
//!
//! Everything on the wire is a bincode encoding. The outer type is the
//! [`NetMessage`] envelope; its `payload` is a nested bincode encoding of
//! the typed inner message named by `msg_type`. Reliable-broadcast frames
//! nest one level deeper: `RbMessage.value` carries a serialized
//! [`NetMessage`] whose own payload is the MVC/VC/ABC message being
//! broadcast.

use {
    crate::{
        auth::ThresholdAuth,
        error::Result,
    },
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    std::{collections::HashMap, fmt},
};

/// Index of a consensus participant.
pub type PeerId = usize;

/// Index of a client endpoint.
pub type ClientId = usize;

/// Stage labels of the self-stabilizing protocols, in protocol order.
/// These strings travel on the wire verbatim as `content` keys.
pub const SS_STAGES: [&str; 3] = ["init", "echo", "ready"];

// ── Envelope ────────────────────────────────────────────────────────────────

/// Type tag of the envelope; the closed set of sub-protocol streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Binary value broadcast.
    Bvb,
    /// Binary consensus.
    Bc,
    /// Reliable broadcast on behalf of MVC or VC.
    Rb,
    /// Reliable broadcast on behalf of atomic broadcast.
    RbAbc,
    /// Multi-valued consensus.
    Mvc,
    /// Vector consensus.
    Vc,
    /// Atomic broadcast.
    Abc,
    /// Self-stabilizing vector consensus.
    Ssvc,
    /// Decided vector from self-stabilizing vector consensus.
    Ssvcds,
    /// Self-stabilizing atomic broadcast.
    Ssabc,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            MessageType::Bvb => "BVB",
            MessageType::Bc => "BC",
            MessageType::Rb => "RB",
            MessageType::RbAbc => "RB_ABC",
            MessageType::Mvc => "MVC",
            MessageType::Vc => "VC",
            MessageType::Abc => "ABC",
            MessageType::Ssvc => "SSVC",
            MessageType::Ssvcds => "SSVCDS",
            MessageType::Ssabc => "SSABC",
        };
        f.write_str(tag)
    }
}

/// The outer wire message.
///
/// `payload` is opaque at this level; authenticity is bound by `signature`
/// through the threshold scheme, not by per-message signing keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetMessage {
    /// Nested serialization of the typed inner message.
    pub payload: Vec<u8>,
    /// Which sub-protocol stream this frame belongs to.
    pub msg_type: MessageType,
    /// Sender peer id.
    pub from: PeerId,
    /// Threshold-scheme authenticity binding over `payload`.
    pub signature: Vec<u8>,
}

impl NetMessage {
    /// Build an envelope around `payload`, signing it through `auth`.
    pub fn signed(
        payload: Vec<u8>,
        msg_type: MessageType,
        from: PeerId,
        auth: &dyn ThresholdAuth,
    ) -> Self {
        let signature = auth.sign(&payload);
        Self {
            payload,
            msg_type,
            from,
            signature,
        }
    }

    /// Serialize this envelope to wire bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Deserialize an envelope from wire bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        decode(data)
    }
}

// ── Typed inner messages ────────────────────────────────────────────────────

/// Binary value broadcast / binary consensus message. One instance per `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BcMessage {
    /// Instance key.
    pub tag: u64,
    /// The binary value being voted.
    pub value: u64,
}

/// Which sub-protocol a reliable-broadcast frame is carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RbKind {
    /// Multi-valued consensus payloads; keyed per `(Mvc, rbid)`.
    Mvc,
    /// Vector consensus payloads; keyed per `(Vc, rbid)`.
    Vc,
    /// Atomic broadcast payloads; a single global stream (`RB_ABC`).
    Abc,
}

impl fmt::Display for RbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            RbKind::Mvc => "MVC",
            RbKind::Vc => "VC",
            RbKind::Abc => "ABC",
        };
        f.write_str(tag)
    }
}

/// Reliable broadcast message. `value` is a nested serialized [`NetMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbMessage {
    /// Which sub-protocol the nested message belongs to.
    pub kind: RbKind,
    /// Instance key (with `kind`) for `RB`; carried but unkeyed for `RB_ABC`.
    pub rbid: u64,
    /// Nested serialized envelope.
    pub value: Vec<u8>,
}

/// Multi-valued consensus message. One instance per `cid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MvcMessage {
    /// Instance key.
    pub cid: u64,
    /// Proposed value bytes.
    pub value: Vec<u8>,
}

/// Vector consensus message. One instance per `vcid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VcMessage {
    /// Instance key.
    pub vcid: u64,
    /// Proposed value bytes.
    pub value: Vec<u8>,
}

/// Atomic broadcast message; a single global stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbcMessage {
    /// Sequence counter assigned by the broadcaster.
    pub num: u64,
    /// Payload bytes.
    pub value: Vec<u8>,
}

/// One aggregated evidence entry of a self-stabilizing VC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsvcEntry {
    /// Evidence value bytes.
    pub value: Vec<u8>,
}

/// Self-stabilizing vector consensus message. One instance per `ssvcid`.
///
/// `content` maps each stage label of [`SS_STAGES`] to the ordered evidence
/// collected for that stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsvcMessage {
    /// Instance key.
    pub ssvcid: u64,
    /// Per-stage aggregated evidence.
    pub content: HashMap<String, Vec<SsvcEntry>>,
}

/// One aggregated evidence entry of a self-stabilizing ABC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsabcEntry {
    /// Evidence value bytes.
    pub value: Vec<u8>,
    /// Sequence counter; 32-bit on the wire.
    pub num: u32,
}

/// Self-stabilizing atomic broadcast message; a single global stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsabcMessage {
    /// Per-stage aggregated evidence.
    pub content: HashMap<String, Vec<SsabcEntry>>,
}

/// Decided vector transported by an `SSVCDS` frame. Routed by `ssvcid`;
/// never mutated by the Byzantine injector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsvcDecision {
    /// Instance the decision belongs to.
    pub ssvcid: u64,
    /// Decided value per contributing peer.
    pub vector: HashMap<PeerId, Vec<u8>>,
}

/// Response sent back to a client over its response publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientReply {
    /// The request this reply answers.
    pub id: u64,
    /// The decided value.
    pub value: String,
}

// ── Serialisation helpers ───────────────────────────────────────────────────

/// Serialize any wire type with the crate's encoder.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize any wire type with the crate's decoder.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(data)?)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {super::*, crate::auth::NullAuth};

    #[test]
    fn test_envelope_roundtrip() {
        let auth = NullAuth;
        let payload = encode(&BcMessage { tag: 7, value: 1 }).unwrap();
        let msg = NetMessage::signed(payload, MessageType::Bvb, 2, &auth);
        let bytes = msg.serialize().unwrap();
        let decoded = NetMessage::deserialize(&bytes).unwrap();
        assert_eq!(msg, decoded);
        let inner: BcMessage = decode(&decoded.payload).unwrap();
        assert_eq!(inner, BcMessage { tag: 7, value: 1 });
    }

    #[test]
    fn test_nested_rb_roundtrip_is_identity() {
        // A non-mutated RB frame must survive the full three-level nesting
        // byte-for-byte.
        let auth = NullAuth;
        let inner = encode(&MvcMessage {
            cid: 3,
            value: b"proposal".to_vec(),
        })
        .unwrap();
        let nested = NetMessage::signed(inner, MessageType::Mvc, 1, &auth);
        let rb = RbMessage {
            kind: RbKind::Mvc,
            rbid: 9,
            value: encode(&nested).unwrap(),
        };
        let payload = encode(&rb).unwrap();
        let again: RbMessage = decode(&payload).unwrap();
        assert_eq!(encode(&again).unwrap(), payload);
    }

    #[test]
    fn test_stage_labels_travel_verbatim() {
        let mut content = HashMap::new();
        for stage in SS_STAGES {
            content.insert(
                stage.to_string(),
                vec![SsabcEntry {
                    value: vec![1],
                    num: 5,
                }],
            );
        }
        let msg = SsabcMessage { content };
        let decoded: SsabcMessage = decode(&encode(&msg).unwrap()).unwrap();
        for stage in SS_STAGES {
            assert!(decoded.content.contains_key(stage));
        }
    }

    #[test]
    fn test_type_tags_match_wire_names() {
        assert_eq!(MessageType::RbAbc.to_string(), "RB_ABC");
        assert_eq!(MessageType::Ssvcds.to_string(), "SSVCDS");
        assert_eq!(RbKind::Mvc.to_string(), "MVC");
    }
}
