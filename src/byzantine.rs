//! Byzantine behavior injector.
//!
//! Mutates outgoing payloads per recipient to exercise the fault tolerance
//! of the consensus layer under named adversarial scenarios. Mutated
//! payloads are re-encoded with the normal encoder and re-signed, so a
//! receiver cannot distinguish a mutated frame from an honest one by
//! framing alone.
//!
//! `SSVCDS` frames transport a computed decision and are never mutated.

use {
    crate::{
        auth::ThresholdAuth,
        config::Scenario,
        error::Result,
        message::{
            decode, encode, AbcMessage, BcMessage, MessageType, MvcMessage, NetMessage, PeerId,
            RbMessage, SsabcMessage, SsvcMessage, VcMessage, SS_STAGES,
        },
    },
    log::warn,
};

/// Apply the active scenario to `message` for one recipient.
///
/// Returns `Some(mutated)` when the scenario calls for a per-recipient
/// rewrite, `None` when the message goes out untouched.
pub fn inject(
    message: &NetMessage,
    recipient: PeerId,
    scenario: Scenario,
    byzantine: bool,
    auth: &dyn ThresholdAuth,
) -> Result<Option<NetMessage>> {
    if !byzantine || message.msg_type == MessageType::Ssvcds {
        return Ok(None);
    }

    match scenario {
        Scenario::BcAttack
            if matches!(message.msg_type, MessageType::Bvb | MessageType::Bc) =>
        {
            mutate_bc_attack(message, recipient, scenario, auth).map(Some)
        }
        Scenario::HalfAndHalf | Scenario::BzAll => {
            let value_to_send = if scenario == Scenario::HalfAndHalf {
                (recipient % 2) as u64
            } else {
                0
            };
            mutate_value(message, recipient, scenario, value_to_send, auth)
        }
        _ => Ok(None),
    }
}

/// `BC_ATTACK`: rewrite a BVB/BC value as a function of `tag mod 3`.
fn mutate_bc_attack(
    message: &NetMessage,
    recipient: PeerId,
    scenario: Scenario,
    auth: &dyn ThresholdAuth,
) -> Result<NetMessage> {
    let mut inner: BcMessage = decode(&message.payload)?;
    inner.value = match inner.tag % 3 {
        0 => (recipient % 2) as u64,
        1 => 0,
        _ => 1,
    };

    warn!(
        "{scenario}: ({}) {recipient} --> [{},{}]",
        message.msg_type, inner.tag, inner.value
    );

    Ok(resign(message, encode(&inner)?, auth))
}

/// `HALF_&_HALF` / `BZ_ALL`: overwrite the carried value, unwrapping the
/// reliable-broadcast nesting where needed.
fn mutate_value(
    message: &NetMessage,
    recipient: PeerId,
    scenario: Scenario,
    value_to_send: u64,
    auth: &dyn ThresholdAuth,
) -> Result<Option<NetMessage>> {
    let digits = value_to_send.to_string().into_bytes();

    let new_payload = match message.msg_type {
        MessageType::Bvb | MessageType::Bc => {
            let mut inner: BcMessage = decode(&message.payload)?;
            inner.value = value_to_send;
            warn!(
                "{scenario}: ({}) {recipient} --> [{},{}]",
                message.msg_type, inner.tag, inner.value
            );
            encode(&inner)?
        }

        MessageType::Rb | MessageType::RbAbc => {
            let mut rb: RbMessage = decode(&message.payload)?;
            let nested: NetMessage = decode(&rb.value)?;

            // Rewrite the innermost typed message, then re-encode each
            // nesting level with the normal encoder.
            let rewritten = match nested.msg_type {
                MessageType::Mvc => {
                    let mut m: MvcMessage = decode(&nested.payload)?;
                    m.value = digits;
                    warn!(
                        "{scenario}: ({}) {recipient} --> [{},{:?}]",
                        nested.msg_type, m.cid, m.value
                    );
                    encode(&m)?
                }
                MessageType::Vc => {
                    let mut m: VcMessage = decode(&nested.payload)?;
                    m.value = digits;
                    warn!(
                        "{scenario}: ({}) {recipient} --> [{},{:?}]",
                        nested.msg_type, m.vcid, m.value
                    );
                    encode(&m)?
                }
                MessageType::Abc => {
                    let mut m: AbcMessage = decode(&nested.payload)?;
                    m.value = digits;
                    warn!(
                        "{scenario}: ({}) {recipient} --> [{},{:?}]",
                        nested.msg_type, m.num, m.value
                    );
                    encode(&m)?
                }
                _ => return Ok(None),
            };

            let nested = resign(&nested, rewritten, auth);
            rb.value = encode(&nested)?;
            encode(&rb)?
        }

        MessageType::Ssvc => {
            let mut inner: SsvcMessage = decode(&message.payload)?;
            for stage in SS_STAGES {
                if let Some(entries) = inner.content.get_mut(stage) {
                    for entry in entries {
                        entry.value = digits.clone();
                    }
                }
            }
            warn!(
                "{scenario}: ({}) {recipient} every value sent --> [{value_to_send}]",
                message.msg_type
            );
            encode(&inner)?
        }

        MessageType::Ssabc => {
            let mut inner: SsabcMessage = decode(&message.payload)?;
            for stage in SS_STAGES {
                if let Some(entries) = inner.content.get_mut(stage) {
                    for entry in entries {
                        entry.value = digits.clone();
                        entry.num = u32::MAX / 2;
                    }
                }
            }
            warn!(
                "{scenario}: ({}) {recipient} every value sent --> [{value_to_send}]",
                message.msg_type
            );
            encode(&inner)?
        }

        // Direct MVC/VC/ABC frames have no mutation rule; they only carry
        // consensus values inside the RB nesting.
        _ => return Ok(None),
    };

    Ok(Some(resign(message, new_payload, auth)))
}

/// Wrap a rewritten payload in a fresh envelope of the same type and
/// origin.
fn resign(original: &NetMessage, payload: Vec<u8>, auth: &dyn ThresholdAuth) -> NetMessage {
    NetMessage::signed(payload, original.msg_type, original.from, auth)
}

// ── Tests ───────────────────────────────────────────────────────────────────
