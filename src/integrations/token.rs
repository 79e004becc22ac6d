use sha2::{Digest, Sha256};

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // separator keeps ("ab", "c") and ("a", "bc") apart
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Idempotency key for one execution of a side-effecting node.
///
/// `visit` is how many times this node already completed in the session, so
/// a redelivered trigger maps to the same token while a deliberate loop back
/// to the node gets a new one.
pub fn step_token(session_id: &str, node_id: &str, flow_version: i32, visit: u32) -> String {
    digest(&[
        session_id,
        node_id,
        &flow_version.to_string(),
        &visit.to_string(),
    ])
}

/// Key identifying one inbound event delivered to a session
pub fn trigger_token(session_id: &str, event_id: &str) -> String {
    digest(&["trigger", session_id, event_id])
}

/// Deterministic sample in `0..modulus` for an A/B decision
pub fn seeded_sample(session_id: &str, key: &str, modulus: u64) -> u64 {
    if modulus == 0 {
        return 0;
    }
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(bytes) % modulus
}
