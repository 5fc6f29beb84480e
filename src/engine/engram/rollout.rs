// ── Engram: Rollout Gating ──────────────────────────────────────────────────
//
// Deterministic percentage rollout. An identity (session id, user id…) is
// hashed to a bucket in [0, 100); a feature is on only when its flag is on
// and the bucket falls under the rollout percentage.
//
// Bucket function: the first four bytes of SHA-256(identity), read as a
// big-endian u32, modulo 100. Fixed so bucket assignment is reproducible
// across processes and reimplementations.

use crate::atoms::constants::ROLLOUT_BUCKETS;
use sha2::{Digest, Sha256};

/// Bucket in `[0, 100)` for `identity`.
pub fn rollout_bucket(identity: &str) -> u32 {
    let digest = Sha256::digest(identity.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % ROLLOUT_BUCKETS
}

/// `flag_on && bucket(identity) < rollout_percent`. 100% short-circuits,
/// 0% always disables.
pub fn is_feature_enabled(flag_on: bool, identity: &str, rollout_percent: u8) -> bool {
    if !flag_on {
        return false;
    }
    let pct = u32::from(rollout_percent.min(100));
    if pct >= ROLLOUT_BUCKETS {
        return true;
    }
    rollout_bucket(identity) < pct
}
