//! Digest nonces and the nonce-count replay window.
//!
//! A nonce is `hex(SHA-256(ts : method : random : uri : args : realm))` followed by the
//! 48-bit millisecond timestamp `ts` in 12 hex digits, so it both expires and binds to
//! the request it was issued for without any server-side lookup.
//!
//! Replays are caught by [`NonceNcArray`]: a fixed array of slots indexed by a hash of the
//! nonce. Each slot keeps the highest nonce count seen and a 64-bit mask of the 64 counts
//! below it.

use sha2::{Digest, Sha256};
use tracing::{debug, trace};

/// Hex digits of the timestamp suffix.
pub(crate) const TIMESTAMP_HEX_LEN: usize = 12;
/// Length of every nonce issued.
pub(crate) const NONCE_LEN: usize = 64 + TIMESTAMP_HEX_LEN;
/// A registered nonce that was never used is only replaced after this many milliseconds.
pub(crate) const REUSE_TIMEOUT_MS: u64 = 30_000;

const TIMESTAMP_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Request facts a nonce is bound to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NonceBinding<'a> {
    pub method: &'a [u8],
    pub random: &'a [u8],
    pub uri: &'a [u8],
    /// Query arguments as `name=value` pairs joined by `&`, in arrival order.
    pub args: &'a [u8],
    pub realm: &'a [u8],
}

/// Builds the nonce for `binding` at time `ts_ms`.
pub(crate) fn generate_nonce(ts_ms: u64, binding: &NonceBinding<'_>) -> String {
    let ts = ts_ms & TIMESTAMP_MASK;
    let mut hasher = Sha256::new();
    hasher.update(&ts.to_be_bytes()[2..]);
    for part in [binding.method, binding.random, binding.uri, binding.args, binding.realm] {
        hasher.update(b":");
        hasher.update(part);
    }
    let mut nonce = hex::encode(hasher.finalize());
    nonce.push_str(&format!("{ts:012x}"));
    nonce
}

/// The timestamp of a nonce we issued, `None` when it cannot be one of ours.
pub(crate) fn nonce_timestamp(nonce: &str) -> Option<u64> {
    if nonce.len() != NONCE_LEN || !nonce.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(&nonce[NONCE_LEN - TIMESTAMP_HEX_LEN..], 16).ok()
}

/// Milliseconds from `ts` to `now`, both truncated to 48 bits.
pub(crate) fn elapsed_ms(ts: u64, now_ms: u64) -> u64 {
    (now_ms & TIMESTAMP_MASK).wrapping_sub(ts) & TIMESTAMP_MASK
}

/// Deterministic timestamp offset for a second registration attempt, 1 to 127 ms.
pub(crate) fn retry_jitter(nonce: &str) -> u64 {
    let first = nonce.as_bytes().first().copied().unwrap_or_default();
    u64::from(first.wrapping_mul(31) % 127) + 1
}

/// Outcome of [`NonceNcArray::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCheck {
    Ok,
    /// Replayed count, or a nonce that was overwritten or expired.
    Stale,
    /// Never issued here, or an invalid count.
    Wrong,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    nonce: String,
    nc: u64,
    nmask: u64,
}

/// Fixed-capacity replay window shared by all connections of a daemon.
#[derive(Debug)]
pub struct NonceNcArray {
    slots: Vec<Slot>,
}

impl NonceNcArray {
    pub fn new(size: usize) -> Self {
        Self { slots: vec![Slot::default(); size.max(1)] }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot_index(&self, nonce: &str) -> usize {
        let mut hash: u32 = 0;
        for &b in nonce.as_bytes() {
            hash = hash.rotate_left(7) ^ u32::from(b);
        }
        hash as usize % self.slots.len()
    }

    /// Registers a freshly generated nonce, `false` when its slot is still in use.
    pub fn try_register(&mut self, nonce: &str, now_ms: u64) -> bool {
        let index = self.slot_index(nonce);
        let slot = &mut self.slots[index];
        let reusable = slot.nonce.is_empty()
            || (slot.nonce == nonce && slot.nc == 0)
            || nonce_timestamp(&slot.nonce).is_none_or(|ts| elapsed_ms(ts, now_ms) > REUSE_TIMEOUT_MS);
        if !reusable {
            trace!(index, "nonce slot still in use");
            return false;
        }
        slot.nonce.clear();
        slot.nonce.push_str(nonce);
        slot.nc = 0;
        slot.nmask = 0;
        true
    }

    /// Checks and records the pair `(nonce, nc)`.
    pub fn check(&mut self, nonce: &str, nc: u64) -> NonceCheck {
        let index = self.slot_index(nonce);
        let slot = &mut self.slots[index];
        if slot.nonce.is_empty() || nc == 0 {
            return NonceCheck::Wrong;
        }
        if slot.nonce != nonce {
            debug!(index, "nonce slot was reused by another nonce");
            return NonceCheck::Stale;
        }

        if nc > slot.nc {
            let shift = nc - slot.nc;
            let mut mask = if shift < 64 { slot.nmask << shift } else { 0 };
            if slot.nc > 0 && shift <= 64 {
                mask |= 1 << (shift - 1);
            }
            slot.nmask = mask;
            slot.nc = nc;
            return NonceCheck::Ok;
        }

        let distance = slot.nc - nc;
        if distance == 0 || distance >= 64 {
            return NonceCheck::Stale;
        }
        let bit = 1u64 << (distance - 1);
        if slot.nmask & bit != 0 {
            return NonceCheck::Stale;
        }
        slot.nmask |= bit;
        NonceCheck::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000_000;

    fn binding() -> NonceBinding<'static> {
        NonceBinding { method: b"GET", random: b"secret", uri: b"/private", args: b"", realm: b"users" }
    }

    fn registered(array: &mut NonceNcArray) -> String {
        let nonce = generate_nonce(NOW, &binding());
        assert!(array.try_register(&nonce, NOW));
        nonce
    }

    #[test]
    fn nonce_layout() {
        let nonce = generate_nonce(NOW, &binding());
        assert_eq!(nonce.len(), NONCE_LEN);
        assert_eq!(nonce_timestamp(&nonce), Some(NOW & TIMESTAMP_MASK));
        assert_ne!(nonce, generate_nonce(NOW, &NonceBinding { uri: b"/other", ..binding() }));
        assert_eq!(nonce, generate_nonce(NOW, &binding()));
        assert_eq!(nonce_timestamp("xyz"), None);
    }

    #[test]
    fn replay_scenario() {
        let mut array = NonceNcArray::new(16);
        let nonce = registered(&mut array);

        assert_eq!(array.check(&nonce, 1), NonceCheck::Ok);
        assert_eq!(array.check(&nonce, 2), NonceCheck::Ok);
        assert_eq!(array.check(&nonce, 1), NonceCheck::Stale);
        assert_eq!(array.check(&nonce, 5), NonceCheck::Ok);
        // 3 was never seen
        assert_eq!(array.check(&nonce, 3), NonceCheck::Ok);
        assert_eq!(array.check(&nonce, 3), NonceCheck::Stale);
        assert_eq!(array.check(&nonce, 5), NonceCheck::Stale);
        assert_eq!(array.check(&nonce, 4), NonceCheck::Ok);
    }

    #[test]
    fn counts_behind_the_window_are_stale() {
        let mut array = NonceNcArray::new(16);
        let nonce = registered(&mut array);
        assert_eq!(array.check(&nonce, 100), NonceCheck::Ok);
        assert_eq!(array.check(&nonce, 36), NonceCheck::Stale);
        assert_eq!(array.check(&nonce, 37), NonceCheck::Ok);
        assert_eq!(array.check(&nonce, 37), NonceCheck::Stale);

        assert_eq!(array.check(&nonce, 164), NonceCheck::Ok);
        // 100 is exactly 64 behind
        assert_eq!(array.check(&nonce, 100), NonceCheck::Stale);
    }

    #[test]
    fn large_jump_keeps_previous_count() {
        let mut array = NonceNcArray::new(16);
        let nonce = registered(&mut array);
        assert_eq!(array.check(&nonce, 10), NonceCheck::Ok);
        assert_eq!(array.check(&nonce, 73), NonceCheck::Ok);
        assert_eq!(array.check(&nonce, 10), NonceCheck::Stale);
        assert_eq!(array.check(&nonce, 11), NonceCheck::Ok);
    }

    #[test]
    fn unknown_nonces_and_zero_counts() {
        let mut array = NonceNcArray::new(16);
        assert_eq!(array.check(&generate_nonce(NOW, &binding()), 1), NonceCheck::Wrong);
        let nonce = registered(&mut array);
        assert_eq!(array.check(&nonce, 0), NonceCheck::Wrong);
    }

    #[test]
    fn slot_admission() {
        let mut array = NonceNcArray::new(1);
        let first = registered(&mut array);
        // re-registering an unused nonce is allowed
        assert!(array.try_register(&first, NOW));
        assert_eq!(array.check(&first, 1), NonceCheck::Ok);

        let second = generate_nonce(NOW + 1, &binding());
        assert!(!array.try_register(&second, NOW + 1));
        assert!(array.try_register(&second, NOW + REUSE_TIMEOUT_MS + 1));
        assert_eq!(array.check(&first, 2), NonceCheck::Stale);
    }

    #[test]
    fn jitter_range() {
        for nonce in ["", "0", "f", "zz", "\u{7f}"] {
            let jitter = retry_jitter(nonce);
            assert!((1..=127).contains(&jitter));
        }
    }
}
