//! Key construction helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

/// Beyond this many seconds past the epoch, nanosecond precision no longer
/// fits in an i64 and times are treated as infinitely far in the future.
const MAX_NANO_REPRESENTABLE_SECS: u64 = 9_151_488_000;

/// Concatenates byte strings, prefixing each with its 8-byte big-endian
/// length so distinct inputs can never collide.
pub fn concat_keys<I, B>(parts: I) -> Bytes
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = BytesMut::new();
    for part in parts {
        let part = part.as_ref();
        out.put_u64(part.len() as u64);
        out.put_slice(part);
    }
    out.freeze()
}

/// Returns a sorted-set score representing the given time in milliseconds
/// since the epoch.
///
/// Times too far in the future to represent become positive infinity; times
/// at or before the epoch become negative infinity.
pub fn time_score(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(since) if since.as_secs() > MAX_NANO_REPRESENTABLE_SECS => f64::INFINITY,
        Ok(since) if since > Duration::ZERO => since.as_millis() as f64,
        _ => f64::NEG_INFINITY,
    }
}

/// Returns a key whose first 8 bytes sort lexicographically by the given
/// time, followed by the id.
pub fn time_based_key(t: SystemTime, id: &str) -> Bytes {
    let nanos: u64 = match t.duration_since(UNIX_EPOCH) {
        Ok(since) if since.as_secs() > MAX_NANO_REPRESENTABLE_SECS => i64::MAX as u64,
        Ok(since) => since.as_nanos() as u64,
        Err(_) => 0,
    };
    let mut key = BytesMut::with_capacity(8 + id.len());
    key.put_u64(nanos);
    key.put_slice(id.as_bytes());
    key.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_never_collide_distinct_parts() {
        // ["ab", "c"] and ["a", "bc"] concatenate identically without the
        // length prefixes.
        assert_ne!(concat_keys(["ab", "c"]), concat_keys(["a", "bc"]));
        assert_ne!(concat_keys(["ab"]), concat_keys(["ab", ""]));
    }

    #[test]
    fn should_order_time_based_keys_chronologically() {
        // given
        let earlier = UNIX_EPOCH + Duration::from_secs(100);
        let later = UNIX_EPOCH + Duration::from_secs(200);

        // then
        assert!(time_based_key(earlier, "z") < time_based_key(later, "a"));
    }

    #[test]
    fn should_clamp_time_scores_to_infinities() {
        let far_future = UNIX_EPOCH + Duration::from_secs(MAX_NANO_REPRESENTABLE_SECS + 1);
        assert_eq!(time_score(far_future), f64::INFINITY);
        assert_eq!(time_score(UNIX_EPOCH), f64::NEG_INFINITY);

        let normal = UNIX_EPOCH + Duration::from_secs(1);
        assert_eq!(time_score(normal), 1000.0);
    }
}
