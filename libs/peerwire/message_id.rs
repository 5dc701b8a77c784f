//! Message and peer identifiers
//!
//! Ids have the shape `<random>-<base36 millis>`: a random base-36 head
//! padded so that head and timestamp together are 15 characters, then the
//! creation time in milliseconds encoded base-36. The timestamp suffix makes
//! ids of one producer sort roughly by creation time and lets any holder of
//! an id recover when it was minted without extra bookkeeping.

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;

use crate::error::WireError;

const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const HEAD_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LENGTH: usize = 15;

/// Mint a fresh unique id
///
/// The first character is always alphabetic so ids are safe to use in
/// contexts that dislike leading digits.
pub fn unique_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let time = to_base36(millis);
    let head_len = ID_LENGTH.saturating_sub(time.len()).max(1);

    let mut rng = rand::thread_rng();
    let mut head = String::with_capacity(head_len);
    head.push(HEAD_CHARS[rng.gen_range(0..26)] as char);
    while head.len() < head_len {
        head.push(HEAD_CHARS[rng.gen_range(0..HEAD_CHARS.len())] as char);
    }

    format!("{}-{}", head, time)
}

/// Recover the creation time embedded in an id minted by [`unique_id`]
pub fn creation_time(id: &str) -> Result<DateTime<Utc>, WireError> {
    let suffix = id
        .rsplit('-')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WireError::MalformedId(id.to_string()))?;
    let millis = u64::from_str_radix(suffix, 36)
        .map_err(|_| WireError::MalformedId(id.to_string()))?;
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .ok_or_else(|| WireError::MalformedId(id.to_string()))
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    // Digits are ASCII, the conversion cannot fail
    String::from_utf8(buf).unwrap_or_default()
}
