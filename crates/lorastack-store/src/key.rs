//! Sortable primary keys.
//!
//! A key is 128 bits: a 48-bit millisecond timestamp followed by 80 bits of
//! entropy, rendered as 26 Crockford base-32 characters. Keys generated by
//! one process are strictly increasing; within the same millisecond the
//! entropy is incremented instead of redrawn.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

use lorastack_core::Error;

use crate::errors::{ERR_INVALID_KEY, ERR_NIL_KEY};

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const ENCODED_LEN: usize = 26;
const ENTROPY_MASK: u128 = (1 << 80) - 1;

/// A primary key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(u128);

static LAST: Mutex<u128> = Mutex::new(0);

impl Key {
    pub const NIL: Self = Self(0);

    /// Generate a new key, greater than every key generated before by this
    /// process.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis())
            & ((1 << 48) - 1);
        let mut entropy = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut entropy[6..]);
        let candidate = (millis << 80) | (u128::from_be_bytes(entropy) & ENTROPY_MASK);

        let mut last = LAST
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let next = if candidate > *last {
            candidate
        } else {
            last.wrapping_add(1)
        };
        *last = next;
        Self(next)
    }

    pub const fn is_nil(&self) -> bool {
        self.0 == 0
    }

    /// Fail with `nil_key` for the nil key.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_nil() {
            return Err(ERR_NIL_KEY.new_error());
        }
        Ok(())
    }

    /// Milliseconds since the Unix epoch at which the key was generated.
    pub const fn timestamp_ms(&self) -> u64 {
        (self.0 >> 80) as u64
    }

    pub const fn to_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [0u8; ENCODED_LEN];
        let mut v = self.0;
        for slot in out.iter_mut().rev() {
            *slot = ALPHABET[(v & 0x1f) as usize];
            v >>= 5;
        }
        f.write_str(std::str::from_utf8(&out).map_err(|_| fmt::Error)?)
    }
}

fn decode_char(c: u8) -> Option<u8> {
    let c = c.to_ascii_uppercase();
    let c = match c {
        b'O' => b'0',
        b'I' | b'L' => b'1',
        other => other,
    };
    ALPHABET.iter().position(|a| *a == c).and_then(|p| u8::try_from(p).ok())
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let invalid = || ERR_INVALID_KEY.with_attribute("key", s);
        if s.len() != ENCODED_LEN {
            return Err(invalid());
        }
        let bytes = s.as_bytes();
        // The first character carries only 3 bits.
        if decode_char(bytes[0]).is_none_or(|d| d > 7) {
            return Err(invalid());
        }
        let mut v: u128 = 0;
        for c in bytes {
            let d = decode_char(*c).ok_or_else(invalid)?;
            v = (v << 5) | u128::from(d);
        }
        Ok(Self(v))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_strictly_increasing() {
        let keys: Vec<Key> = (0..1000).map(|_| Key::generate()).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_string() < pair[1].to_string());
        }
    }

    #[test]
    fn string_form_round_trips() {
        let key = Key::generate();
        let s = key.to_string();
        assert_eq!(s.len(), 26);
        assert_eq!(s.parse::<Key>().unwrap(), key);
        assert_eq!(s.to_lowercase().parse::<Key>().unwrap(), key);
    }

    #[test]
    fn nil_key_is_rejected() {
        assert!(Key::NIL.check().is_err());
        assert!(Key::generate().check().is_ok());
        assert_eq!(Key::NIL.to_string(), "00000000000000000000000000");
    }

    #[test]
    fn rejects_malformed_strings() {
        for s in ["", "01ARZ3NDEKTSV4RRFFQ69G5FA", "8ZZZZZZZZZZZZZZZZZZZZZZZZZ", "01ARZ3NDEKTSV4RRFFQ69G5FAU"] {
            assert!(s.parse::<Key>().is_err(), "{s}");
        }
    }

    #[test]
    fn timestamp_is_recent() {
        let key = Key::generate();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert!(now.abs_diff(key.timestamp_ms()) < 60_000);
    }
}
