//! 64-bit extended unique identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::Error;

crate::define_errors! {
    namespace = "pkg/types";
    pub ERR_INVALID_EUI = InvalidArgument("invalid_eui", "invalid EUI `{value}`");
}

/// A 64-bit EUI, stored big-endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    pub const ZERO: Self = Self([0; 8]);

    pub const fn from_u64(v: u64) -> Self {
        Self(v.to_be_bytes())
    }

    pub const fn to_u64(self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }

    /// The identifier used for gateways registered by EUI, `eui-<hex>`.
    pub fn gateway_id(&self) -> String {
        format!("eui-{self:x}")
    }

    /// Render in Basic Station ID6 notation, e.g. `58a0:cbff:fe80:19`.
    pub fn to_id6(self) -> String {
        let v = self.to_u64();
        let groups = [
            (v >> 48) & 0xffff,
            (v >> 32) & 0xffff,
            (v >> 16) & 0xffff,
            v & 0xffff,
        ];
        groups
            .iter()
            .map(|g| format!("{g:x}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Parse hex (`58A0CBFFFE800019`, `58-a0-..`, `58:a0:..`), ID6
    /// (`58a0:cbff:fe80:19`, `::1`) or a decimal integer.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let invalid = || ERR_INVALID_EUI.with_attribute("value", s);
        if s.is_empty() {
            return Err(invalid());
        }

        if s.contains(':') {
            let parts: Vec<&str> = s.split(':').collect();
            if parts.len() == 8 && parts.iter().all(|p| p.len() == 2) {
                return parse_hex(&parts.concat()).ok_or_else(invalid);
            }
            return parse_id6(s).ok_or_else(invalid);
        }
        if s.contains('-') {
            let parts: Vec<&str> = s.split('-').collect();
            if parts.len() == 8 && parts.iter().all(|p| p.len() == 2) {
                return parse_hex(&parts.concat()).ok_or_else(invalid);
            }
            return Err(invalid());
        }
        if s.len() == 16 {
            if let Some(eui) = parse_hex(s) {
                return Ok(eui);
            }
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            return s.parse::<u64>().map(Self::from_u64).map_err(|_| invalid());
        }
        Err(invalid())
    }
}

fn parse_hex(s: &str) -> Option<Eui64> {
    if s.len() != 16 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some(Eui64(array))
}

fn parse_id6_groups(s: &str) -> Option<Vec<u16>> {
    if s.is_empty() {
        return Some(Vec::new());
    }
    s.split(':')
        .map(|g| {
            if g.is_empty() || g.len() > 4 {
                None
            } else {
                u16::from_str_radix(g, 16).ok()
            }
        })
        .collect()
}

fn parse_id6(s: &str) -> Option<Eui64> {
    let groups = match s.split_once("::") {
        Some((left, right)) => {
            if right.contains("::") {
                return None;
            }
            let left = parse_id6_groups(left)?;
            let right = parse_id6_groups(right)?;
            if left.len() + right.len() >= 4 {
                return None;
            }
            let mut groups = left;
            groups.resize(4 - right.len(), 0);
            groups.extend(right);
            groups
        }
        None => {
            let groups = parse_id6_groups(s)?;
            if groups.len() != 4 {
                return None;
            }
            groups
        }
    };
    let v = groups
        .iter()
        .fold(0u64, |acc, g| (acc << 16) | u64::from(*g));
    Some(Eui64::from_u64(v))
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(self, f)
    }
}

impl fmt::UpperHex for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::LowerHex for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Eui64 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for Eui64 {
    fn from(v: u64) -> Self {
        Self::from_u64(v)
    }
}

impl Serialize for Eui64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Eui64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(|e| serde::de::Error::custom(e.message()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const EUI: Eui64 = Eui64([0x58, 0xa0, 0xcb, 0xff, 0xfe, 0x80, 0x00, 0x19]);

    #[test]
    fn parses_all_notations() {
        for input in [
            "58A0CBFFFE800019",
            "58a0cbfffe800019",
            "58-A0-CB-FF-FE-80-00-19",
            "58:a0:cb:ff:fe:80:00:19",
            "58a0:cbff:fe80:19",
            " 58a0:cbff:fe80:0019 ",
            "6386328571958263833",
        ] {
            assert_eq!(Eui64::parse(input).unwrap(), EUI, "{input}");
        }
    }

    #[test]
    fn parses_compressed_id6() {
        assert_eq!(Eui64::parse("::1").unwrap(), Eui64::from_u64(1));
        assert_eq!(
            Eui64::parse("1::").unwrap(),
            Eui64::from_u64(0x0001_0000_0000_0000)
        );
        assert_eq!(
            Eui64::parse("58a0::19").unwrap(),
            Eui64::from_u64(0x58a0_0000_0000_0019)
        );
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "xyz", "58a0:cbff:fe80:19:1", "1::2::3", "58-a0", "12345g"] {
            let err = Eui64::parse(input).unwrap_err();
            assert!(err.is(&ERR_INVALID_EUI), "{input}");
        }
    }

    #[test]
    fn renders_hex_and_id6() {
        assert_eq!(EUI.to_string(), "58A0CBFFFE800019");
        assert_eq!(format!("{EUI:x}"), "58a0cbfffe800019");
        assert_eq!(EUI.gateway_id(), "eui-58a0cbfffe800019");
        assert_eq!(EUI.to_id6(), "58a0:cbff:fe80:19");
    }

    #[test]
    fn serde_uses_hex_string() {
        let json = serde_json::to_string(&EUI).unwrap();
        assert_eq!(json, "\"58A0CBFFFE800019\"");
        let back: Eui64 = serde_json::from_str("\"58a0:cbff:fe80:19\"").unwrap();
        assert_eq!(back, EUI);
    }
}
