//! Update-info request and response of the Basic Station CUPS protocol.
//!
//! The request is JSON. The response is a packed little-endian frame:
//!
//! | Field      | Type            |
//! |------------|-----------------|
//! | cupsUriLen | u8              |
//! | cupsUri    | bytes           |
//! | tcUriLen   | u8              |
//! | tcUri      | bytes           |
//! | cupsCredLen| u16             |
//! | cupsCred   | bytes           |
//! | tcCredLen  | u16             |
//! | tcCred     | bytes           |
//! | sigLen     | u16             |
//! | sigCRC     | u32             |
//! | sig        | bytes           |
//! | updLen     | u32             |
//! | updData    | bytes           |

use bytes::{Buf, BufMut};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use lorastack_core::{Eui64, Result};

use crate::errors::{ERR_FIELD_TOO_LONG, ERR_TRAILING_DATA, ERR_TRUNCATED};

/// Request body of `POST /update-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfoRequest {
    #[serde(deserialize_with = "router_eui")]
    pub router: Eui64,
    #[serde(default, rename = "cupsUri")]
    pub cups_uri: String,
    #[serde(default, rename = "tcUri")]
    pub lns_uri: String,
    #[serde(default)]
    pub cups_cred_crc: u32,
    #[serde(default, rename = "tcCredCrc")]
    pub lns_cred_crc: u32,
    #[serde(default)]
    pub station: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub package: String,
    /// CRCs of the signing keys the gateway can verify with.
    #[serde(default)]
    pub keys: Vec<u32>,
}

/// Stations report the router as an ID6 or hex string, or as an integer.
fn router_eui<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Eui64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Router {
        Text(String),
        Number(u64),
    }
    match Router::deserialize(deserializer)? {
        Router::Text(s) => Eui64::parse(&s).map_err(|e| de::Error::custom(e.message())),
        Router::Number(n) => Ok(Eui64::from_u64(n)),
    }
}

/// Response body of `POST /update-info`. Empty fields mean no change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateInfoResponse {
    pub cups_uri: String,
    pub lns_uri: String,
    pub cups_credentials: Vec<u8>,
    pub lns_credentials: Vec<u8>,
    pub signature_key_crc: u32,
    pub signature: Vec<u8>,
    pub update_data: Vec<u8>,
}

const MAX_URI: usize = u8::MAX as usize;
const MAX_CREDENTIALS: usize = u16::MAX as usize;
const MAX_SIGNATURE: usize = u16::MAX as usize;
const MAX_UPDATE: usize = u32::MAX as usize;

fn check_len(field: &'static str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(ERR_FIELD_TOO_LONG.with_attributes([
            ("field", serde_json::Value::from(field)),
            ("length", serde_json::Value::from(len)),
            ("max", serde_json::Value::from(max)),
        ]));
    }
    Ok(())
}

impl UpdateInfoResponse {
    /// Whether the response instructs no change at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Encode the response frame. Over-limit fields fail with
    /// `field_too_long` naming the field.
    #[allow(clippy::cast_possible_truncation)]
    pub fn marshal(&self) -> Result<Vec<u8>> {
        check_len("cups_uri", self.cups_uri.len(), MAX_URI)?;
        check_len("lns_uri", self.lns_uri.len(), MAX_URI)?;
        check_len("cups_credentials", self.cups_credentials.len(), MAX_CREDENTIALS)?;
        check_len("lns_credentials", self.lns_credentials.len(), MAX_CREDENTIALS)?;
        check_len("signature", self.signature.len(), MAX_SIGNATURE)?;
        check_len("update_data", self.update_data.len(), MAX_UPDATE)?;

        let mut buf = Vec::with_capacity(
            1 + self.cups_uri.len()
                + 1
                + self.lns_uri.len()
                + 2
                + self.cups_credentials.len()
                + 2
                + self.lns_credentials.len()
                + 2
                + 4
                + self.signature.len()
                + 4
                + self.update_data.len(),
        );
        buf.put_u8(self.cups_uri.len() as u8);
        buf.put_slice(self.cups_uri.as_bytes());
        buf.put_u8(self.lns_uri.len() as u8);
        buf.put_slice(self.lns_uri.as_bytes());
        buf.put_u16_le(self.cups_credentials.len() as u16);
        buf.put_slice(&self.cups_credentials);
        buf.put_u16_le(self.lns_credentials.len() as u16);
        buf.put_slice(&self.lns_credentials);
        buf.put_u16_le(self.signature.len() as u16);
        buf.put_u32_le(self.signature_key_crc);
        buf.put_slice(&self.signature);
        buf.put_u32_le(self.update_data.len() as u32);
        buf.put_slice(&self.update_data);
        Ok(buf)
    }

    /// Decode a response frame, as a station does.
    pub fn unmarshal(mut data: &[u8]) -> Result<Self> {
        let buf = &mut data;
        let cups_uri_len = usize::from(take_u8(buf, "cups_uri")?);
        let cups_uri = take_string(buf, "cups_uri", cups_uri_len)?;
        let lns_uri_len = usize::from(take_u8(buf, "lns_uri")?);
        let lns_uri = take_string(buf, "lns_uri", lns_uri_len)?;
        let cups_len = usize::from(take_u16(buf, "cups_credentials")?);
        let cups_credentials = take(buf, "cups_credentials", cups_len)?;
        let lns_len = usize::from(take_u16(buf, "lns_credentials")?);
        let lns_credentials = take(buf, "lns_credentials", lns_len)?;
        let sig_len = usize::from(take_u16(buf, "signature")?);
        let signature_key_crc = take_u32(buf, "signature_key_crc")?;
        let signature = take(buf, "signature", sig_len)?;
        let update_len = usize::try_from(take_u32(buf, "update_data")?)
            .map_err(|_| ERR_TRUNCATED.with_attribute("field", "update_data"))?;
        let update_data = take(buf, "update_data", update_len)?;
        if buf.has_remaining() {
            return Err(ERR_TRAILING_DATA.with_attribute("length", buf.remaining()));
        }
        Ok(Self {
            cups_uri,
            lns_uri,
            cups_credentials,
            lns_credentials,
            signature_key_crc,
            signature,
            update_data,
        })
    }
}

fn ensure(buf: &[u8], field: &'static str, len: usize) -> Result<()> {
    if buf.len() < len {
        return Err(ERR_TRUNCATED.with_attribute("field", field));
    }
    Ok(())
}

fn take_u8(buf: &mut &[u8], field: &'static str) -> Result<u8> {
    ensure(buf.chunk(), field, 1)?;
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8], field: &'static str) -> Result<u16> {
    ensure(buf.chunk(), field, 2)?;
    Ok(buf.get_u16_le())
}

fn take_u32(buf: &mut &[u8], field: &'static str) -> Result<u32> {
    ensure(buf.chunk(), field, 4)?;
    Ok(buf.get_u32_le())
}

fn take(buf: &mut &[u8], field: &'static str, len: usize) -> Result<Vec<u8>> {
    ensure(buf.chunk(), field, len)?;
    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}

fn take_string(buf: &mut &[u8], field: &'static str, len: usize) -> Result<String> {
    String::from_utf8(take(buf, field, len)?)
        .map_err(|_| ERR_TRUNCATED.with_attribute("field", field))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_request_with_id6_router() {
        let req: UpdateInfoRequest = serde_json::from_str(
            r#"{
                "router": "58a0:cbff:fe80:19",
                "cupsUri": "https://cups.example.com:443",
                "tcUri": "wss://lns.example.com:8887",
                "cupsCredCrc": 1398343300,
                "tcCredCrc": 0,
                "station": "2.0.5(rak7248/std)",
                "model": "rak7248",
                "package": "1.2.3",
                "keys": [2, 3]
            }"#,
        )
        .unwrap();
        assert_eq!(req.router, Eui64::from_u64(0x58a0_cbff_fe80_0019));
        assert_eq!(req.cups_cred_crc, 1_398_343_300);
        assert_eq!(req.lns_uri, "wss://lns.example.com:8887");
        assert_eq!(req.keys, vec![2, 3]);
    }

    #[test]
    fn decodes_request_with_numeric_router_and_defaults() {
        let req: UpdateInfoRequest = serde_json::from_str(r#"{"router": 1}"#).unwrap();
        assert_eq!(req.router, Eui64::from_u64(1));
        assert!(req.cups_uri.is_empty());
        assert!(req.keys.is_empty());
    }

    #[test]
    fn rejects_request_with_bad_router() {
        assert!(serde_json::from_str::<UpdateInfoRequest>(r#"{"router": "zz"}"#).is_err());
        assert!(serde_json::from_str::<UpdateInfoRequest>("{}").is_err());
    }

    #[test]
    fn empty_response_is_all_zero_lengths() {
        let frame = UpdateInfoResponse::default().marshal().unwrap();
        assert_eq!(frame, vec![0u8; 1 + 1 + 2 + 2 + 2 + 4 + 4]);
    }

    #[test]
    fn frame_layout_is_little_endian_and_ordered() {
        let res = UpdateInfoResponse {
            cups_uri: "https://a".to_string(),
            lns_uri: "wss://b:443".to_string(),
            cups_credentials: vec![1, 2, 3],
            lns_credentials: vec![4],
            signature_key_crc: 0x0102_0304,
            signature: vec![9; 64],
            update_data: vec![7; 300],
        };
        let frame = res.marshal().unwrap();
        assert_eq!(frame[0], 9);
        assert_eq!(&frame[1..10], b"https://a");
        assert_eq!(frame[10], 11);
        let creds = 10 + 1 + 11;
        assert_eq!(&frame[creds..creds + 2], &[3, 0]);
        let sig = creds + 2 + 3 + 2 + 1;
        assert_eq!(&frame[sig..sig + 2], &[64, 0]);
        assert_eq!(&frame[sig + 2..sig + 6], &[4, 3, 2, 1]);
        let upd = sig + 6 + 64;
        assert_eq!(&frame[upd..upd + 4], &[0x2c, 0x01, 0, 0]);
        assert_eq!(frame.len(), upd + 4 + 300);

        assert_eq!(UpdateInfoResponse::unmarshal(&frame).unwrap(), res);
    }

    #[test]
    fn over_limit_fields_are_named() {
        let res = UpdateInfoResponse {
            lns_uri: "x".repeat(256),
            ..UpdateInfoResponse::default()
        };
        let err = res.marshal().unwrap_err();
        assert!(err.is(&ERR_FIELD_TOO_LONG));
        assert_eq!(err.attribute("field"), Some(&serde_json::json!("lns_uri")));

        let res = UpdateInfoResponse {
            cups_credentials: vec![0; 65_536],
            ..UpdateInfoResponse::default()
        };
        let err = res.marshal().unwrap_err();
        assert!(lorastack_core::errors::is_invalid_argument(&err));
        assert_eq!(
            err.attribute("field"),
            Some(&serde_json::json!("cups_credentials"))
        );

        let res = UpdateInfoResponse {
            cups_uri: "x".repeat(255),
            signature: vec![0; 65_535],
            ..UpdateInfoResponse::default()
        };
        assert!(res.marshal().is_ok());
    }

    #[test]
    fn unmarshal_rejects_truncated_and_trailing_frames() {
        let frame = UpdateInfoResponse {
            update_data: vec![1, 2, 3],
            ..UpdateInfoResponse::default()
        }
        .marshal()
        .unwrap();

        let err = UpdateInfoResponse::unmarshal(&frame[..frame.len() - 1]).unwrap_err();
        assert!(err.is(&ERR_TRUNCATED));
        assert_eq!(err.attribute("field"), Some(&serde_json::json!("update_data")));

        let err = UpdateInfoResponse::unmarshal(&frame[..3]).unwrap_err();
        assert_eq!(err.attribute("field"), Some(&serde_json::json!("cups_credentials")));

        let mut long = frame;
        long.push(0);
        assert!(UpdateInfoResponse::unmarshal(&long).unwrap_err().is(&ERR_TRAILING_DATA));
    }
}
