//! Credentials blobs consumed by Basic Station.
//!
//! A blob starts with the DER of the certificate the station trusts for
//! the server. It continues with either a client certificate and its key,
//! or four zero bytes and an HTTP `Authorization` header line.

/// How a station authenticates to a server.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// The value of an `Authorization` header, e.g. `Bearer NNSXS...`.
    Token(String),
    /// A client certificate (DER) with its private key (PKCS#1 RSA or an
    /// EC key in its marshalled form).
    Certificate { certificate: Vec<u8>, key: Vec<u8> },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token([REDACTED])"),
            Self::Certificate { certificate, .. } => f
                .debug_struct("Certificate")
                .field("certificate_len", &certificate.len())
                .field("key", &"[REDACTED]")
                .finish(),
        }
    }
}

const TOKEN_MARKER: [u8; 4] = [0; 4];

/// Build the blob for `trust` and `credentials`.
pub fn blob(trust: &[u8], credentials: &Credentials) -> Vec<u8> {
    let mut out = trust.to_vec();
    match credentials {
        Credentials::Token(value) => {
            out.extend_from_slice(&TOKEN_MARKER);
            out.extend_from_slice(b"Authorization: ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Credentials::Certificate { certificate, key } => {
            out.extend_from_slice(certificate);
            out.extend_from_slice(key);
        }
    }
    out
}

/// Token credentials blob for an API key sent as bearer token.
pub fn bearer_blob(trust: &[u8], key: &str) -> Vec<u8> {
    blob(trust, &Credentials::Token(format!("Bearer {key}")))
}

/// CRC32 (IEEE) of a blob, as reported back by stations.
pub fn crc(blob: &[u8]) -> u32 {
    crc32fast::hash(blob)
}
