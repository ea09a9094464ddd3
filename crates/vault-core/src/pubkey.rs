//! OpenSSH public key parsing.
//!
//! Fingerprints and key sizes are derived from the wire-format blob directly,
//! so listing and auditing never need `ssh-keygen` on PATH.

use crate::error::{Result, VaultError};
use crate::types::KeyAlgorithm;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub key_type: String,
    pub algorithm: KeyAlgorithm,
    pub blob: Vec<u8>,
    pub comment: String,
}

impl PublicKey {
    /// Parse a single `authorized_keys`-style line: `<type> <base64> [comment]`.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let mut fields = line.splitn(3, char::is_whitespace);
        let key_type = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("empty key"))?;
        let encoded = fields
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing base64 field"))?;
        let comment = fields.next().unwrap_or("").trim().to_string();

        let algorithm = KeyAlgorithm::from_openssh_type(key_type)
            .ok_or_else(|| invalid(&format!("unsupported key type '{key_type}'")))?;
        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| invalid(&format!("bad base64: {e}")))?;

        let embedded = Reader::new(&blob).string()?;
        if embedded != key_type.as_bytes() {
            return Err(invalid(&format!(
                "declared type '{key_type}' does not match key data"
            )));
        }

        Ok(Self {
            key_type: key_type.to_string(),
            algorithm,
            blob,
            comment,
        })
    }

    /// `SHA256:<unpadded base64>`, the format `ssh-keygen -lf` prints.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.blob);
        format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
    }

    pub fn bits(&self) -> Result<u32> {
        let mut r = Reader::new(&self.blob);
        r.string()?;
        match self.algorithm {
            KeyAlgorithm::Ed25519 => Ok(256),
            KeyAlgorithm::Ecdsa => match r.string()? {
                b"nistp256" => Ok(256),
                b"nistp384" => Ok(384),
                b"nistp521" => Ok(521),
                other => Err(invalid(&format!(
                    "unknown curve '{}'",
                    String::from_utf8_lossy(other)
                ))),
            },
            KeyAlgorithm::Rsa => {
                let _e = r.string()?;
                Ok(mpint_bits(r.string()?))
            }
            KeyAlgorithm::Dsa => Ok(mpint_bits(r.string()?)),
        }
    }

    /// Re-encode as a single line, comment included when present.
    pub fn to_line(&self) -> String {
        let encoded = STANDARD.encode(&self.blob);
        if self.comment.is_empty() {
            format!("{} {}", self.key_type, encoded)
        } else {
            format!("{} {} {}", self.key_type, encoded, self.comment)
        }
    }
}

fn invalid(reason: &str) -> VaultError {
    VaultError::InvalidPublicKey(reason.to_string())
}

fn mpint_bits(bytes: &[u8]) -> u32 {
    let trimmed: &[u8] = match bytes.iter().position(|b| *b != 0) {
        Some(i) => &bytes[i..],
        None => return 0,
    };
    let lead = trimmed[0].leading_zeros();
    (trimmed.len() as u32) * 8 - lead
}

/// Cursor over SSH wire-format length-prefixed strings.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn string(&mut self) -> Result<&'a [u8]> {
        if self.buf.len() < 4 {
            return Err(invalid("truncated key data"));
        }
        let (len, rest) = self.buf.split_at(4);
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        if rest.len() < len {
            return Err(invalid("truncated key data"));
        }
        let (s, rest) = rest.split_at(len);
        self.buf = rest;
        Ok(s)
    }
}
