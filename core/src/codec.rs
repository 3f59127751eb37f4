//! Bytes to on-disk frame and back: header, gzip, AEAD.
//!
//! Frame layout (little-endian):
//!   [0..4]   magic bytes "IDSV"
//!   [4]      frame format version (u8)
//!   [5]      flags (bit 0 = gzip, bit 1 = encrypted)
//!   if encrypted:
//!   [6..22]  KDF salt (zero unless the key is password-derived)
//!   [22..34] AEAD nonce
//!   rest     body (ciphertext plus 16-byte tag when encrypted)
//!
//! RULES:
//!   - Write runs serialize, then gzip, then encrypt. Read runs the reverse.
//!   - The header bytes are the AEAD associated data, so a flipped flag bit
//!     fails authentication.
//!   - Flags come from the file, not the config; files stay readable after
//!     compression is toggled.

use crate::{
    crypto::{KeyMaterial, NONCE_LEN, SALT_LEN},
    error::{SaveError, SaveResult},
};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

pub const MAGIC: [u8; 4] = *b"IDSV";
pub const FRAME_VERSION: u8 = 1;

const FLAG_GZIP: u8 = 0b01;
const FLAG_ENCRYPTED: u8 = 0b10;
const BASE_HEADER_LEN: usize = 6;
const CRYPTO_HEADER_LEN: usize = SALT_LEN + NONCE_LEN;

/// Hard cap on decompressed size; a hostile gzip bomb stops here.
const MAX_DECOMPRESSED: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct Codec {
    compress: bool,
    key:      Option<Arc<KeyMaterial>>,
}

impl Codec {
    pub fn new(compress: bool, key: Option<Arc<KeyMaterial>>) -> Self {
        Self { compress, key }
    }

    pub fn plain() -> Self { Self::default() }

    pub fn encrypts(&self) -> bool { self.key.is_some() }

    pub fn encode(&self, plain: &[u8]) -> SaveResult<Vec<u8>> {
        let mut flags = 0u8;
        let body = if self.compress {
            flags |= FLAG_GZIP;
            gzip(plain)?
        } else {
            plain.to_vec()
        };

        let Some(key) = &self.key else {
            let mut out = Vec::with_capacity(BASE_HEADER_LEN + body.len());
            push_base_header(&mut out, flags);
            out.extend_from_slice(&body);
            return Ok(out);
        };

        flags |= FLAG_ENCRYPTED;
        let salt = key.salt();
        let mut aad = Vec::with_capacity(BASE_HEADER_LEN + SALT_LEN);
        push_base_header(&mut aad, flags);
        aad.extend_from_slice(&salt);

        let (nonce, ciphertext) = key.seal(&aad, &body)?;
        let mut out = Vec::with_capacity(BASE_HEADER_LEN + CRYPTO_HEADER_LEN + ciphertext.len());
        out.extend_from_slice(&aad);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Reverse `encode`. Every failure is an integrity error on `path`.
    pub fn decode(&self, path: &Path, bytes: &[u8]) -> SaveResult<Vec<u8>> {
        if bytes.len() < BASE_HEADER_LEN || bytes[..4] != MAGIC {
            return Err(SaveError::integrity(path, "missing frame header"));
        }
        let version = bytes[4];
        if version > FRAME_VERSION {
            return Err(SaveError::integrity(
                path,
                format!("frame version {version} is newer than supported {FRAME_VERSION}"),
            ));
        }
        let flags = bytes[5];
        if flags & !(FLAG_GZIP | FLAG_ENCRYPTED) != 0 {
            return Err(SaveError::integrity(path, format!("unknown flags {flags:#04x}")));
        }

        let body = if flags & FLAG_ENCRYPTED != 0 {
            let key = self.key.as_ref().ok_or_else(|| {
                SaveError::integrity(path, "file is encrypted but no key is configured")
            })?;
            if bytes.len() < BASE_HEADER_LEN + CRYPTO_HEADER_LEN {
                return Err(SaveError::integrity(path, "truncated crypto header"));
            }
            let aad = &bytes[..BASE_HEADER_LEN + SALT_LEN];
            let mut salt = [0u8; SALT_LEN];
            salt.copy_from_slice(&bytes[BASE_HEADER_LEN..BASE_HEADER_LEN + SALT_LEN]);
            let mut nonce = [0u8; NONCE_LEN];
            nonce.copy_from_slice(&bytes[BASE_HEADER_LEN + SALT_LEN..BASE_HEADER_LEN + CRYPTO_HEADER_LEN]);
            key.open(&salt, &nonce, aad, &bytes[BASE_HEADER_LEN + CRYPTO_HEADER_LEN..])
                .map_err(|e| SaveError::integrity(path, e.to_string()))?
        } else {
            bytes[BASE_HEADER_LEN..].to_vec()
        };

        if flags & FLAG_GZIP != 0 {
            gunzip(&body).map_err(|e| SaveError::integrity(path, e.to_string()))
        } else {
            Ok(body)
        }
    }
}

fn push_base_header(out: &mut Vec<u8>, flags: u8) {
    out.extend_from_slice(&MAGIC);
    out.push(FRAME_VERSION);
    out.push(flags);
}

fn gzip(data: &[u8]) -> SaveResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SaveError::Compression(e.to_string()))?;
    encoder.finish().map_err(|e| SaveError::Compression(e.to_string()))
}

fn gunzip(data: &[u8]) -> SaveResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_DECOMPRESSED + 1)
        .read_to_end(&mut out)
        .map_err(|e| SaveError::Compression(e.to_string()))?;
    if out.len() as u64 > MAX_DECOMPRESSED {
        return Err(SaveError::Compression("decompressed payload exceeds limit".into()));
    }
    Ok(out)
}
