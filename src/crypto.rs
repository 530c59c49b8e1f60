//! WeCom callback envelope codec.
//!
//! Signature verification (sorted SHA-1), AES-256-CBC payload encryption and
//! the XML envelopes that carry it. Every function here is pure over the
//! gateway configuration; nothing performs I/O.
//!
//! Decrypted payload layout:
//!
//! ```text
//! random(16) | msg_len(4, big-endian) | msg(msg_len) | corp_id
//! ```
//!
//! Payloads are PKCS#7-padded to a 32-byte boundary before encryption, as the
//! platform's reference implementation does, even though AES blocks are 16.

use std::fmt;

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use base64::Engine as _;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use rand::RngCore;
use secrecy::ExposeSecret;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use tracing::{error, warn};

use crate::config::GatewayConfig;
use crate::error::{ConfigError, CryptoError, Error, XmlError};
use crate::xml::{XmlValue, write_document};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Bytes of random filler in front of every payload.
const RANDOM_LEN: usize = 16;
/// Bytes of the big-endian message length field.
const LENGTH_FIELD_LEN: usize = 4;
/// Padding granularity used by the platform.
const PAD_BLOCK_SIZE: usize = 32;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// EncodingAESKeys routinely end in a character with non-zero trailing bits.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

struct KeyMaterial {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

impl KeyMaterial {
    /// `key = base64(encoding_aes_key + "=")`, `iv = key[..16]`.
    fn derive(encoding_aes_key: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "WECOM_ENCODING_AES_KEY".to_string(),
            message,
        };

        let normalized: String = encoding_aes_key
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                c => c,
            })
            .collect();

        let bytes = LENIENT_BASE64
            .decode(format!("{normalized}="))
            .map_err(|e| invalid(format!("not valid base64: {e}")))?;

        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| invalid(format!("decodes to {} bytes, expected 32", b.len())))?;

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&key[..IV_LEN]);

        Ok(Self { key, iv })
    }
}

/// Envelope codec bound to one corp's credentials.
#[derive(Debug)]
pub struct WecomCrypto {
    corp_id: String,
    token: String,
    keys: Option<KeyMaterial>,
    strict_receiver_check: bool,
}

impl WecomCrypto {
    /// Derive key material from the configuration.
    ///
    /// An absent EncodingAESKey is not an error (the codec simply reports
    /// itself unconfigured); a present but malformed one is.
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let encoding_aes_key = config.encoding_aes_key.expose_secret();
        let keys = if encoding_aes_key.is_empty() {
            None
        } else {
            Some(KeyMaterial::derive(encoding_aes_key)?)
        };

        Ok(Self {
            corp_id: config.corp_id.clone(),
            token: config.token.clone(),
            keys,
            strict_receiver_check: config.strict_receiver_check,
        })
    }

    /// Corp ID, token and key material are all present.
    pub fn is_configured(&self) -> bool {
        !self.corp_id.is_empty() && !self.token.is_empty() && self.keys.is_some()
    }

    pub fn corp_id(&self) -> &str {
        &self.corp_id
    }

    fn keys(&self) -> Result<&KeyMaterial, CryptoError> {
        if !self.is_configured() {
            return Err(CryptoError::ConfigurationMissing);
        }
        self.keys.as_ref().ok_or(CryptoError::ConfigurationMissing)
    }

    /// Check a callback signature.
    ///
    /// `encrypted` is the `echostr` on URL verification and the `<Encrypt>`
    /// value on message callbacks; an empty value is left out of the digest.
    /// Always false while unconfigured.
    pub fn verify_signature(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypted: Option<&str>,
    ) -> bool {
        if !self.is_configured() {
            return false;
        }

        let mut values = vec![self.token.as_str(), timestamp, nonce];
        if let Some(encrypted) = encrypted.filter(|e| !e.is_empty()) {
            values.push(encrypted);
        }

        compute_signature(&values)
            .as_bytes()
            .ct_eq(signature.as_bytes())
            .into()
    }

    /// Signature over `{token, timestamp, nonce, encrypted}`.
    pub fn build_signature(&self, timestamp: &str, nonce: &str, encrypted: &str) -> String {
        compute_signature(&[&self.token, timestamp, nonce, encrypted])
    }

    /// Decrypt a base64 payload and return the embedded message.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, CryptoError> {
        let keys = self.keys()?;

        let ciphertext = LENIENT_BASE64
            .decode(encrypted.trim())
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;

        let cipher = Aes256CbcDec::new_from_slices(&keys.key, &keys.iv)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;
        let padded = cipher
            .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
            .map_err(|_| {
                CryptoError::Decryption("ciphertext is not a whole number of blocks".to_string())
            })?;

        let plain = strip_padding(padded)?;
        let (msg, receiver) = split_payload(&plain)?;

        if receiver != self.corp_id {
            if self.strict_receiver_check {
                return Err(CryptoError::ReceiverMismatch {
                    expected: self.corp_id.clone(),
                    actual: receiver,
                });
            }
            warn!(
                expected = %self.corp_id,
                actual = %receiver,
                "Corp ID mismatch in decrypted payload"
            );
        }

        Ok(msg)
    }

    /// Encrypt a message into a base64 payload.
    pub fn encrypt(&self, msg: &str) -> Result<String, CryptoError> {
        let mut random = [0u8; RANDOM_LEN];
        rand::thread_rng().fill_bytes(&mut random);
        self.encrypt_with_random(msg, &random)
    }

    fn encrypt_with_random(
        &self,
        msg: &str,
        random: &[u8; RANDOM_LEN],
    ) -> Result<String, CryptoError> {
        let keys = self.keys()?;

        let msg_len = u32::try_from(msg.len())
            .map_err(|_| CryptoError::Encryption("message longer than 4 GiB".to_string()))?;

        let capacity =
            RANDOM_LEN + LENGTH_FIELD_LEN + msg.len() + self.corp_id.len() + PAD_BLOCK_SIZE;
        let mut plain = Vec::with_capacity(capacity);
        plain.extend_from_slice(random);
        plain.extend_from_slice(&msg_len.to_be_bytes());
        plain.extend_from_slice(msg.as_bytes());
        plain.extend_from_slice(self.corp_id.as_bytes());
        pad(&mut plain);

        let cipher = Aes256CbcEnc::new_from_slices(&keys.key, &keys.iv).map_err(|e| {
            error!(error = %e, "Cipher initialisation failed");
            CryptoError::Encryption(e.to_string())
        })?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&plain);

        Ok(STANDARD.encode(ciphertext))
    }

    /// Encrypt `msg` into a signed `<xml>` envelope with a fresh timestamp and
    /// nonce.
    pub fn build_encrypted_envelope(&self, msg: &str) -> Result<String, Error> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.build_envelope_with(msg, &timestamp, &hex::encode(nonce))
    }

    fn build_envelope_with(&self, msg: &str, timestamp: &str, nonce: &str) -> Result<String, Error> {
        let encrypted = self.encrypt(msg)?;
        let signature = self.build_signature(timestamp, nonce, &encrypted);

        Ok(write_document(&[
            ("Encrypt", XmlValue::CData(&encrypted)),
            ("MsgSignature", XmlValue::CData(&signature)),
            ("TimeStamp", XmlValue::CData(timestamp)),
            ("Nonce", XmlValue::CData(nonce)),
        ])?)
    }
}

/// Sort the values as strings, concatenate them and return the SHA-1 hex.
pub fn compute_signature(values: &[&str]) -> String {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha1::new();
    for value in sorted {
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Unencrypted passive text reply.
pub fn build_plain_reply(to_user: &str, from_user: &str, content: &str) -> Result<String, XmlError> {
    let create_time = chrono::Utc::now().timestamp().to_string();
    write_document(&[
        ("ToUserName", XmlValue::CData(to_user)),
        ("FromUserName", XmlValue::CData(from_user)),
        ("CreateTime", XmlValue::Text(&create_time)),
        ("MsgType", XmlValue::CData("text")),
        ("Content", XmlValue::CData(content)),
    ])
}

/// PKCS#7 to the platform's 32-byte boundary; always adds 1..=32 bytes.
fn pad(buf: &mut Vec<u8>) {
    let pad_len = PAD_BLOCK_SIZE - buf.len() % PAD_BLOCK_SIZE;
    buf.resize(buf.len() + pad_len, pad_len as u8);
}

fn strip_padding(mut buf: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
    let pad_len = *buf
        .last()
        .ok_or_else(|| CryptoError::Decryption("empty ciphertext".to_string()))? as usize;

    if pad_len == 0 || pad_len > PAD_BLOCK_SIZE || pad_len > buf.len() {
        return Err(CryptoError::Decryption(format!("invalid padding length {pad_len}")));
    }

    buf.truncate(buf.len() - pad_len);
    Ok(buf)
}

/// Split an unpadded payload into (message, trailing corp id).
fn split_payload(plain: &[u8]) -> Result<(String, String), CryptoError> {
    let header_len = RANDOM_LEN + LENGTH_FIELD_LEN;
    if plain.len() < header_len {
        return Err(CryptoError::Decryption(format!(
            "payload of {} bytes is shorter than its header",
            plain.len()
        )));
    }

    let mut len_bytes = [0u8; LENGTH_FIELD_LEN];
    len_bytes.copy_from_slice(&plain[RANDOM_LEN..header_len]);
    let msg_len = u32::from_be_bytes(len_bytes) as usize;

    let msg_end = header_len
        .checked_add(msg_len)
        .filter(|end| *end <= plain.len())
        .ok_or_else(|| {
            CryptoError::Decryption(format!("declared message length {msg_len} exceeds payload"))
        })?;

    let msg = std::str::from_utf8(&plain[header_len..msg_end])
        .map_err(|_| CryptoError::Decryption("message is not valid UTF-8".to_string()))?
        .to_string();
    let receiver = String::from_utf8_lossy(&plain[msg_end..]).into_owned();

    Ok((msg, receiver))
}
