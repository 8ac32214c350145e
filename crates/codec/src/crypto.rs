//! E2EE capability seams and the private-message envelope.
//!
//! The server never encrypts, decrypts or inspects key material: private
//! bodies and public keys are opaque byte strings it forwards verbatim.
//! The traits here are implemented by clients and by test doubles; the
//! envelope splitter exists so that endpoints can cheaply reject bodies
//! that are not even shaped like a sealed message.

use crate::Error;

use bytes::Bytes;

/// Separator between the envelope meta block and the hex segments.
pub const ENVELOPE_SEPARATOR: &str = "-----*****-----";

/// Symmetric cipher over an internally held session key.
pub trait Cryptor: Send + Sync {
    fn encrypt(&self, source: &[u8]) -> Result<Bytes, Error>;
    fn decrypt(&self, source: &[u8]) -> Result<Bytes, Error>;
}

/// Public-key cipher. Keys are opaque byte strings; the pair order is
/// `(public, private)`.
pub trait AsymmetricCryptor: Send + Sync {
    fn keypair(&self) -> Result<(Bytes, Bytes), Error>;
    fn encrypt(&self, source: &[u8], public_key: &[u8]) -> Result<Bytes, Error>;
    fn decrypt(&self, source: &[u8], private_key: &[u8]) -> Result<Bytes, Error>;
}

/// A sealed private message:
///
/// `E_hex:E_raw:IV_hex:IV_raw:CT_hex:CT_raw-----*****-----<E><IV><CT>`
///
/// where `E` is the symmetric session key sealed with the recipient's
/// public key, `IV` the initial vector and `CT` the ciphertext, each a hex
/// string of the advertised length. Splitting never decodes the hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub key_raw_len: usize,
    pub iv_raw_len: usize,
    pub cipher_raw_len: usize,
    pub key_hex: String,
    pub iv_hex: String,
    pub cipher_hex: String,
}

impl Envelope {
    /// Split a wire body into its envelope parts.
    ///
    /// # Test
    ///
    /// ```
    /// use chat_server_codec::crypto::Envelope;
    ///
    /// let envelope = Envelope::parse("4:2:4:2:6:3-----*****-----aabbccddeeff00").unwrap();
    /// assert_eq!(envelope.key_hex, "aabb");
    /// assert_eq!(envelope.iv_hex, "ccdd");
    /// assert_eq!(envelope.cipher_hex, "eeff00");
    /// assert_eq!(envelope.cipher_raw_len, 3);
    ///
    /// assert!(Envelope::parse("hello").is_err());
    /// assert!(Envelope::parse("4:2:4:2:6:3-----*****-----aabb").is_err());
    /// ```
    pub fn parse(source: &str) -> Result<Self, Error> {
        let (meta, segments) = source
            .split_once(ENVELOPE_SEPARATOR)
            .ok_or(Error::InvalidEnvelope)?;

        let mut sizes = [0usize; 6];
        let mut fields = meta.split(':');
        for slot in sizes.iter_mut() {
            *slot = fields
                .next()
                .and_then(|value| value.trim().parse().ok())
                .ok_or(Error::InvalidEnvelope)?;
        }

        if fields.next().is_some() {
            return Err(Error::InvalidEnvelope);
        }

        let [key_hex_len, key_raw_len, iv_hex_len, iv_raw_len, cipher_hex_len, cipher_raw_len] =
            sizes;
        if !segments.is_ascii() || segments.len() != key_hex_len + iv_hex_len + cipher_hex_len {
            return Err(Error::InvalidEnvelope);
        }

        let (key_hex, rest) = segments.split_at(key_hex_len);
        let (iv_hex, cipher_hex) = rest.split_at(iv_hex_len);

        Ok(Self {
            key_raw_len,
            iv_raw_len,
            cipher_raw_len,
            key_hex: key_hex.to_string(),
            iv_hex: iv_hex.to_string(),
            cipher_hex: cipher_hex.to_string(),
        })
    }

    /// Assemble the wire body back from the parts.
    pub fn format(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}{}{}{}{}",
            self.key_hex.len(),
            self.key_raw_len,
            self.iv_hex.len(),
            self.iv_raw_len,
            self.cipher_hex.len(),
            self.cipher_raw_len,
            ENVELOPE_SEPARATOR,
            self.key_hex,
            self.iv_hex,
            self.cipher_hex,
        )
    }
}
