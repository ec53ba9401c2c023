use std::marker::PhantomData;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

/// How a field's JSON payload is written into the key-value store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    /// Stored as plain JSON text.
    Plain,
    /// Stored reversibly scrambled so a casual memory or log dump never
    /// shows a structured plaintext value.
    Obfuscated,
}

/// A typed store field: a stable key name bound to an explicit codec.
///
/// Declaring every field as a `FieldKey` constant keeps the
/// encode/decode decision next to the key instead of scattered across
/// ad-hoc getter closures.
pub struct FieldKey<T> {
    pub key: &'static str,
    pub codec: Codec,
    _marker: PhantomData<T>,
}

impl<T> FieldKey<T> {
    /// A field stored as plain JSON.
    pub const fn plain(key: &'static str) -> Self {
        Self {
            key,
            codec: Codec::Plain,
            _marker: PhantomData,
        }
    }

    /// A field stored obfuscated.
    pub const fn obfuscated(key: &'static str) -> Self {
        Self {
            key,
            codec: Codec::Obfuscated,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for FieldKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldKey<T> {}

/// Reversibly scrambles a value with a fresh random mask.
///
/// This is obfuscation, not encryption: it only prevents accidental
/// exposure of structured plaintext through dumps. Output layout is
/// `base64(mask):base64(value XOR mask)`.
pub fn obfuscate(plain: &str) -> String {
    let bytes = plain.as_bytes();
    let mut mask = vec![0u8; bytes.len()];
    OsRng.fill_bytes(&mut mask);

    let mut scrambled: Vec<u8> = bytes
        .iter()
        .zip(mask.iter())
        .map(|(b, m)| b ^ m)
        .collect();

    let encoded = format!("{}:{}", BASE64.encode(&mask), BASE64.encode(&scrambled));
    mask.zeroize();
    scrambled.zeroize();
    encoded
}

/// Reverses [`obfuscate`]. Lenient: malformed input yields `None`
/// rather than an error, mirroring how a store read of a missing key
/// behaves.
pub fn deobfuscate(encoded: &str) -> Option<String> {
    let (mask_b64, data_b64) = encoded.split_once(':')?;
    let mask = BASE64.decode(mask_b64).ok()?;
    let data = BASE64.decode(data_b64).ok()?;

    if mask.len() != data.len() {
        return None;
    }

    let plain: Vec<u8> = data.iter().zip(mask.iter()).map(|(b, m)| b ^ m).collect();
    String::from_utf8(plain).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obfuscate_round_trip() {
        let secret = "\"hunter2\"";
        let encoded = obfuscate(secret);
        assert!(!encoded.contains("hunter2"));
        assert_eq!(deobfuscate(&encoded).as_deref(), Some(secret));
    }

    #[test]
    fn obfuscate_is_randomized() {
        let a = obfuscate("same input");
        let b = obfuscate("same input");
        assert_ne!(a, b);
    }

    #[test]
    fn deobfuscate_rejects_malformed_input() {
        assert!(deobfuscate("no separator").is_none());
        assert!(deobfuscate("!!!:???").is_none());
        assert!(deobfuscate("YWJj:YQ==").is_none()); // length mismatch
    }
}
