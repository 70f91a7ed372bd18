//! Identity types.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 20;

/// Immutable content fingerprint of a job (its info-hash).
///
/// The fingerprint is the natural key of a job: it is assigned by the
/// upstream engine when the job is created and never changes. In the store it
/// is kept as 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Creates a fingerprint from raw bytes.
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Returns the lowercase hex form used by the store.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the hex form. Upper and lower case are both accepted.
    pub fn from_hex(input: &str) -> ModelResult<Self> {
        if input.len() != FINGERPRINT_LEN * 2 {
            return Err(ModelError::InvalidFingerprint {
                input: input.to_string(),
                reason: format!("expected {} hex characters", FINGERPRINT_LEN * 2),
            });
        }
        let mut bytes = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(input, &mut bytes).map_err(|e| ModelError::InvalidFingerprint {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Store-assigned surrogate key of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordinal of a file inside its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIndex(pub i32);

impl fmt::Display for FileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_is_lowercase() {
        let fp = Fingerprint::from_bytes([0xAB; FINGERPRINT_LEN]);
        let text = fp.to_hex();
        assert_eq!(text.len(), 40);
        assert_eq!(text, "ab".repeat(20));
        assert_eq!(Fingerprint::from_hex(&text.to_uppercase()).unwrap(), fp);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Fingerprint::from_hex("abcd").unwrap_err();
        assert!(matches!(err, ModelError::InvalidFingerprint { .. }));
    }

    #[test]
    fn rejects_non_hex() {
        let text = "zz".repeat(20);
        assert!(Fingerprint::from_hex(&text).is_err());
    }

    #[test]
    fn serde_uses_hex_string() {
        let fp = Fingerprint::from_bytes([1; FINGERPRINT_LEN]);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(20)));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
