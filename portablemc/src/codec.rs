//! Small value types shared by the JSON schemas: hex-encoded SHA-1 hashes and
//! regular expressions compiled at deserialization.

use std::ops::Deref;
use std::fmt;

use regex::Regex;


/// A 20-byte SHA-1 digest, read and written as its 40-character lower case hex form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1Hash(pub [u8; 20]);

impl Sha1Hash {

    /// Parse a 40-character hex string, returning none on any length or digit error.
    pub fn from_hex(text: &str) -> Option<Self> {

        let bytes = text.as_bytes();
        if bytes.len() != 40 {
            return None;
        }

        let mut out = [0u8; 20];
        for (slot, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
            let high = (pair[0] as char).to_digit(16)?;
            let low = (pair[1] as char).to_digit(16)?;
            *slot = (high << 4 | low) as u8;
        }

        Some(Self(out))

    }

}

impl Deref for Sha1Hash {
    type Target = [u8; 20];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Hash({self})")
    }
}

impl serde::Serialize for Sha1Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Sha1Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {

        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {

            type Value = Sha1Hash;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a 40 characters hex SHA-1 string")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Sha1Hash::from_hex(v)
                    .ok_or_else(|| E::custom("expected a 40 characters hex SHA-1 string"))
            }

        }

        deserializer.deserialize_str(Visitor)

    }
}

/// A regular expression compiled once when its string form is deserialized, as
/// found in the OS version predicate of rules.
#[derive(Debug, Clone)]
pub struct CompiledRegex(pub Regex);

impl Deref for CompiledRegex {
    type Target = Regex;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl serde::Serialize for CompiledRegex {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for CompiledRegex {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {

        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {

            type Value = CompiledRegex;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a regular expression string")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Regex::new(v).map(CompiledRegex).map_err(E::custom)
            }

        }

        deserializer.deserialize_str(Visitor)

    }
}

#[cfg(test)]
mod tests {

    use super::Sha1Hash;

    #[test]
    fn sha1_hex_round_trip() {

        let text = "d3486ae9136e7856bc42212385ea797094475802";
        let hash = Sha1Hash::from_hex(text).unwrap();
        assert_eq!(hash.0[0], 0xd3);
        assert_eq!(hash.0[19], 0x02);
        assert_eq!(hash.to_string(), text);

        assert_eq!(Sha1Hash::from_hex("D3486AE9136E7856BC42212385EA797094475802").map(|h| h.0), Some(hash.0));

    }

    #[test]
    fn sha1_hex_invalid() {
        assert!(Sha1Hash::from_hex("").is_none());
        assert!(Sha1Hash::from_hex("d3486a").is_none());
        assert!(Sha1Hash::from_hex(&"0".repeat(41)).is_none());
        assert!(Sha1Hash::from_hex(&"g".repeat(40)).is_none());
    }

}
