//! Canonical binary encoding (bincode) shared by hashing, storage and the wire.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::TypeError;

/// Encode a value with the canonical encoding.
///
/// # Panics
///
/// If `value`'s `Serialize` impl fails. Ledger types are plain derived
/// data, so this is a bug in the caller's type, never a runtime condition.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("canonical encoding of plain data should not fail")
}

/// Decode a value, rejecting trailing bytes.
pub fn decode<T: Serialize + DeserializeOwned>(bytes: &[u8]) -> Result<T, TypeError> {
    let value: T = bincode::deserialize(bytes)?;
    let size = bincode::serialized_size(&value)? as usize;
    if size != bytes.len() {
        return Err(TypeError::Decode(format!(
            "{} trailing bytes",
            bytes.len().saturating_sub(size)
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode(&(7u32, 9u16));
        assert!(decode::<(u32, u16)>(&bytes).is_ok());
        bytes.push(0);
        assert!(decode::<(u32, u16)>(&bytes).is_err());
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("no encoding"))
        }
    }

    #[test]
    #[should_panic(expected = "canonical encoding")]
    fn failed_encoding_is_loud_not_empty() {
        let _ = encode(&Unencodable);
    }

    #[test]
    fn truncated_input_rejected() {
        let bytes = encode(&12345u64);
        assert!(decode::<u64>(&bytes[..4]).is_err());
    }
}
