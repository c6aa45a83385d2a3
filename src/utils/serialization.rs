// Record codec shared by every value written to the store.
// Layout: one format-version byte followed by the bincode 2 standard encoding
// (varint integers, length-prefixed sequences).
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// Current on-disk record format.
pub const FORMAT_VERSION: u8 = 1;

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    let body = bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))?;
    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.push(FORMAT_VERSION);
    bytes.extend(body);
    Ok(bytes)
}

/// Deserialize data using bincode 2.0 with standard configuration
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let (version, body) = bytes
        .split_first()
        .ok_or_else(|| BlockchainError::Serialization("Empty record".to_string()))?;
    if *version != FORMAT_VERSION {
        return Err(BlockchainError::Serialization(format!(
            "Unsupported record format version {version}"
        )));
    }

    let config = bincode::config::standard();
    let (data, read) = bincode::decode_from_slice(body, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    if read != body.len() {
        return Err(BlockchainError::Serialization(format!(
            "Trailing bytes after record: {} of {} consumed",
            read,
            body.len()
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct TestData {
        id: u64,
        name: String,
        values: Vec<i32>,
    }

    #[test]
    fn test_serialize_deserialize() {
        let original = TestData {
            id: 42,
            name: "test".to_string(),
            values: vec![1, 2, 3, 4, 5],
        };

        let serialized = serialize(&original).expect("Serialization should work");
        assert_eq!(serialized[0], FORMAT_VERSION);
        let deserialized: TestData = deserialize(&serialized).expect("Deserialization should work");

        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let data = TestData {
            id: 7,
            name: "same".to_string(),
            values: vec![-1, 0, 1],
        };
        assert_eq!(serialize(&data).unwrap(), serialize(&data.clone()).unwrap());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = serialize(&vec![1u8, 2, 3]).unwrap();
        bytes[0] = FORMAT_VERSION + 1;
        let result: Result<Vec<u8>> = deserialize(&bytes);
        assert!(matches!(result, Err(BlockchainError::Serialization(_))));
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid_bytes = vec![FORMAT_VERSION, 0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<TestData> = deserialize(&invalid_bytes);
        assert!(result.is_err());

        let empty: Result<TestData> = deserialize(&[]);
        assert!(empty.is_err());
    }
}
