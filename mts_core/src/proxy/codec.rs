//! Type-tagged binary encoding for command arguments
//!
//! A payload is the bincode encoding of `(type_tag, value)`. The tag is
//! checked before the value is decoded, so a payload produced for one
//! argument type is rejected by a command expecting another instead of
//! being reinterpreted.

use crate::command::Argument;
use crate::error::{MtsError, MtsResult};

/// Encode `value` with its type tag
pub fn encode<T: Argument>(value: &T) -> MtsResult<Vec<u8>> {
    let tag = std::any::type_name::<T>();
    Ok(bincode::serialize(&(tag, value))?)
}

/// Decode a payload produced by [`encode`] for the same type
pub fn decode<T: Argument>(bytes: &[u8]) -> MtsResult<T> {
    let mut reader = bytes;
    let tag: String = bincode::deserialize_from(&mut reader)?;
    let expected = std::any::type_name::<T>();
    if tag != expected {
        return Err(MtsError::Serialization(format!(
            "payload tagged '{}' where '{}' was expected",
            tag, expected
        )));
    }
    let value: T = bincode::deserialize_from(&mut reader)?;
    if !reader.is_empty() {
        return Err(MtsError::Serialization(format!(
            "{} trailing bytes after '{}' payload",
            reader.len(),
            expected
        )));
    }
    Ok(value)
}

/// Read the type tag of a payload without decoding the value
pub fn peek_tag(bytes: &[u8]) -> MtsResult<String> {
    let mut reader = bytes;
    Ok(bincode::deserialize_from(&mut reader)?)
}
