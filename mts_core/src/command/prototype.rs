use crate::error::{MtsError, MtsResult};
use crate::proxy::codec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;

/// Types that can travel through a command
///
/// The default value doubles as the argument prototype: servants and
/// mailboxes use it to create output placeholders without knowing the
/// concrete type.
pub trait Argument:
    Any + Clone + Default + fmt::Debug + Send + Sync + Serialize + DeserializeOwned
{
}

impl<T> Argument for T where
    T: Any + Clone + Default + fmt::Debug + Send + Sync + Serialize + DeserializeOwned
{
}

/// Runtime type descriptor for a command argument or result
///
/// Carries the type identity used to validate invocations before dispatch,
/// plus monomorphized helpers to create, clone and (de)serialize values of
/// the described type through `&dyn Any`.
#[derive(Clone, Copy)]
pub struct Prototype {
    type_name: &'static str,
    type_id: TypeId,
    create: fn() -> Box<dyn Any + Send>,
    clone_value: fn(&dyn Any) -> Option<Box<dyn Any + Send>>,
    assign: fn(Box<dyn Any + Send>, &mut dyn Any) -> bool,
    encode: fn(&dyn Any) -> MtsResult<Vec<u8>>,
    decode: fn(&[u8]) -> MtsResult<Box<dyn Any + Send>>,
    decode_into: fn(&[u8], &mut dyn Any) -> MtsResult<()>,
}

impl Prototype {
    pub fn of<T: Argument>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            create: create_value::<T>,
            clone_value: clone_value::<T>,
            assign: assign_value::<T>,
            encode: encode_value::<T>,
            decode: decode_value::<T>,
            decode_into: decode_value_into::<T>,
        }
    }

    /// Stable tag sent on the wire and compared during remote binding
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether `value` is an instance of the described type
    pub fn matches(&self, value: &dyn Any) -> bool {
        value.type_id() == self.type_id
    }

    pub fn create(&self) -> Box<dyn Any + Send> {
        (self.create)()
    }

    pub fn clone_value(&self, value: &dyn Any) -> Option<Box<dyn Any + Send>> {
        (self.clone_value)(value)
    }

    /// Move a boxed value into `target`; false if either side has the wrong type
    pub fn assign(&self, value: Box<dyn Any + Send>, target: &mut dyn Any) -> bool {
        (self.assign)(value, target)
    }

    pub fn encode(&self, value: &dyn Any) -> MtsResult<Vec<u8>> {
        (self.encode)(value)
    }

    pub fn decode(&self, bytes: &[u8]) -> MtsResult<Box<dyn Any + Send>> {
        (self.decode)(bytes)
    }

    pub fn decode_into(&self, bytes: &[u8], target: &mut dyn Any) -> MtsResult<()> {
        (self.decode_into)(bytes, target)
    }
}

impl PartialEq for Prototype {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for Prototype {}

impl fmt::Debug for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prototype({})", self.type_name)
    }
}

fn create_value<T: Argument>() -> Box<dyn Any + Send> {
    Box::new(T::default())
}

fn clone_value<T: Argument>(value: &dyn Any) -> Option<Box<dyn Any + Send>> {
    value
        .downcast_ref::<T>()
        .map(|v| Box::new(v.clone()) as Box<dyn Any + Send>)
}

fn assign_value<T: Argument>(value: Box<dyn Any + Send>, target: &mut dyn Any) -> bool {
    let Some(slot) = target.downcast_mut::<T>() else {
        return false;
    };
    match value.downcast::<T>() {
        Ok(value) => {
            *slot = *value;
            true
        }
        Err(_) => false,
    }
}

fn encode_value<T: Argument>(value: &dyn Any) -> MtsResult<Vec<u8>> {
    let value = value.downcast_ref::<T>().ok_or_else(|| {
        MtsError::TypeMismatch(format!("expected {}", std::any::type_name::<T>()))
    })?;
    codec::encode(value)
}

fn decode_value<T: Argument>(bytes: &[u8]) -> MtsResult<Box<dyn Any + Send>> {
    let value: T = codec::decode(bytes)?;
    Ok(Box::new(value))
}

fn decode_value_into<T: Argument>(bytes: &[u8], target: &mut dyn Any) -> MtsResult<()> {
    let slot = target.downcast_mut::<T>().ok_or_else(|| {
        MtsError::TypeMismatch(format!("expected {}", std::any::type_name::<T>()))
    })?;
    *slot = codec::decode(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prototype_matches_only_its_type() {
        let proto = Prototype::of::<i32>();
        assert!(proto.matches(&5i32));
        assert!(!proto.matches(&5i64));
        assert!(!proto.matches(&"five".to_string()));
        assert_eq!(proto, Prototype::of::<i32>());
        assert_ne!(proto, Prototype::of::<u32>());
    }

    #[test]
    fn test_create_and_assign() {
        let proto = Prototype::of::<Vec<f64>>();
        let value = proto.create();
        let mut target = vec![1.0, 2.0];
        assert!(proto.assign(value, &mut target));
        assert!(target.is_empty());

        let mut wrong = 0u8;
        assert!(!proto.assign(proto.create(), &mut wrong));
    }

    #[test]
    fn test_decode_into_rejects_foreign_payload() {
        let bytes = Prototype::of::<i32>().encode(&42i32).unwrap();
        let mut out = String::new();
        let err = Prototype::of::<String>().decode_into(&bytes, &mut out);
        assert!(err.is_err());

        let mut ok = 0i32;
        Prototype::of::<i32>().decode_into(&bytes, &mut ok).unwrap();
        assert_eq!(ok, 42);
    }
}
