//! Bidirectional registry of native types, wire tags and their codecs

use crate::value::{NativeType, Value};
use crate::xml::XmlWriter;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Writes the content of a `Data` element for a value
pub type SerializeFn = Arc<dyn Fn(&Value, &mut XmlWriter) -> Result<()> + Send + Sync>;

/// Reads a value back from its `Data` element
pub type DeserializeFn = Arc<dyn Fn(roxmltree::Node<'_, '_>) -> Result<Value> + Send + Sync>;

/// Registry mapping native type <-> serialized type tag <-> codec functions.
///
/// Both directions are unique: a native type maps to exactly one tag and a
/// tag to exactly one native type. Lookups of unknown keys return `None`.
/// Built once and then read; there is no internal synchronisation.
#[derive(Default)]
pub struct SerializerOperationMap {
    native_to_serialized: HashMap<NativeType, String>,
    serialized_to_native: HashMap<String, NativeType>,
    serialize_operations: HashMap<NativeType, SerializeFn>,
    deserialize_operations: HashMap<String, DeserializeFn>,
}

impl SerializerOperationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping; both the native type and the tag must be new
    pub fn add_mapping(
        &mut self,
        native_type: NativeType,
        serialized_type: impl Into<String>,
        serialize: SerializeFn,
        deserialize: DeserializeFn,
    ) -> Result<()> {
        let serialized_type = serialized_type.into();
        check_serialized_type(&serialized_type)?;

        if self.native_to_serialized.contains_key(&native_type) {
            return Err(Error::invalid_argument(
                format!("The native type '{native_type}' already exists in the map."),
                Some("native_type"),
            ));
        }
        if self.serialized_to_native.contains_key(&serialized_type) {
            return Err(Error::invalid_argument(
                format!("The serialized type '{serialized_type}' already exists in the map."),
                Some("serialized_type"),
            ));
        }

        self.insert(native_type, serialized_type, serialize, deserialize);
        Ok(())
    }

    /// Replace the tag and codec of an existing native type
    pub fn update_mapping(
        &mut self,
        native_type: NativeType,
        serialized_type: impl Into<String>,
        serialize: SerializeFn,
        deserialize: DeserializeFn,
    ) -> Result<()> {
        let serialized_type = serialized_type.into();
        check_serialized_type(&serialized_type)?;

        let Some(previous) = self.native_to_serialized.get(&native_type).cloned() else {
            return Err(Error::invalid_argument(
                format!("The native type '{native_type}' does not exist in the map."),
                Some("native_type"),
            ));
        };
        if let Some(owner) = self.serialized_to_native.get(&serialized_type) {
            if *owner != native_type {
                return Err(Error::invalid_argument(
                    format!(
                        "The serialized type '{serialized_type}' is already mapped to native type '{owner}'."
                    ),
                    Some("serialized_type"),
                ));
            }
        }

        self.serialized_to_native.remove(&previous);
        self.deserialize_operations.remove(&previous);
        self.insert(native_type, serialized_type, serialize, deserialize);
        Ok(())
    }

    pub fn get_serialized_type(&self, native_type: &NativeType) -> Option<&str> {
        self.native_to_serialized
            .get(native_type)
            .map(String::as_str)
    }

    pub fn get_native_type(&self, serialized_type: &str) -> Option<&NativeType> {
        self.serialized_to_native.get(serialized_type)
    }

    pub fn get_serialization_operation(&self, native_type: &NativeType) -> Option<SerializeFn> {
        self.serialize_operations.get(native_type).cloned()
    }

    pub fn get_deserialization_operation(&self, serialized_type: &str) -> Option<DeserializeFn> {
        self.deserialize_operations.get(serialized_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.native_to_serialized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.native_to_serialized.is_empty()
    }

    /// Insert without collision checks; callers guarantee uniqueness
    pub(crate) fn insert(
        &mut self,
        native_type: NativeType,
        serialized_type: String,
        serialize: SerializeFn,
        deserialize: DeserializeFn,
    ) {
        tracing::debug!(%native_type, %serialized_type, "Mapping serializer operations");
        self.serialized_to_native
            .insert(serialized_type.clone(), native_type.clone());
        self.deserialize_operations
            .insert(serialized_type.clone(), deserialize);
        self.serialize_operations
            .insert(native_type.clone(), serialize);
        self.native_to_serialized.insert(native_type, serialized_type);
    }
}

fn check_serialized_type(serialized_type: &str) -> Result<()> {
    if serialized_type.trim().is_empty() {
        return Err(Error::invalid_argument(
            "The serialized type cannot be blank.",
            Some("serialized_type"),
        ));
    }
    Ok(())
}

impl fmt::Debug for SerializerOperationMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.native_to_serialized.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_serialize() -> SerializeFn {
        Arc::new(|_: &Value, _: &mut XmlWriter| -> Result<()> { Ok(()) })
    }

    fn constant_deserialize(value: i32) -> DeserializeFn {
        Arc::new(move |_: roxmltree::Node<'_, '_>| -> Result<Value> {
            Ok(Value::Integer(value))
        })
    }

    #[test]
    fn test_add_and_lookup_both_directions() {
        let mut map = SerializerOperationMap::new();
        map.add_mapping(
            NativeType::Integer,
            "integer",
            noop_serialize(),
            constant_deserialize(1),
        )
        .unwrap();

        assert_eq!(map.get_serialized_type(&NativeType::Integer), Some("integer"));
        assert_eq!(map.get_native_type("integer"), Some(&NativeType::Integer));
        assert!(map.get_serialization_operation(&NativeType::Integer).is_some());
        assert!(map.get_deserialization_operation("integer").is_some());
    }

    #[test]
    fn test_unknown_keys_return_none() {
        let map = SerializerOperationMap::new();
        assert!(map.get_serialized_type(&NativeType::Bool).is_none());
        assert!(map.get_native_type("bool").is_none());
        assert!(map.get_serialization_operation(&NativeType::Bool).is_none());
        assert!(map.get_deserialization_operation("bool").is_none());
    }

    #[test]
    fn test_duplicate_native_type_and_tag_rejected_separately() {
        let mut map = SerializerOperationMap::new();
        map.add_mapping(
            NativeType::Integer,
            "integer",
            noop_serialize(),
            constant_deserialize(1),
        )
        .unwrap();

        let err = map
            .add_mapping(
                NativeType::Integer,
                "int32",
                noop_serialize(),
                constant_deserialize(1),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument { argument: Some(ref a), .. } if a == "native_type"
        ));

        let err = map
            .add_mapping(
                NativeType::LongInteger,
                "integer",
                noop_serialize(),
                constant_deserialize(1),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument { argument: Some(ref a), .. } if a == "serialized_type"
        ));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_blank_tag_rejected() {
        let mut map = SerializerOperationMap::new();
        assert!(map
            .add_mapping(NativeType::Char, " ", noop_serialize(), constant_deserialize(0))
            .is_err());
    }

    #[test]
    fn test_update_replaces_tag_and_operations() {
        let mut map = SerializerOperationMap::new();
        map.add_mapping(
            NativeType::Integer,
            "integer",
            noop_serialize(),
            constant_deserialize(1),
        )
        .unwrap();
        map.update_mapping(
            NativeType::Integer,
            "int",
            noop_serialize(),
            constant_deserialize(2),
        )
        .unwrap();

        assert_eq!(map.get_serialized_type(&NativeType::Integer), Some("int"));
        assert!(map.get_native_type("integer").is_none());

        let doc = roxmltree::Document::parse("<Data/>").unwrap();
        let deserialize = map.get_deserialization_operation("int").unwrap();
        assert_eq!(deserialize(doc.root_element()).unwrap(), Value::Integer(2));
    }

    #[test]
    fn test_update_of_missing_type_rejected() {
        let mut map = SerializerOperationMap::new();
        let err = map
            .update_mapping(
                NativeType::Double,
                "double",
                noop_serialize(),
                constant_deserialize(0),
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
