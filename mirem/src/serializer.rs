//! Method invocation wire codec
//!
//! Invocations and return values travel as small XML documents:
//!
//! ```text
//! <?xml version="1.0" encoding="utf-8"?>
//! <MethodInvocation>
//!   <MethodName>Add</MethodName>
//!   <Parameters>
//!     <Parameter><DataType>integer</DataType><Data>1</Data></Parameter>
//!     <Parameter></Parameter>
//!   </Parameters>
//!   <ReturnType><DataType>integer</DataType></ReturnType>
//! </MethodInvocation>
//! ```
//!
//! (shown indented; the real encoding has no whitespace between elements).
//! A null parameter is an empty `Parameter`, a void method an empty
//! `ReturnType`, and a null or void return value an empty `ReturnValue`.

use crate::builtin;
use crate::invocation::MethodInvocation;
use crate::metrics::{null_metric_logger, AmountMetric, CountMetric, IntervalMetric, MetricLogger};
use crate::operation_map::{DeserializeFn, SerializeFn, SerializerOperationMap};
use crate::value::{CustomValue, NativeType, Value, XmlSerializable};
use crate::xml::{self, XmlWriter};
use crate::{Error, Result};
use std::sync::Arc;

pub(crate) const METHOD_INVOCATION: &str = "MethodInvocation";
pub(crate) const METHOD_NAME: &str = "MethodName";
pub(crate) const PARAMETERS: &str = "Parameters";
pub(crate) const PARAMETER: &str = "Parameter";
pub(crate) const RETURN_TYPE: &str = "ReturnType";
pub(crate) const RETURN_VALUE: &str = "ReturnValue";
pub(crate) const DATA_TYPE: &str = "DataType";
pub(crate) const DATA: &str = "Data";
pub(crate) const ELEMENT_DATA_TYPE: &str = "ElementDataType";
pub(crate) const ELEMENT: &str = "Element";
pub(crate) const EMPTY: &str = "Empty";

/// The serialized form of a void (or null) return value
pub const VOID_RETURN_VALUE: &str =
    r#"<?xml version="1.0" encoding="utf-8"?><ReturnValue></ReturnValue>"#;

/// Converts invocations and return values to and from wire text
pub trait InvocationSerializer: Send + Sync + 'static {
    fn serialize(&self, invocation: &MethodInvocation) -> Result<String>;

    fn deserialize(&self, serialized: &str) -> Result<MethodInvocation>;

    /// `None` serializes to [`void_return_value`](Self::void_return_value)
    fn serialize_return_value(&self, value: Option<&Value>) -> Result<String>;

    fn deserialize_return_value(&self, serialized: &str) -> Result<Option<Value>>;

    /// The literal document sent back from a void method
    fn void_return_value(&self) -> &str;
}

/// XML implementation of [`InvocationSerializer`] backed by a
/// [`SerializerOperationMap`]
pub struct MethodInvocationSerializer {
    operation_map: SerializerOperationMap,
    metric_logger: Arc<dyn MetricLogger>,
}

impl MethodInvocationSerializer {
    /// Create a serializer knowing all built-in types
    pub fn new() -> Self {
        let mut operation_map = SerializerOperationMap::new();
        builtin::register(&mut operation_map);
        Self::with_operation_map(operation_map)
    }

    /// Create a serializer over a caller-built map
    pub fn with_operation_map(operation_map: SerializerOperationMap) -> Self {
        Self {
            operation_map,
            metric_logger: null_metric_logger(),
        }
    }

    pub fn with_metric_logger(mut self, metric_logger: Arc<dyn MetricLogger>) -> Self {
        self.metric_logger = metric_logger;
        self
    }

    pub fn operation_map(&self) -> &SerializerOperationMap {
        &self.operation_map
    }

    pub fn operation_map_mut(&mut self) -> &mut SerializerOperationMap {
        &mut self.operation_map
    }

    /// Register a self-serializing user type under `serialized_type`
    pub fn add_xml_serializable_operations<T>(&mut self, serialized_type: &str) -> Result<()>
    where
        T: XmlSerializable + PartialEq,
    {
        let native_type = NativeType::custom::<T>();
        let expected = native_type.clone();
        let serialize: SerializeFn =
            Arc::new(move |value: &Value, writer: &mut XmlWriter| -> Result<()> {
                match value {
                    Value::Custom(custom) if custom.downcast_ref::<T>().is_some() => {
                        custom.write_xml(writer)
                    }
                    other => Err(builtin::type_mismatch(&expected, other)),
                }
            });
        let deserialize: DeserializeFn =
            Arc::new(|data: roxmltree::Node<'_, '_>| -> Result<Value> {
                Ok(Value::Custom(CustomValue::new(T::read_xml(data)?)))
            });

        self.operation_map
            .add_mapping(native_type, serialized_type, serialize, deserialize)
    }

    fn serialized_type(&self, native_type: &NativeType) -> Result<&str> {
        self.operation_map
            .get_serialized_type(native_type)
            .ok_or_else(|| Error::unmapped_type(native_type.to_string()))
    }

    fn write_typed_value(&self, writer: &mut XmlWriter, value: &Value) -> Result<()> {
        let native_type = value.native_type();
        let tag = self.serialized_type(&native_type)?;
        let operation = self
            .operation_map
            .get_serialization_operation(&native_type)
            .ok_or_else(|| Error::unmapped_type(native_type.to_string()))?;

        writer.element(DATA_TYPE, tag).start_element(DATA);
        operation(value, writer)?;
        writer.end_element(DATA);
        Ok(())
    }

    /// Read an element holding either nothing (null) or `DataType` + `Data`
    fn read_typed_value(&self, node: roxmltree::Node<'_, '_>) -> Result<Option<Value>> {
        if xml::child_elements(node).next().is_none() {
            return Ok(None);
        }
        let tag = xml::text_content(xml::required_child(node, DATA_TYPE)?);
        let operation = self
            .operation_map
            .get_deserialization_operation(&tag)
            .ok_or_else(|| Error::unmapped_type(tag.clone()))?;
        let data = xml::required_child(node, DATA)?;
        operation(data).map(Some)
    }

    fn write_invocation(&self, invocation: &MethodInvocation) -> Result<String> {
        let mut writer = XmlWriter::document();
        writer
            .start_element(METHOD_INVOCATION)
            .element(METHOD_NAME, invocation.name())
            .start_element(PARAMETERS);
        for parameter in invocation.parameters().unwrap_or_default() {
            writer.start_element(PARAMETER);
            if let Some(value) = parameter {
                self.write_typed_value(&mut writer, value)?;
            }
            writer.end_element(PARAMETER);
        }
        writer.end_element(PARAMETERS).start_element(RETURN_TYPE);
        if let Some(return_type) = invocation.return_type() {
            writer.element(DATA_TYPE, self.serialized_type(return_type)?);
        }
        writer.end_element(RETURN_TYPE).end_element(METHOD_INVOCATION);
        Ok(writer.into_string())
    }

    fn read_invocation(&self, serialized: &str) -> Result<MethodInvocation> {
        let document = parse_document(serialized)?;
        let root = document.root_element();
        expect_root(root, METHOD_INVOCATION)?;

        let name = xml::text_content(xml::required_child(root, METHOD_NAME)?);

        let mut parameters = Vec::new();
        for node in xml::child_elements(xml::required_child(root, PARAMETERS)?)
            .filter(|n| n.has_tag_name(PARAMETER))
        {
            parameters.push(self.read_typed_value(node)?);
        }

        let return_type = match xml::find_child(xml::required_child(root, RETURN_TYPE)?, DATA_TYPE)
        {
            Some(node) => {
                let tag = xml::text_content(node);
                let native_type = self
                    .operation_map
                    .get_native_type(&tag)
                    .cloned()
                    .ok_or_else(|| Error::unmapped_type(tag))?;
                Some(native_type)
            }
            None => None,
        };

        let parameters = (!parameters.is_empty()).then_some(parameters);
        MethodInvocation::new(name, parameters, return_type)
    }

    fn write_return_value(&self, value: &Value) -> Result<String> {
        let mut writer = XmlWriter::document();
        writer.start_element(RETURN_VALUE);
        self.write_typed_value(&mut writer, value)?;
        writer.end_element(RETURN_VALUE);
        Ok(writer.into_string())
    }

    fn read_return_value(&self, serialized: &str) -> Result<Option<Value>> {
        let document = parse_document(serialized)?;
        let root = document.root_element();
        expect_root(root, RETURN_VALUE)?;
        self.read_typed_value(root)
    }
}

impl Default for MethodInvocationSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MethodInvocationSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodInvocationSerializer")
            .field("operation_map", &self.operation_map)
            .finish()
    }
}

fn parse_document(serialized: &str) -> Result<roxmltree::Document<'_>> {
    roxmltree::Document::parse(serialized).map_err(|e| {
        Error::deserialization(
            "Failed to parse XML document.",
            serialized,
            Some(Box::new(e)),
        )
    })
}

fn expect_root(root: roxmltree::Node<'_, '_>, name: &str) -> Result<()> {
    if root.has_tag_name(name) {
        Ok(())
    } else {
        Err(Error::protocol(
            "Unexpected document element.",
            Some(name.to_string()),
            Some(root.tag_name().name().to_string()),
        ))
    }
}

impl InvocationSerializer for MethodInvocationSerializer {
    fn serialize(&self, invocation: &MethodInvocation) -> Result<String> {
        self.metric_logger
            .begin(IntervalMetric::MethodInvocationSerializeTime);
        match self.write_invocation(invocation) {
            Ok(serialized) => {
                self.metric_logger
                    .end(IntervalMetric::MethodInvocationSerializeTime);
                self.metric_logger
                    .increment(CountMetric::MethodInvocationSerialized);
                self.metric_logger.add(
                    AmountMetric::SerializedMethodInvocationSize,
                    serialized.len() as u64,
                );
                tracing::debug!(method = invocation.name(), "Serialized method invocation");
                Ok(serialized)
            }
            Err(e) => {
                self.metric_logger
                    .cancel_begin(IntervalMetric::MethodInvocationSerializeTime);
                Err(Error::serialization(
                    format!(
                        "Failed to serialize invocation of method '{}'.",
                        invocation.name()
                    ),
                    Some(invocation.name()),
                    invocation,
                    Some(Box::new(e)),
                ))
            }
        }
    }

    fn deserialize(&self, serialized: &str) -> Result<MethodInvocation> {
        self.metric_logger
            .begin(IntervalMetric::MethodInvocationDeserializeTime);
        match self.read_invocation(serialized) {
            Ok(invocation) => {
                self.metric_logger
                    .end(IntervalMetric::MethodInvocationDeserializeTime);
                self.metric_logger
                    .increment(CountMetric::MethodInvocationDeserialized);
                tracing::debug!(method = invocation.name(), "Deserialized method invocation");
                Ok(invocation)
            }
            Err(e) => {
                self.metric_logger
                    .cancel_begin(IntervalMetric::MethodInvocationDeserializeTime);
                Err(Error::deserialization(
                    "Failed to deserialize method invocation.",
                    serialized,
                    Some(Box::new(e)),
                ))
            }
        }
    }

    fn serialize_return_value(&self, value: Option<&Value>) -> Result<String> {
        let Some(value) = value else {
            self.metric_logger.increment(CountMetric::ReturnValueSerialized);
            return Ok(VOID_RETURN_VALUE.to_string());
        };

        self.metric_logger
            .begin(IntervalMetric::ReturnValueSerializeTime);
        match self.write_return_value(value) {
            Ok(serialized) => {
                self.metric_logger.end(IntervalMetric::ReturnValueSerializeTime);
                self.metric_logger.increment(CountMetric::ReturnValueSerialized);
                self.metric_logger.add(
                    AmountMetric::SerializedReturnValueSize,
                    serialized.len() as u64,
                );
                Ok(serialized)
            }
            Err(e) => {
                self.metric_logger
                    .cancel_begin(IntervalMetric::ReturnValueSerializeTime);
                Err(Error::serialization(
                    "Failed to serialize return value.",
                    None,
                    value,
                    Some(Box::new(e)),
                ))
            }
        }
    }

    fn deserialize_return_value(&self, serialized: &str) -> Result<Option<Value>> {
        self.metric_logger
            .begin(IntervalMetric::ReturnValueDeserializeTime);
        match self.read_return_value(serialized) {
            Ok(value) => {
                self.metric_logger
                    .end(IntervalMetric::ReturnValueDeserializeTime);
                self.metric_logger
                    .increment(CountMetric::ReturnValueDeserialized);
                Ok(value)
            }
            Err(e) => {
                self.metric_logger
                    .cancel_begin(IntervalMetric::ReturnValueDeserializeTime);
                Err(Error::deserialization(
                    "Failed to deserialize return value.",
                    serialized,
                    Some(Box::new(e)),
                ))
            }
        }
    }

    fn void_return_value(&self) -> &str {
        VOID_RETURN_VALUE
    }
}
