//! Dynamically typed parameter and return values

use crate::xml::XmlWriter;
use crate::Result;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Identity of a native type that can cross the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeType {
    SignedByte,
    ShortInteger,
    Integer,
    LongInteger,
    Float,
    Double,
    Decimal,
    Char,
    String,
    Bool,
    DateTime,
    /// One-dimensional array of the element type
    Array(Box<NativeType>),
    /// A user type implementing [`XmlSerializable`]
    Custom(CustomType),
}

impl NativeType {
    /// The scalar built-in types, in registration order
    pub const SCALARS: [NativeType; 11] = [
        NativeType::SignedByte,
        NativeType::ShortInteger,
        NativeType::Integer,
        NativeType::LongInteger,
        NativeType::Float,
        NativeType::Double,
        NativeType::Decimal,
        NativeType::Char,
        NativeType::String,
        NativeType::Bool,
        NativeType::DateTime,
    ];

    pub fn array_of(element: NativeType) -> Self {
        NativeType::Array(Box::new(element))
    }

    pub fn custom<T: XmlSerializable>() -> Self {
        NativeType::Custom(CustomType::of::<T>())
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Array(element) => write!(f, "{element}[]"),
            NativeType::Custom(custom) => f.write_str(custom.name),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Runtime identity of a user type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CustomType {
    id: TypeId,
    name: &'static str,
}

impl CustomType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A non-null parameter, array element or return value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    SignedByte(i8),
    ShortInteger(i16),
    Integer(i32),
    LongInteger(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Char(char),
    String(String),
    Bool(bool),
    DateTime(NaiveDateTime),
    Array(ArrayValue),
    Custom(CustomValue),
}

impl Value {
    pub fn native_type(&self) -> NativeType {
        match self {
            Value::SignedByte(_) => NativeType::SignedByte,
            Value::ShortInteger(_) => NativeType::ShortInteger,
            Value::Integer(_) => NativeType::Integer,
            Value::LongInteger(_) => NativeType::LongInteger,
            Value::Float(_) => NativeType::Float,
            Value::Double(_) => NativeType::Double,
            Value::Decimal(_) => NativeType::Decimal,
            Value::Char(_) => NativeType::Char,
            Value::String(_) => NativeType::String,
            Value::Bool(_) => NativeType::Bool,
            Value::DateTime(_) => NativeType::DateTime,
            Value::Array(array) => NativeType::array_of(array.element_type.clone()),
            Value::Custom(custom) => NativeType::Custom(custom.custom_type()),
        }
    }

    /// Build an array value from optional elements
    pub fn array(element_type: NativeType, elements: Vec<Option<Value>>) -> Self {
        Value::Array(ArrayValue::new(element_type, elements))
    }

    pub fn custom<T: XmlSerializable + PartialEq>(value: T) -> Self {
        Value::Custom(CustomValue::new(value))
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    i8 => SignedByte,
    i16 => ShortInteger,
    i32 => Integer,
    i64 => LongInteger,
    f32 => Float,
    f64 => Double,
    Decimal => Decimal,
    char => Char,
    String => String,
    bool => Bool,
    NaiveDateTime => DateTime,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// Array of a single element type; `None` elements are nulls
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub element_type: NativeType,
    pub elements: Vec<Option<Value>>,
}

impl ArrayValue {
    pub fn new(element_type: NativeType, elements: Vec<Option<Value>>) -> Self {
        Self {
            element_type,
            elements,
        }
    }

    /// Build a null-free array from native values
    pub fn from_values<T: Into<Value>>(element_type: NativeType, values: Vec<T>) -> Self {
        Self::new(
            element_type,
            values.into_iter().map(|v| Some(v.into())).collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Capability of a user type to write itself into, and read itself from,
/// the `Data` element of the wire format.
///
/// `write_xml` emits the content placed inside `<Data>`; `read_xml` receives
/// that `Data` element.
pub trait XmlSerializable: fmt::Debug + Send + Sync + 'static {
    fn write_xml(&self, writer: &mut XmlWriter) -> Result<()>;

    fn read_xml(data: roxmltree::Node<'_, '_>) -> Result<Self>
    where
        Self: Sized;
}

trait DynXmlSerializable: fmt::Debug + Send + Sync {
    fn write_xml(&self, writer: &mut XmlWriter) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn Any) -> bool;
    fn custom_type(&self) -> CustomType;
}

impl<T: XmlSerializable + PartialEq> DynXmlSerializable for T {
    fn write_xml(&self, writer: &mut XmlWriter) -> Result<()> {
        XmlSerializable::write_xml(self, writer)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|other| self == other)
    }

    fn custom_type(&self) -> CustomType {
        CustomType::of::<T>()
    }
}

/// Type-erased instance of a registered user type
#[derive(Clone)]
pub struct CustomValue(Arc<dyn DynXmlSerializable>);

impl CustomValue {
    pub fn new<T: XmlSerializable + PartialEq>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn custom_type(&self) -> CustomType {
        self.0.custom_type()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn write_xml(&self, writer: &mut XmlWriter) -> Result<()> {
        self.0.write_xml(writer)
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_any())
    }
}
