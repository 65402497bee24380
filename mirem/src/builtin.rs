//! Built-in scalar and array codecs registered in every serializer's
//! operation map.
//!
//! Scalars render as culture-invariant text. Floating point values use an
//! exponent form with a signed, three digit exponent (`-3.14159261e-038`);
//! parsing also accepts unpadded, upper case exponents (`-3.14159261E-38`)
//! written by other implementations of the protocol.

use crate::operation_map::{DeserializeFn, SerializeFn, SerializerOperationMap};
use crate::serializer::{DATA, DATA_TYPE, ELEMENT, ELEMENT_DATA_TYPE, EMPTY};
use crate::value::{ArrayValue, NativeType, Value};
use crate::xml::{self, XmlWriter};
use crate::{Error, Result};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::sync::Arc;

const DATE_TIME_WRITE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
const DATE_TIME_READ_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Wire tag of a scalar built-in type
pub fn scalar_tag(native_type: &NativeType) -> Option<&'static str> {
    let tag = match native_type {
        NativeType::SignedByte => "signedByte",
        NativeType::ShortInteger => "shortInteger",
        NativeType::Integer => "integer",
        NativeType::LongInteger => "longInteger",
        NativeType::Float => "float",
        NativeType::Double => "double",
        NativeType::Decimal => "decimal",
        NativeType::Char => "char",
        NativeType::String => "string",
        NativeType::Bool => "bool",
        NativeType::DateTime => "dateTime",
        NativeType::Array(_) | NativeType::Custom(_) => return None,
    };
    Some(tag)
}

/// Register every scalar type and its array counterpart.
///
/// Built-in tags are distinct by construction, so no collision checks run.
pub fn register(map: &mut SerializerOperationMap) {
    for native_type in NativeType::SCALARS {
        let Some(tag) = scalar_tag(&native_type) else {
            continue;
        };
        let serialize = scalar_serializer(native_type.clone());
        let deserialize = scalar_deserializer(native_type.clone());

        map.insert(
            NativeType::array_of(native_type.clone()),
            format!("{tag}Array"),
            array_serializer(native_type.clone(), tag, serialize.clone()),
            array_deserializer(native_type.clone(), tag, deserialize.clone()),
        );
        map.insert(native_type, tag.to_string(), serialize, deserialize);
    }
}

pub(crate) fn type_mismatch(expected: &NativeType, value: &Value) -> Error {
    Error::serialization(
        format!(
            "Value of type '{}' cannot be serialized as '{expected}'.",
            value.native_type()
        ),
        None,
        value,
        None,
    )
}

fn scalar_serializer(native_type: NativeType) -> SerializeFn {
    Arc::new(move |value: &Value, writer: &mut XmlWriter| -> Result<()> {
        match value {
            Value::String(s) if s.is_empty() && native_type == NativeType::String => {
                writer.empty_element(EMPTY);
                Ok(())
            }
            _ if value.native_type() == native_type => {
                writer.text(&format_scalar(value)?);
                Ok(())
            }
            _ => Err(type_mismatch(&native_type, value)),
        }
    })
}

fn scalar_deserializer(native_type: NativeType) -> DeserializeFn {
    Arc::new(move |data: roxmltree::Node<'_, '_>| -> Result<Value> {
        if native_type == NativeType::String && xml::find_child(data, EMPTY).is_some() {
            return Ok(Value::String(String::new()));
        }
        parse_scalar(&native_type, &xml::text_content(data))
    })
}

fn array_serializer(element_type: NativeType, tag: &'static str, element: SerializeFn) -> SerializeFn {
    Arc::new(move |value: &Value, writer: &mut XmlWriter| -> Result<()> {
        let Value::Array(array) = value else {
            return Err(type_mismatch(&NativeType::array_of(element_type.clone()), value));
        };
        if array.element_type != element_type {
            return Err(type_mismatch(&NativeType::array_of(element_type.clone()), value));
        }

        writer.element(ELEMENT_DATA_TYPE, tag);
        for item in &array.elements {
            writer.start_element(ELEMENT);
            if let Some(item) = item {
                writer.element(DATA_TYPE, tag).start_element(DATA);
                element(item, writer)?;
                writer.end_element(DATA);
            }
            writer.end_element(ELEMENT);
        }
        Ok(())
    })
}

fn array_deserializer(element_type: NativeType, tag: &'static str, element: DeserializeFn) -> DeserializeFn {
    Arc::new(move |data: roxmltree::Node<'_, '_>| -> Result<Value> {
        let element_tag = xml::text_content(xml::required_child(data, ELEMENT_DATA_TYPE)?);
        if element_tag != tag {
            return Err(Error::protocol(
                "Array element data type does not match the array data type.",
                Some(tag.to_string()),
                Some(element_tag),
            ));
        }

        let mut elements = Vec::new();
        for node in xml::child_elements(data).filter(|n| n.has_tag_name(ELEMENT)) {
            if xml::child_elements(node).next().is_none() {
                elements.push(None);
                continue;
            }
            let item_tag = xml::text_content(xml::required_child(node, DATA_TYPE)?);
            if item_tag != tag {
                return Err(Error::protocol(
                    "Array element has an unexpected data type.",
                    Some(tag.to_string()),
                    Some(item_tag),
                ));
            }
            elements.push(Some(element(xml::required_child(node, DATA)?)?));
        }

        Ok(Value::Array(ArrayValue::new(element_type.clone(), elements)))
    })
}

/// Render a scalar value as wire text
pub fn format_scalar(value: &Value) -> Result<String> {
    let text = match value {
        Value::SignedByte(v) => v.to_string(),
        Value::ShortInteger(v) => v.to_string(),
        Value::Integer(v) => v.to_string(),
        Value::LongInteger(v) => v.to_string(),
        Value::Float(v) => special_float(f64::from(*v))
            .map(str::to_string)
            .unwrap_or_else(|| pad_exponent(&format!("{v:.8e}"))),
        Value::Double(v) => special_float(*v)
            .map(str::to_string)
            .unwrap_or_else(|| pad_exponent(&format!("{v:.16e}"))),
        Value::Decimal(v) => v.to_string(),
        Value::Char(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Bool(v) => v.to_string(),
        Value::DateTime(v) => v.format(DATE_TIME_WRITE_FORMAT).to_string(),
        Value::Array(_) | Value::Custom(_) => {
            return Err(Error::serialization(
                "Value is not a scalar.",
                None,
                value,
                None,
            ))
        }
    };
    Ok(text)
}

fn special_float(v: f64) -> Option<&'static str> {
    if v.is_nan() {
        Some("NaN")
    } else if v == f64::INFINITY {
        Some("Infinity")
    } else if v == f64::NEG_INFINITY {
        Some("-Infinity")
    } else {
        None
    }
}

/// Rewrite Rust's `1.5e-7` exponent as `1.5e-007`
fn pad_exponent(rendered: &str) -> String {
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exponent) => format!("{mantissa}e{exponent:+04}"),
            Err(_) => rendered.to_string(),
        },
        None => rendered.to_string(),
    }
}

fn parse_error<E>(native_type: &NativeType, text: &str, source: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::deserialization(
        format!("Failed to parse '{text}' as '{native_type}'."),
        text,
        Some(Box::new(source)),
    )
}

fn parse_float_text(text: &str) -> std::result::Result<f64, std::num::ParseFloatError> {
    match text {
        "Infinity" | "INF" => Ok(f64::INFINITY),
        "-Infinity" | "-INF" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        other => other.parse::<f64>(),
    }
}

/// Parse wire text back into a scalar of `native_type`
pub fn parse_scalar(native_type: &NativeType, text: &str) -> Result<Value> {
    let trimmed = text.trim();
    let value = match native_type {
        NativeType::SignedByte => trimmed
            .parse::<i8>()
            .map(Value::SignedByte)
            .map_err(|e| parse_error(native_type, text, e))?,
        NativeType::ShortInteger => trimmed
            .parse::<i16>()
            .map(Value::ShortInteger)
            .map_err(|e| parse_error(native_type, text, e))?,
        NativeType::Integer => trimmed
            .parse::<i32>()
            .map(Value::Integer)
            .map_err(|e| parse_error(native_type, text, e))?,
        NativeType::LongInteger => trimmed
            .parse::<i64>()
            .map(Value::LongInteger)
            .map_err(|e| parse_error(native_type, text, e))?,
        NativeType::Float => match trimmed {
            "Infinity" | "INF" => Value::Float(f32::INFINITY),
            "-Infinity" | "-INF" => Value::Float(f32::NEG_INFINITY),
            "NaN" => Value::Float(f32::NAN),
            other => other
                .parse::<f32>()
                .map(Value::Float)
                .map_err(|e| parse_error(native_type, text, e))?,
        },
        NativeType::Double => parse_float_text(trimmed)
            .map(Value::Double)
            .map_err(|e| parse_error(native_type, text, e))?,
        NativeType::Decimal => trimmed
            .parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map(Value::Decimal)
            .map_err(|e| parse_error(native_type, text, e))?,
        NativeType::Char => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Value::Char(c),
                _ => {
                    return Err(Error::deserialization(
                        format!("Failed to parse '{text}' as a single character."),
                        text,
                        None,
                    ))
                }
            }
        }
        NativeType::String => Value::String(text.to_string()),
        NativeType::Bool => match trimmed {
            "true" | "True" | "1" => Value::Bool(true),
            "false" | "False" | "0" => Value::Bool(false),
            _ => {
                return Err(Error::deserialization(
                    format!("Failed to parse '{text}' as a boolean."),
                    text,
                    None,
                ))
            }
        },
        NativeType::DateTime => NaiveDateTime::parse_from_str(trimmed, DATE_TIME_READ_FORMAT)
            .map(Value::DateTime)
            .map_err(|e| parse_error(native_type, text, e))?,
        NativeType::Array(_) | NativeType::Custom(_) => {
            return Err(Error::deserialization(
                format!("Type '{native_type}' is not a scalar."),
                text,
                None,
            ))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_float_formatting_pads_exponent() {
        assert_eq!(
            format_scalar(&Value::Float(-3.14159261e-38)).unwrap(),
            "-3.14159261e-038"
        );
        assert_eq!(format_scalar(&Value::Float(1.0)).unwrap(), "1.00000000e+000");
        assert_eq!(
            format_scalar(&Value::Double(f64::NEG_INFINITY)).unwrap(),
            "-Infinity"
        );
        assert_eq!(format_scalar(&Value::Float(f32::INFINITY)).unwrap(), "Infinity");
    }

    #[test]
    fn test_both_exponent_notations_parse_identically() {
        let padded = parse_scalar(&NativeType::Float, "-3.14159261e-038").unwrap();
        let unpadded = parse_scalar(&NativeType::Float, "-3.14159261E-38").unwrap();
        assert_eq!(padded, unpadded);

        let padded = parse_scalar(&NativeType::Double, "1.7976931348623157e+308").unwrap();
        let unpadded = parse_scalar(&NativeType::Double, "1.7976931348623157E308").unwrap();
        assert_eq!(padded, Value::Double(f64::MAX));
        assert_eq!(padded, unpadded);
    }

    #[test]
    fn test_float_text_round_trips_bounds() {
        for v in [f32::MIN, f32::MAX, f32::MIN_POSITIVE, -0.0, 1.0e-45] {
            let text = format_scalar(&Value::Float(v)).unwrap();
            assert_eq!(parse_scalar(&NativeType::Float, &text).unwrap(), Value::Float(v));
        }
        for v in [f64::MIN, f64::MAX, f64::MIN_POSITIVE, std::f64::consts::PI] {
            let text = format_scalar(&Value::Double(v)).unwrap();
            assert_eq!(parse_scalar(&NativeType::Double, &text).unwrap(), Value::Double(v));
        }
    }

    #[test]
    fn test_nan_round_trips() {
        let text = format_scalar(&Value::Double(f64::NAN)).unwrap();
        assert_eq!(text, "NaN");
        match parse_scalar(&NativeType::Double, &text).unwrap() {
            Value::Double(v) => assert!(v.is_nan()),
            other => panic!("Expected double, got {other:?}"),
        }
    }

    #[test]
    fn test_date_time_always_has_milliseconds() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(23, 5, 9)
            .unwrap();
        assert_eq!(
            format_scalar(&Value::DateTime(dt)).unwrap(),
            "2024-02-29T23:05:09.000"
        );

        let dt = NaiveDate::from_ymd_opt(2013, 5, 1)
            .unwrap()
            .and_hms_milli_opt(12, 43, 56, 654)
            .unwrap();
        let text = format_scalar(&Value::DateTime(dt)).unwrap();
        assert_eq!(text, "2013-05-01T12:43:56.654");
        assert_eq!(
            parse_scalar(&NativeType::DateTime, &text).unwrap(),
            Value::DateTime(dt)
        );
    }

    #[test]
    fn test_integer_bounds_and_signs() {
        assert_eq!(format_scalar(&Value::Integer(-456)).unwrap(), "-456");
        assert_eq!(
            parse_scalar(&NativeType::LongInteger, "-9223372036854775808").unwrap(),
            Value::LongInteger(i64::MIN)
        );
        assert!(parse_scalar(&NativeType::SignedByte, "128").is_err());
        assert!(parse_scalar(&NativeType::Integer, "1,000").is_err());
    }

    #[test]
    fn test_decimal_is_culture_invariant() {
        let value: Decimal = "-12345.6789".parse().unwrap();
        assert_eq!(format_scalar(&Value::Decimal(value)).unwrap(), "-12345.6789");
        assert_eq!(
            parse_scalar(&NativeType::Decimal, "-12345.6789").unwrap(),
            Value::Decimal(value)
        );
    }

    #[test]
    fn test_char_requires_exactly_one_character() {
        assert_eq!(parse_scalar(&NativeType::Char, " ").unwrap(), Value::Char(' '));
        assert!(parse_scalar(&NativeType::Char, "ab").is_err());
        assert!(parse_scalar(&NativeType::Char, "").is_err());
    }

    #[test]
    fn test_register_maps_scalars_and_arrays() {
        let mut map = SerializerOperationMap::new();
        register(&mut map);

        assert_eq!(map.len(), 22);
        assert_eq!(map.get_serialized_type(&NativeType::Bool), Some("bool"));
        assert_eq!(
            map.get_native_type("stringArray"),
            Some(&NativeType::array_of(NativeType::String))
        );
    }
}
