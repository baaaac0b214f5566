//! Structural validation of incoming values against type descriptors.
//!
//! Values are checked after key conversion, so record field names are matched
//! in transport case. Unknown keys are ignored.

use crate::error::BridgeError;
use crate::schema::{Definition, Definitions};
use crate::types::{Primitive, RecordDef, TypeDescriptor};
use serde_json::Value;

/// Validate `value` against `ty`. `path` names the value for errors,
/// e.g. `task` or `task.tags[1]`.
pub fn validate(
    defs: &Definitions,
    path: &str,
    ty: &TypeDescriptor,
    value: &Value,
) -> Result<(), BridgeError> {
    match ty {
        TypeDescriptor::Primitive(p) => check_primitive(path, *p, value),
        TypeDescriptor::Optional(inner) => match value {
            Value::Null => Ok(()),
            other => validate(defs, path, inner, other),
        },
        TypeDescriptor::Sequence(element) => {
            let items = value
                .as_array()
                .ok_or_else(|| mismatch(path, "array", value))?;
            for (i, item) in items.iter().enumerate() {
                validate(defs, &format!("{path}[{i}]"), element, item)?;
            }
            Ok(())
        }
        TypeDescriptor::Mapping(key, val) => {
            let map = value
                .as_object()
                .ok_or_else(|| mismatch(path, "object", value))?;
            for (k, v) in map {
                let entry = format!("{path}.{k}");
                if matches!(**key, TypeDescriptor::Primitive(Primitive::Integer))
                    && k.parse::<i64>().is_err()
                {
                    return Err(BridgeError::invalid_field(&entry, "expected integer key"));
                }
                validate(defs, &entry, val, v)?;
            }
            Ok(())
        }
        TypeDescriptor::Tuple(items) => {
            let values = value
                .as_array()
                .ok_or_else(|| mismatch(path, "array", value))?;
            if values.len() != items.len() {
                return Err(BridgeError::invalid_field(
                    path,
                    format!("expected {} elements, got {}", items.len(), values.len()),
                ));
            }
            for (i, (item_ty, item)) in items.iter().zip(values).enumerate() {
                validate(defs, &format!("{path}[{i}]"), item_ty, item)?;
            }
            Ok(())
        }
        TypeDescriptor::Record(def) => validate_record(defs, path, def, value),
        TypeDescriptor::Enum(def) => {
            let s = value
                .as_str()
                .ok_or_else(|| mismatch(path, "string", value))?;
            if def.variants.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(BridgeError::invalid_field(
                    path,
                    format!("'{s}' is not a valid {}", def.name),
                ))
            }
        }
        TypeDescriptor::Union(members) => {
            if members
                .iter()
                .any(|m| validate(defs, path, m, value).is_ok())
            {
                Ok(())
            } else {
                Err(BridgeError::invalid_field(
                    path,
                    "value matches none of the allowed types",
                ))
            }
        }
        TypeDescriptor::Reference(name) => match defs.get(name) {
            Some(Definition::Record(def)) => validate_record(defs, path, def, value),
            Some(Definition::Enum(def)) => {
                validate(defs, path, &TypeDescriptor::Enum(def.clone()), value)
            }
            None => Err(BridgeError::internal(format!(
                "type '{name}' is not defined"
            ))),
        },
        // Streams never appear in accepted positions; registry build rejects them.
        TypeDescriptor::Stream(_) => Err(BridgeError::invalid_field(
            path,
            "streams cannot be sent as arguments",
        )),
    }
}

fn validate_record(
    defs: &Definitions,
    path: &str,
    def: &RecordDef,
    value: &Value,
) -> Result<(), BridgeError> {
    let map = value
        .as_object()
        .ok_or_else(|| mismatch(path, "object", value))?;
    for field in &def.fields {
        let field_path = format!("{path}.{}", field.name);
        match map.get(&field.name) {
            Some(v) => validate(defs, &field_path, &field.ty, v)?,
            None if field.may_be_absent() => {}
            None => {
                return Err(BridgeError::invalid_field(
                    &field_path,
                    "missing required field",
                ));
            }
        }
    }
    Ok(())
}

fn check_primitive(path: &str, p: Primitive, value: &Value) -> Result<(), BridgeError> {
    let ok = match p {
        Primitive::String | Primitive::Bytes => value.is_string(),
        Primitive::Integer => value.is_i64() || value.is_u64(),
        Primitive::Float => value.is_number(),
        Primitive::Boolean => value.is_boolean(),
        Primitive::Null => value.is_null(),
        Primitive::Unknown => true,
    };
    if ok {
        Ok(())
    } else {
        Err(mismatch(path, p.name(), value))
    }
}

fn mismatch(path: &str, expected: &str, value: &Value) -> BridgeError {
    BridgeError::invalid_field(path, format!("expected {expected}, got {}", kind(value)))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
