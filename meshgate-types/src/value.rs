//! Typed extraction helpers over free-form `serde_json::Value` maps
//! (provider hints, `x-*` extensions, tool config blobs). Access mismatches
//! surface as errors instead of silent defaults.

use serde_json::{Map, Value};

use crate::GatewayError;

pub fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str, GatewayError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidParams(format!("field {key:?} must be a string")))
}

pub fn opt_str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

pub fn u64_field(map: &Map<String, Value>, key: &str) -> Result<u64, GatewayError> {
    map.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| GatewayError::InvalidParams(format!("field {key:?} must be an integer")))
}

pub fn opt_u64_field(map: &Map<String, Value>, key: &str) -> Option<u64> {
    map.get(key).and_then(Value::as_u64)
}

pub fn bool_field(map: &Map<String, Value>, key: &str) -> Result<bool, GatewayError> {
    map.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| GatewayError::InvalidParams(format!("field {key:?} must be a boolean")))
}

pub fn opt_bool_field(map: &Map<String, Value>, key: &str) -> Option<bool> {
    map.get(key).and_then(Value::as_bool)
}

pub fn object_field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a Map<String, Value>, GatewayError> {
    map.get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| GatewayError::InvalidParams(format!("field {key:?} must be an object")))
}
