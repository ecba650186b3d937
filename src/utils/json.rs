use serde::de::DeserializeOwned;
use serde_json::Value;

/// A PATCH field: absent, explicitly `null`, or set.
#[derive(Debug, PartialEq)]
pub enum NullableValue<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> NullableValue<T> {
    /// `None` when the field was omitted, otherwise the new column value.
    pub fn into_change(self) -> Option<Option<T>> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::Value(value) => Some(Some(value)),
        }
    }

    /// For columns that cannot be cleared.
    pub fn required(self, field: &str) -> Result<Option<T>, String> {
        match self {
            NullableValue::Omitted => Ok(None),
            NullableValue::Null => Err(format!("{field} cannot be null")),
            NullableValue::Value(value) => Ok(Some(value)),
        }
    }
}

pub fn classify_nullable<T: DeserializeOwned>(
    body: &Value,
    field: &str,
) -> Result<NullableValue<T>, String> {
    match body.get(field) {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(other) => serde_json::from_value(other.clone())
            .map(NullableValue::Value)
            .map_err(|err| format!("invalid value for {field}: {err}")),
    }
}
