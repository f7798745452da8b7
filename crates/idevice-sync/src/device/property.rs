//! Lockdown property values.

use serde::Serialize;

/// A lockdown value of one of the types we read from devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    UnsignedInt(u64),
    String(String),
}

impl PropertyValue {
    /// Converts a plist node. Other node types are known but not supported, so they're
    /// logged and give `None`.
    pub fn from_plist(value: plist::Value) -> Option<Self> {
        match value {
            plist::Value::Boolean(b) => Some(Self::Bool(b)),
            plist::Value::Integer(i) => match i.as_unsigned() {
                Some(u) => Some(Self::UnsignedInt(u)),
                None => {
                    log::warn!("PropertyValue::from_plist: negative integer {:?} is not supported", i);
                    None
                }
            },
            plist::Value::String(s) => Some(Self::String(s)),
            other => {
                log::warn!("PropertyValue::from_plist: unhandled plist type {}", plist_type_name(&other));
                None
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UnsignedInt(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

fn plist_type_name(value: &plist::Value) -> &'static str {
    match value {
        plist::Value::Array(_) => "array",
        plist::Value::Dictionary(_) => "dictionary",
        plist::Value::Boolean(_) => "boolean",
        plist::Value::Data(_) => "data",
        plist::Value::Date(_) => "date",
        plist::Value::Real(_) => "real",
        plist::Value::Integer(_) => "integer",
        plist::Value::String(_) => "string",
        plist::Value::Uid(_) => "uid",
        _ => "unknown",
    }
}
