// Statement parameters and their wire types

use serde::Serialize;
use std::fmt;

/// A scalar statement parameter. The variant is the caller's type tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl SqlParam {
    /// Convert an untyped JSON value (e.g. a request body field).
    ///
    /// Whole numbers become `Int`, other numbers `Float`, booleans `Bool`,
    /// `null` stays `Null` and everything else is sent as text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlParam::Int(i)
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                            SqlParam::Int(f as i64)
                        }
                        Some(f) => SqlParam::Float(f),
                        None => SqlParam::Text(n.to_string()),
                    }
                }
            }
            Value::String(s) => SqlParam::Text(s.clone()),
            other => SqlParam::Text(other.to_string()),
        }
    }

    pub fn wire_type(&self) -> WireType {
        WireType::infer(self)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        SqlParam::Int(v as i64)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<u32> for SqlParam {
    fn from(v: u32) -> Self {
        SqlParam::Int(v as i64)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<&String> for SqlParam {
    fn from(v: &String) -> Self {
        SqlParam::Text(v.clone())
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

/// Build a parameter list from mixed scalar values
#[macro_export]
macro_rules! params {
    () => { Vec::<$crate::db::SqlParam>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::db::SqlParam::from($value)),+]
    };
}

/// SQL Server type a parameter is sent as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WireType {
    Int,
    BigInt,
    Float,
    Bit,
    NVarChar,
}

impl WireType {
    pub fn infer(param: &SqlParam) -> Self {
        match param {
            SqlParam::Int(v) if i32::try_from(*v).is_ok() => WireType::Int,
            SqlParam::Int(_) => WireType::BigInt,
            SqlParam::Float(_) => WireType::Float,
            SqlParam::Bool(_) => WireType::Bit,
            SqlParam::Text(_) | SqlParam::Null => WireType::NVarChar,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::Int => "int",
            WireType::BigInt => "bigint",
            WireType::Float => "float",
            WireType::Bit => "bit",
            WireType::NVarChar => "nvarchar",
        };
        f.write_str(name)
    }
}

/// One bound parameter of a translated statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterBinding {
    /// Synthetic name as it appears in the statement text, e.g. `@P1`
    pub name: String,
    pub wire_type: WireType,
    pub value: SqlParam,
}

impl ParameterBinding {
    /// Binding for the parameter at zero-based `index`
    pub fn new(index: usize, value: SqlParam) -> Self {
        Self {
            name: format!("@P{}", index + 1),
            wire_type: WireType::infer(&value),
            value,
        }
    }
}
