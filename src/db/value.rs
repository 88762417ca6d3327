//! Cell and parameter values.
//!
//! Result columns are decoded by their PostgreSQL type into [`Value`], and
//! parameters are encoded to whatever type the server inferred for each
//! placeholder, so text typed on the command line can be bound to an
//! `int4`, `uuid` or `timestamptz` parameter alike.
//!
//! Domains are unwrapped to their base type in both directions. Enum
//! labels travel as text. Anything without a dedicated decoder comes back
//! as text when it is printable and as raw bytes otherwise.

use std::error::Error;
use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact decimal, scale included.
    Numeric(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

/// Column names plus positionally aligned rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` in the column called `column`.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(Value::to_json))
                    .collect()
            })
            .collect()
    }
}

#[derive(Error, Debug)]
#[error("failed to decode column '{column}': {message}")]
pub struct DecodeError {
    pub column: String,
    pub message: String,
}

/// Decode every column of `row`.
pub fn decode_row(row: &Row) -> Result<Vec<Value>, DecodeError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let fail = |message: String| DecodeError {
                column: column.name().to_string(),
                message,
            };
            let raw: RawCell<'_> = row.try_get(idx).map_err(|e| fail(e.to_string()))?;
            Value::decode(column.type_(), raw.0).map_err(|e| fail(e.to_string()))
        })
        .collect()
}

/// Borrowed wire bytes of one cell, accepted for every column type.
struct RawCell<'a>(Option<&'a [u8]>);

impl<'a> FromSql<'a> for RawCell<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(RawCell(Some(raw)))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(RawCell(None))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn base_type(ty: &Type) -> &Type {
    match ty.kind() {
        Kind::Domain(inner) => base_type(inner),
        _ => ty,
    }
}

fn is_text_type(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

impl Value {
    /// Decode one cell from its binary wire representation.
    pub fn decode(ty: &Type, raw: Option<&[u8]>) -> Result<Value, BoxError> {
        let Some(raw) = raw else {
            return Ok(Value::Null);
        };
        let ty = base_type(ty);

        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => Value::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => Value::Int(i64::from_sql(ty, raw)?),
            Type::OID => Value::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => Value::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => Value::Numeric(Decimal::from_sql(ty, raw)?),
            Type::CHAR => Value::Text(char::from(i8::from_sql(ty, raw)? as u8).to_string()),
            Type::JSON | Type::JSONB => Value::Json(serde_json::Value::from_sql(ty, raw)?),
            Type::UUID => Value::Uuid(Uuid::from_sql(ty, raw)?),
            Type::DATE => Value::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => Value::Time(NaiveTime::from_sql(ty, raw)?),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Value::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::BYTEA => Value::Bytes(raw.to_vec()),
            _ if is_text_type(ty) => Value::Text(String::from_sql(ty, raw)?),
            _ if matches!(ty.kind(), Kind::Enum(_)) => {
                Value::Text(String::from_utf8_lossy(raw).into_owned())
            }
            _ => match std::str::from_utf8(raw) {
                Ok(s) if s.chars().all(|c| !c.is_control() || c.is_whitespace()) => {
                    Value::Text(s.to_string())
                }
                _ => Value::Bytes(raw.to_vec()),
            },
        };
        Ok(value)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value as an owned string, `None` for NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// SQL-literal-looking rendering used in error diagnostics and logs.
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Numeric(_) => {
                self.to_string()
            }
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(f.to_string())),
            Value::Json(v) => v.clone(),
            other => serde_json::Value::String(other.to_string()),
        }
    }

    fn as_bool(&self) -> Result<bool, BoxError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
                "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
                other => Err(format!("invalid boolean: {other:?}").into()),
            },
            other => Err(mismatch(other, "boolean")),
        }
    }

    fn as_i64(&self) -> Result<i64, BoxError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            Value::Numeric(d) => Ok(d.normalize().to_string().parse::<i64>()?),
            Value::Text(s) => Ok(s.trim().parse::<i64>()?),
            other => Err(mismatch(other, "integer")),
        }
    }

    fn as_f64(&self) -> Result<f64, BoxError> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Numeric(d) => Ok(d.to_string().parse::<f64>()?),
            Value::Text(s) => Ok(s.trim().parse::<f64>()?),
            other => Err(mismatch(other, "float")),
        }
    }

    fn as_decimal(&self) -> Result<Decimal, BoxError> {
        match self {
            Value::Numeric(d) => Ok(*d),
            Value::Int(i) => Ok(Decimal::from(*i)),
            Value::Float(f) => Ok(Decimal::try_from(*f)?),
            Value::Text(s) => Ok(Decimal::from_str(s.trim())?),
            other => Err(mismatch(other, "numeric")),
        }
    }

    fn as_json(&self) -> Result<serde_json::Value, BoxError> {
        match self {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => Ok(serde_json::from_str(s)?),
            other => Ok(other.to_json()),
        }
    }

    fn as_uuid(&self) -> Result<Uuid, BoxError> {
        match self {
            Value::Uuid(u) => Ok(*u),
            Value::Text(s) => Ok(Uuid::parse_str(s.trim())?),
            other => Err(mismatch(other, "uuid")),
        }
    }

    fn as_date(&self) -> Result<NaiveDate, BoxError> {
        match self {
            Value::Date(d) => Ok(*d),
            Value::Timestamp(ts) => Ok(ts.date()),
            Value::Text(s) => Ok(NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?),
            other => Err(mismatch(other, "date")),
        }
    }

    fn as_time(&self) -> Result<NaiveTime, BoxError> {
        match self {
            Value::Time(t) => Ok(*t),
            Value::Text(s) => Ok(NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")?),
            other => Err(mismatch(other, "time")),
        }
    }

    fn as_timestamp(&self) -> Result<NaiveDateTime, BoxError> {
        match self {
            Value::Timestamp(ts) => Ok(*ts),
            Value::TimestampTz(ts) => Ok(ts.naive_utc()),
            Value::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
            Value::Text(s) => parse_naive_timestamp(s.trim()),
            other => Err(mismatch(other, "timestamp")),
        }
    }

    fn as_timestamptz(&self) -> Result<DateTime<Utc>, BoxError> {
        match self {
            Value::TimestampTz(ts) => Ok(*ts),
            Value::Text(s) => match DateTime::parse_from_rfc3339(s.trim()) {
                Ok(ts) => Ok(ts.with_timezone(&Utc)),
                Err(_) => Ok(parse_naive_timestamp(s.trim())?.and_utc()),
            },
            other => Ok(other.as_timestamp()?.and_utc()),
        }
    }

    fn as_bytes(&self) -> Result<Vec<u8>, BoxError> {
        match self {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => match s.strip_prefix("\\x") {
                Some(hex) => decode_hex(hex),
                None => Ok(s.as_bytes().to_vec()),
            },
            other => Err(mismatch(other, "bytea")),
        }
    }
}

fn mismatch(value: &Value, target: &str) -> BoxError {
    format!("cannot convert {} to {target}", value.to_literal()).into()
}

fn parse_naive_timestamp(s: &str) -> Result<NaiveDateTime, BoxError> {
    const FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(format!("invalid timestamp: {s:?}").into())
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, BoxError> {
    if !hex.is_ascii() {
        return Err(format!("invalid hex string: {hex:?}").into());
    }
    if hex.len() % 2 != 0 {
        return Err("hex string has an odd number of digits".into());
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| Ok(u8::from_str_radix(std::str::from_utf8(pair)?, 16)?))
        .collect()
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        let ty = base_type(ty);

        match *ty {
            Type::BOOL => self.as_bool()?.to_sql(ty, out),
            Type::INT2 => i16::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT8 => self.as_i64()?.to_sql(ty, out),
            Type::OID => u32::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::FLOAT4 => (self.as_f64()? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.as_f64()?.to_sql(ty, out),
            Type::NUMERIC => self.as_decimal()?.to_sql(ty, out),
            Type::JSON | Type::JSONB => self.as_json()?.to_sql(ty, out),
            Type::UUID => self.as_uuid()?.to_sql(ty, out),
            Type::DATE => self.as_date()?.to_sql(ty, out),
            Type::TIME => self.as_time()?.to_sql(ty, out),
            Type::TIMESTAMP => self.as_timestamp()?.to_sql(ty, out),
            Type::TIMESTAMPTZ => self.as_timestamptz()?.to_sql(ty, out),
            Type::BYTEA => self.as_bytes()?.to_sql(ty, out),
            _ if is_text_type(ty) => self.to_string().to_sql(ty, out),
            _ if matches!(ty.kind(), Kind::Enum(_)) => {
                out.put_slice(self.to_string().as_bytes());
                Ok(IsNull::No)
            }
            _ => Err(format!(
                "cannot bind a parameter of type {}; cast the placeholder, e.g. $1::text",
                ty.name()
            )
            .into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Numeric(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(bytes) => {
                write!(f, "\\x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Json(v) => write!(f, "{v}"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::Timestamp(ts) => write!(f, "{ts}"),
            Value::TimestampTz(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
