//! Cache of server option values

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{CacheOptions, JsonCodec, TtlCache};
use crate::convert::EntityAccess;
use crate::refresher::RefreshTarget;

/// Data type of an option, from its numeric type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OptionType {
    Byte,
    Short,
    Long,
    Float,
    Double,
    String,
    DateTime,
    Date,
    Memo,
    Html,
    Boolean,
}

impl OptionType {
    /// Type for a numeric code; unknown codes read as string
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Byte,
            2 => Self::Short,
            3 => Self::Long,
            4 => Self::Float,
            5 => Self::Double,
            7 => Self::DateTime,
            10 => Self::Date,
            12 => Self::Memo,
            13 => Self::Html,
            15 => Self::Boolean,
            _ => Self::String,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Byte => 1,
            Self::Short => 2,
            Self::Long => 3,
            Self::Float => 4,
            Self::Double => 5,
            Self::String => 6,
            Self::DateTime => 7,
            Self::Date => 10,
            Self::Memo => 12,
            Self::Html => 13,
            Self::Boolean => 15,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Short | Self::Long | Self::Float | Self::Double
        )
    }

    /// Attribute of an `xtk:option` entity holding a value of this type
    fn storage_attribute(&self) -> &'static str {
        match self {
            Self::Byte | Self::Short | Self::Long | Self::Boolean => "longValue",
            Self::Float | Self::Double => "doubleValue",
            Self::DateTime => "timeStampValue",
            Self::Date => "dateValue",
            Self::String => "stringValue",
            Self::Memo | Self::Html => "memo",
        }
    }
}

/// An option value as returned by the server, with typed access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionValue {
    pub raw: String,
    pub data_type: OptionType,
}

impl OptionValue {
    pub fn new(raw: impl Into<String>, data_type: OptionType) -> Self {
        Self {
            raw: raw.into(),
            data_type,
        }
    }

    /// Read an option from an `xtk:option` entity in any representation
    ///
    /// The value lives in the attribute matching `dataType`; memo values
    /// live in a `memo` child element.
    pub fn from_entity<'a>(entity: &impl EntityAccess<'a>) -> Self {
        let data_type = OptionType::from_code(entity.get_attribute_as_long("dataType"));
        let field = data_type.storage_attribute();
        let raw = match entity.attribute(field) {
            Some(value) => value.into_owned(),
            None => entity
                .get_element(field)
                .and_then(|element| element.text().map(|t| t.into_owned()))
                .unwrap_or_default(),
        };
        Self { raw, data_type }
    }

    pub fn as_string(&self) -> &str {
        &self.raw
    }

    pub fn as_long(&self) -> Option<i64> {
        let raw = self.raw.trim();
        raw.parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|f| f as i64))
    }

    pub fn as_double(&self) -> Option<f64> {
        self.raw.trim().parse().ok()
    }

    /// `true` or a non-zero number
    pub fn as_boolean(&self) -> bool {
        let raw = self.raw.trim();
        raw.eq_ignore_ascii_case("true") || raw.parse::<f64>().is_ok_and(|n| n != 0.0)
    }

    /// Timestamp in RFC 3339 / ISO 8601 form, or a bare date at midnight UTC
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        let raw = self.raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(dt.and_utc());
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }
}

/// Option values keyed by option name
pub struct OptionCache {
    cache: TtlCache<OptionValue>,
}

impl OptionCache {
    pub fn new(options: &CacheOptions) -> Self {
        Self {
            cache: TtlCache::new("OptionCache", Arc::new(JsonCodec), options),
        }
    }

    pub async fn get(&self, name: &str) -> Option<OptionValue> {
        self.cache.get(&[name]).await
    }

    /// Raw value only
    pub async fn get_raw(&self, name: &str) -> Option<String> {
        self.get(name).await.map(|value| value.raw)
    }

    pub async fn put(&self, name: &str, value: OptionValue) {
        self.cache.put(&[name], value).await;
    }

    /// Cache a `(value, type code)` pair as returned by the server
    pub async fn put_raw(&self, name: &str, raw: impl Into<String>, type_code: i64) -> OptionValue {
        let value = OptionValue::new(raw, OptionType::from_code(type_code));
        self.put(name, value.clone()).await;
        value
    }

    pub async fn remove(&self, name: &str) {
        self.cache.remove(name).await;
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    pub fn inner(&self) -> &TtlCache<OptionValue> {
        &self.cache
    }
}

#[async_trait]
impl RefreshTarget for OptionCache {
    fn cache_name(&self) -> &str {
        self.cache.name()
    }

    async fn clear(&self) {
        OptionCache::clear(self).await;
    }

    async fn remove_entity(&self, _schema: &str, pk: &str) {
        self.remove(pk).await;
    }
}
