//! Tag requests and result records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

pub const QUALITY_GOOD: &str = "Good";

/// Value carried by a write request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagValue {
    Word(u16),
    /// Written to consecutive addresses starting at the tag name.
    Words(Vec<u16>),
}

impl From<u16> for TagValue {
    fn from(v: u16) -> Self {
        Self::Word(v)
    }
}

impl From<Vec<u16>> for TagValue {
    fn from(v: Vec<u16>) -> Self {
        Self::Words(v)
    }
}

/// One logical tag in a `read` or `write` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagRequest {
    pub name: String,
    /// Words to read starting at `name`; `None` or 1 reads a single word.
    pub count: Option<usize>,
    pub value: Option<TagValue>,
}

impl TagRequest {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: None,
            value: None,
        }
    }

    /// `count` contiguous words starting at `name`.
    #[must_use]
    pub fn array(name: impl Into<String>, count: usize) -> Self {
        Self::new(name).with_count(count)
    }

    #[must_use]
    pub fn write(name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self::new(name).with_value(value)
    }

    #[must_use]
    pub const fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<TagValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// True when this request expands into more than one word.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.count.is_some_and(|c| c > 1)
    }
}

/// What a tag operation produced. A result holds exactly one of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TagOutcome {
    Value(u16),
    Values(Vec<u16>),
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagResult {
    pub name: String,
    #[serde(flatten)]
    pub outcome: TagOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    pub time_stamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_millis")]
    pub time_taken: Duration,
    /// Elementary records behind an array write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TagResult>>,
}

impl TagResult {
    #[must_use]
    pub fn value(name: impl Into<String>, value: u16, quality: Option<String>, time_taken: Duration) -> Self {
        Self {
            name: name.into(),
            outcome: TagOutcome::Value(value),
            count: None,
            quality: Some(quality.unwrap_or_else(|| QUALITY_GOOD.to_string())),
            time_stamp: Utc::now(),
            time_taken,
            results: None,
        }
    }

    #[must_use]
    pub fn values(name: impl Into<String>, values: Vec<u16>, time_taken: Duration) -> Self {
        Self {
            name: name.into(),
            count: Some(values.len()),
            outcome: TagOutcome::Values(values),
            quality: Some(QUALITY_GOOD.to_string()),
            time_stamp: Utc::now(),
            time_taken,
            results: None,
        }
    }

    #[must_use]
    pub fn error(name: impl Into<String>, message: impl Into<String>, time_taken: Duration) -> Self {
        Self {
            name: name.into(),
            outcome: TagOutcome::Error(message.into()),
            count: None,
            quality: None,
            time_stamp: Utc::now(),
            time_taken,
            results: None,
        }
    }

    #[must_use]
    pub fn with_results(mut self, results: Vec<Self>) -> Self {
        self.results = Some(results);
        self
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        !matches!(self.outcome, TagOutcome::Error(_))
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            TagOutcome::Error(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub const fn single_value(&self) -> Option<u16> {
        match self.outcome {
            TagOutcome::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn word_values(&self) -> Option<&[u16]> {
        match &self.outcome {
            TagOutcome::Values(v) => Some(v),
            _ => None,
        }
    }
}

/// Envelope for `read` / `write`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// True when no entry carries an error.
    pub success: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub time_taken: Duration,
    /// One entry per tag name, in request order. Serialized as an object
    /// keyed by name.
    #[serde(serialize_with = "serialize_by_name")]
    pub results: Vec<TagResult>,
}

impl BatchResponse {
    #[must_use]
    pub fn new(results: Vec<TagResult>, time_taken: Duration) -> Self {
        Self {
            success: results.iter().all(TagResult::is_ok),
            time_taken,
            results,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TagResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Tag names in request order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.results.iter().map(|r| r.name.as_str())
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Result of a string read or write.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StringResponse {
    pub address: String,
    pub text: String,
    pub word_count: usize,
    pub quality: String,
    pub time_stamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_millis")]
    pub time_taken: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TagResult>>,
}

impl StringResponse {
    #[must_use]
    pub fn new(address: impl Into<String>, text: String, word_count: usize, time_taken: Duration) -> Self {
        Self {
            address: address.into(),
            text,
            word_count,
            quality: QUALITY_GOOD.to_string(),
            time_stamp: Utc::now(),
            time_taken,
            results: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Add `result`, replacing an earlier entry with the same name in place.
pub(crate) fn upsert(results: &mut Vec<TagResult>, result: TagResult) {
    match results.iter_mut().find(|r| r.name == result.name) {
        Some(slot) => *slot = result,
        None => results.push(result),
    }
}

fn serialize_by_name<S: Serializer>(results: &[TagResult], s: S) -> Result<S::Ok, S::Error> {
    let mut map = s.serialize_map(Some(results.len()))?;
    for r in results {
        map.serialize_entry(&r.name, r)?;
    }
    map.end()
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_record_shape() {
        let r = TagResult::value("D3022", 42, None, Duration::from_millis(12));
        let v = serde_json::to_value(&r).expect("serialize");
        assert_eq!(v["name"], json!("D3022"));
        assert_eq!(v["value"], json!(42));
        assert_eq!(v["quality"], json!("Good"));
        assert_eq!(v["timeTaken"], json!(12));
        assert!(v.get("error").is_none());
        assert!(v["timeStamp"].is_string());
    }

    #[test]
    fn error_record_has_no_value() {
        let r = TagResult::error("D1", "device busy", Duration::ZERO);
        let v = serde_json::to_value(&r).expect("serialize");
        assert_eq!(v["error"], json!("device busy"));
        assert!(v.get("value").is_none());
        assert!(v.get("values").is_none());
        assert!(v.get("quality").is_none());
        assert!(v["timeStamp"].is_string());
    }

    #[test]
    fn array_record_carries_count() {
        let r = TagResult::values("D100", vec![1, 2, 3], Duration::from_millis(3));
        let v = serde_json::to_value(&r).expect("serialize");
        assert_eq!(v["values"], json!([1, 2, 3]));
        assert_eq!(v["count"], json!(3));
        assert_eq!(r.word_values(), Some(&[1u16, 2, 3][..]));
    }

    #[test]
    fn envelope_success_reflects_entries() {
        let mut m = vec![TagResult::value("D1", 1, None, Duration::ZERO)];
        assert!(BatchResponse::new(m.clone(), Duration::ZERO).success);
        m.push(TagResult::error("D2", "x", Duration::ZERO));
        let env = BatchResponse::new(m, Duration::from_millis(5));
        assert!(!env.success);
        let v = env.to_json().expect("json");
        assert_eq!(v["timeTaken"], json!(5));
        assert_eq!(v["results"]["D2"]["error"], json!("x"));
    }

    #[test]
    fn envelope_keeps_request_order() {
        let mut results = Vec::new();
        upsert(&mut results, TagResult::value("D200", 2, None, Duration::ZERO));
        upsert(&mut results, TagResult::value("D100", 1, None, Duration::ZERO));
        upsert(&mut results, TagResult::value("D200", 3, None, Duration::ZERO));
        let env = BatchResponse::new(results, Duration::ZERO);
        assert_eq!(env.names().collect::<Vec<_>>(), ["D200", "D100"]);
        assert_eq!(env.get("D200").and_then(TagResult::single_value), Some(3));

        let text = serde_json::to_string(&env).expect("serialize");
        let (a, b) = (text.find("\"D200\"").expect("D200"), text.find("\"D100\"").expect("D100"));
        assert!(a < b, "{text}");
        let keys: Vec<String> = env.to_json().expect("json")["results"]
            .as_object()
            .expect("object")
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, ["D200", "D100"]);
    }

    #[test]
    fn request_builders() {
        assert!(TagRequest::array("D100", 3).is_array());
        assert!(!TagRequest::array("D100", 1).is_array());
        assert_eq!(
            TagRequest::write("D1", vec![1u16, 2]).value,
            Some(TagValue::Words(vec![1, 2]))
        );
    }
}
