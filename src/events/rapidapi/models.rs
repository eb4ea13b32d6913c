use serde::Deserialize;

/// Deserializers for numbers that the API sometimes sends as strings.
mod lenient {
    use serde::{de::Error, Deserialize, Deserializer};
    use serde_json::Value;

    fn number<'de, D>(deserializer: D) -> Result<Option<serde_json::Number>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(Some(n)),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<serde_json::Number>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("`{s}` is not a number"))),
            Some(other) => Err(D::Error::custom(format!("expected a number, got {other}"))),
        }
    }

    pub fn integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match number(deserializer)? {
            None => Ok(None),
            Some(n) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("`{n}` is not an integer"))),
        }
    }

    pub fn float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(number(deserializer)?.and_then(|n| n.as_f64()))
    }
}

/// A single event as returned by the crypto events calendar API.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct RawEvent {
    pub nativename: Option<String>,
    pub description: Option<String>,
    /// UNIX timestamp in seconds.
    #[serde(default, deserialize_with = "lenient::integer")]
    pub eventtime: Option<i64>,
    #[serde(default)]
    pub tagnamelist: Option<Vec<String>>,
    pub coinname: Option<String>,
    pub coinsymbol: Option<String>,
    pub coinlogo: Option<String>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub price_usd: Option<f64>,
    /// Confidence in percent.
    #[serde(default, deserialize_with = "lenient::float")]
    pub confidence: Option<f64>,
}

impl RawEvent {
    /// The event tags, empty if the API omitted them.
    pub fn tags(&self) -> &[String] {
        self.tagnamelist.as_deref().unwrap_or_default()
    }
}
