//! Turns raw API responses into [`DisplayEvent`]s.

use super::rapidapi::models::RawEvent;
use super::DisplayEvent;
use crate::{DisplayConfig, Error, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{Locale, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;

/// Location of events tagged as exchange listings.
pub const EXCHANGE_LOCATION: &str = "Online (Crypto Exchange)";
/// Location of every other event.
pub const ONLINE_LOCATION: &str = "Online";

const LISTING_TAG: &str = "Listing";

/// Derives the display location from the event tags.
pub fn location(tags: &[String]) -> &'static str {
    if tags.iter().any(|tag| tag == LISTING_TAG) {
        EXCHANGE_LOCATION
    } else {
        ONLINE_LOCATION
    }
}

/// One exchange entry of a response, bundling the events announced by that exchange.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Exchange {
    pub events: Vec<RawEvent>,
}

impl Exchange {
    /// Reads the `eventlist` of an exchange entry. A missing list yields no events and events
    /// that fail to decode are skipped.
    fn from_value(entry: &Value) -> Exchange {
        let Some(list) = entry.get("eventlist").and_then(Value::as_array) else {
            log::debug!("exchange entry without an event list");
            return Exchange::default();
        };

        let events = list
            .iter()
            .filter_map(|event| match RawEvent::deserialize(event) {
                Ok(event) => Some(event),
                Err(err) => {
                    log::warn!("skipping malformed event: {err}");
                    None
                }
            })
            .collect();

        Exchange { events }
    }
}

/// A validated API response.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// The response is a list of exchange entries.
    Exchanges(Vec<Exchange>),
    /// The response wraps the list of exchange entries as `{"data": {"list": [...]}}`.
    Wrapped(Vec<Exchange>),
    /// The response has neither shape.
    Invalid,
}

impl Envelope {
    /// Classifies a decoded response body.
    pub fn from_value(value: &Value) -> Envelope {
        fn exchanges(list: &[Value]) -> Vec<Exchange> {
            list.iter().map(Exchange::from_value).collect()
        }

        if let Some(list) = value.as_array() {
            return Envelope::Exchanges(exchanges(list));
        }

        match value.pointer("/data/list").and_then(Value::as_array) {
            Some(list) => Envelope::Wrapped(exchanges(list)),
            None => Envelope::Invalid,
        }
    }

    /// The exchange entries of either shape. Empty for invalid responses.
    pub fn exchanges(&self) -> &[Exchange] {
        match self {
            Envelope::Exchanges(exchanges) | Envelope::Wrapped(exchanges) => exchanges,
            Envelope::Invalid => &[],
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Envelope::Invalid)
    }

    /// Total number of events across all exchanges.
    pub fn event_count(&self) -> usize {
        self.exchanges().iter().map(|ex| ex.events.len()).sum()
    }
}

/// Validated display settings.
#[derive(Debug, Clone)]
pub struct DisplayFormat {
    timezone: Tz,
    locale: Locale,
    date_format: String,
    time_format: Option<String>,
}

impl DisplayFormat {
    /// Validates the display configuration. Unknown timezones or locales and malformed format
    /// strings are rejected here instead of failing while rendering.
    pub fn from_config(config: &DisplayConfig) -> Result<DisplayFormat> {
        let timezone = config
            .timezone
            .parse::<Tz>()
            .map_err(|_| Error::InvalidTimezone(config.timezone.clone()))?;

        let locale = Locale::try_from(config.locale.as_str())
            .map_err(|_| Error::InvalidLocale(config.locale.clone()))?;

        let date_format = validate_format(&config.date_format)?;
        let time_format = match config.include_time {
            true => Some(validate_format(&config.time_format)?),
            false => None,
        };

        Ok(DisplayFormat {
            timezone,
            locale,
            date_format,
            time_format,
        })
    }

    fn format(&self, secs: i64, fmt: &str) -> Option<String> {
        let datetime = Utc.timestamp_opt(secs, 0).single()?;

        Some(
            datetime
                .with_timezone(&self.timezone)
                .format_localized(fmt, self.locale)
                .to_string(),
        )
    }

    /// Formats the date of a UNIX timestamp.
    pub fn date(&self, secs: i64) -> Option<String> {
        self.format(secs, &self.date_format)
    }

    /// Formats the time of a UNIX timestamp, if times are displayed.
    pub fn time(&self, secs: i64) -> Option<String> {
        self.format(secs, self.time_format.as_deref()?)
    }
}

impl Default for DisplayFormat {
    fn default() -> Self {
        DisplayFormat {
            timezone: Tz::UTC,
            locale: Locale::en_US,
            date_format: "%B %-d, %Y".into(),
            time_format: Some("%H:%M".into()),
        }
    }
}

fn validate_format(fmt: &str) -> Result<String> {
    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return Err(Error::InvalidFormat(fmt.to_owned()));
    }

    Ok(fmt.to_owned())
}

impl DisplayEvent {
    /// Maps a raw API event.
    pub fn from_raw(event: &RawEvent, format: &DisplayFormat) -> DisplayEvent {
        let tags = event.tags().to_vec();

        DisplayEvent {
            title: event.nativename.clone().unwrap_or_default(),
            description: event.description.clone(),
            date: event.eventtime.and_then(|secs| format.date(secs)),
            time: event.eventtime.and_then(|secs| format.time(secs)),
            location: location(&tags).to_owned(),
            coin: event.coinname.clone(),
            symbol: event.coinsymbol.clone(),
            logo: event.coinlogo.clone(),
            price_usd: event.price_usd,
            confidence: event.confidence,
            category: tags.first().cloned(),
            tags,
        }
    }
}

/// Flattens all events of an envelope, in exchange order and then event order.
pub fn build_display_events(envelope: &Envelope, format: &DisplayFormat) -> Vec<DisplayEvent> {
    envelope
        .exchanges()
        .iter()
        .flat_map(|exchange| exchange.events.iter())
        .map(|event| DisplayEvent::from_raw(event, format))
        .collect()
}
