use super::DisplayEvent;
use minijinja::value::{StructObject, Value};

impl StructObject for DisplayEvent {
    fn get_field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "title" => Value::from(self.title.clone()),
            "description" => Value::from(self.description.clone()?),
            "date" => Value::from(self.date.clone()?),
            "time" => Value::from(self.time.clone()?),
            "location" => Value::from(self.location.clone()),
            "coin" => Value::from(self.coin.clone()?),
            "symbol" => Value::from(self.symbol.clone()?),
            "logo" => Value::from(self.logo.clone()?),
            "category" => Value::from(self.category.clone()?),
            "tags" => Value::from(self.tags.clone()),
            "price_usd" => Value::from(self.price_usd?),
            "confidence" => Value::from(self.confidence?),
            "coin_label" => {
                let coin = self.coin.as_deref()?;

                match self.symbol.as_deref() {
                    Some(symbol) => Value::from(format!("{coin} ({symbol})")),
                    None => Value::from(coin),
                }
            }
            "price" => Value::from(format!("${:.4} USD", self.price_usd?)),
            "confidence_label" => Value::from(format!("{}%", self.confidence?)),
            _ => return None,
        };

        Some(value)
    }
}

/// Converts events into template values.
pub fn to_values(events: Vec<DisplayEvent>) -> Vec<Value> {
    events.into_iter().map(Value::from_struct_object).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> DisplayEvent {
        DisplayEvent {
            title: "New Listing on Binance".into(),
            date: Some("October 1, 2025".into()),
            time: Some("10:40".into()),
            location: "Online (Crypto Exchange)".into(),
            coin: Some("CryptoCoin".into()),
            symbol: Some("CCN".into()),
            price_usd: Some(1.25),
            confidence: Some(92.0),
            ..Default::default()
        }
    }

    fn field(event: &DisplayEvent, name: &str) -> Option<String> {
        event.get_field(name).map(|value| value.to_string())
    }

    #[test]
    fn plain_fields() {
        let event = event();

        assert_eq!(field(&event, "title").as_deref(), Some("New Listing on Binance"));
        assert_eq!(field(&event, "date").as_deref(), Some("October 1, 2025"));
        assert_eq!(field(&event, "location").as_deref(), Some("Online (Crypto Exchange)"));
        assert_eq!(field(&event, "description"), None);
        assert_eq!(field(&event, "logo"), None);
        assert_eq!(field(&event, "unknown"), None);
    }

    #[test]
    fn derived_fields() {
        let event = event();

        assert_eq!(field(&event, "coin_label").as_deref(), Some("CryptoCoin (CCN)"));
        assert_eq!(field(&event, "price").as_deref(), Some("$1.2500 USD"));
        assert_eq!(field(&event, "confidence_label").as_deref(), Some("92%"));

        let bare = DisplayEvent {
            symbol: None,
            price_usd: None,
            ..event
        };
        assert_eq!(field(&bare, "coin_label").as_deref(), Some("CryptoCoin"));
        assert_eq!(field(&bare, "price"), None);
    }

    #[test]
    fn render_in_template() {
        let env = minijinja::Environment::new();
        let rendered = env
            .render_str(
                "{% for e in events %}{{ e.title }}: {{ e.price }}{% endfor %}",
                minijinja::context! { events => to_values(vec![event()]) },
            )
            .unwrap();

        assert_eq!(rendered, "New Listing on Binance: $1.2500 USD");
    }

    #[test]
    fn category_link_is_url_encoded() {
        let event = DisplayEvent {
            category: Some("DeFi & NFT".into()),
            ..event()
        };

        let rendered = minijinja::Environment::new()
            .render_str(
                "/?category={{ e.category|urlencode }}",
                minijinja::context! { e => Value::from_struct_object(event) },
            )
            .unwrap();

        assert_eq!(rendered, "/?category=DeFi%20%26%20NFT");
    }
}
