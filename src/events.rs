pub mod filter;
pub mod normalize;
pub mod rapidapi;
pub mod templating;

use super::Result;
use crate::{ApiConfig, EventsConfig};
use async_trait::async_trait;
use filter::{filter_events, EventFilter};
use indexmap::IndexSet;
use normalize::{build_display_events, location, DisplayFormat, Envelope};
use rapidapi::RapidApiClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::sync::Arc;
use tokio::sync::oneshot::{self, Sender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A flat, display-ready event.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct DisplayEvent {
    pub title: String,
    pub description: Option<String>,
    /// Localized event date.
    pub date: Option<String>,
    /// Localized event time.
    pub time: Option<String>,
    pub location: String,
    /// Name of the coin the event is about.
    pub coin: Option<String>,
    pub symbol: Option<String>,
    /// URL of the coin logo.
    pub logo: Option<String>,
    pub price_usd: Option<f64>,
    /// Confidence in the event in percent.
    pub confidence: Option<f64>,
    pub tags: Vec<String>,
    pub category: Option<String>,
}

/// A statically configured event, shown when no live events are available.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct SampleEvent {
    pub title: String,
    pub description: Option<String>,
    /// UNIX timestamp in seconds.
    pub eventtime: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicit category. Defaults to the first tag.
    pub category: Option<String>,
    pub coin: Option<String>,
    pub symbol: Option<String>,
    pub logo: Option<String>,
    pub price_usd: Option<f64>,
    pub confidence: Option<f64>,
}

impl SampleEvent {
    /// Maps the sample through the same date and location derivation as live events.
    pub fn to_display_event(&self, format: &DisplayFormat) -> DisplayEvent {
        DisplayEvent {
            title: self.title.clone(),
            description: self.description.clone(),
            date: self.eventtime.and_then(|secs| format.date(secs)),
            time: self.eventtime.and_then(|secs| format.time(secs)),
            location: location(&self.tags).to_owned(),
            coin: self.coin.clone(),
            symbol: self.symbol.clone(),
            logo: self.logo.clone(),
            price_usd: self.price_usd,
            confidence: self.confidence,
            tags: self.tags.clone(),
            category: self.category.clone().or_else(|| self.tags.first().cloned()),
        }
    }
}

/// Represents sources of events.
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum EventSourceKind {
    /// Never fetch, always show the sample events.
    Static,
    /// Load events from the RapidAPI crypto events calendar.
    RapidApi,
}

/// Trait that needs to be implemented by a source of events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetches the raw response body from the source.
    async fn fetch_events(&self) -> Result<Value>;
}

/// An `EventSource` that always returns the same response body.
pub struct StaticEventSource {
    body: Value,
}

impl StaticEventSource {
    pub fn new(body: Value) -> StaticEventSource {
        StaticEventSource { body }
    }
}

#[async_trait]
impl EventSource for StaticEventSource {
    async fn fetch_events(&self) -> Result<Value> {
        Ok(self.body.clone())
    }
}

#[derive(Debug)]
pub struct RapidApiEventSource {
    client: RapidApiClient,
    page: u32,
    page_size: u32,
}

impl RapidApiEventSource {
    pub fn new(config: &ApiConfig) -> Result<RapidApiEventSource> {
        Ok(RapidApiEventSource {
            client: RapidApiClient::new(config)?,
            page: config.page,
            page_size: config.page_size,
        })
    }
}

#[async_trait]
impl EventSource for RapidApiEventSource {
    async fn fetch_events(&self) -> Result<Value> {
        Ok(self.client.get_events(self.page, self.page_size).await?)
    }
}

#[async_trait]
impl<T> EventSource for Box<T>
where
    T: EventSource + ?Sized,
{
    async fn fetch_events(&self) -> Result<Value> {
        (**self).fetch_events().await
    }
}

#[async_trait]
impl<T> EventSource for Arc<T>
where
    T: EventSource + ?Sized,
{
    async fn fetch_events(&self) -> Result<Value> {
        (**self).fetch_events().await
    }
}

/// Why the sample events are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The source returned an error.
    FetchFailed,
    /// The response had an unexpected shape.
    InvalidResponse,
    /// The response contained no events.
    NoEvents,
    /// No live source is configured.
    NoLiveSource,
}

impl FallbackReason {
    /// Returns the reason as a &str.
    pub fn as_str(&self) -> &str {
        match self {
            FallbackReason::FetchFailed => "fetch-failed",
            FallbackReason::InvalidResponse => "invalid-response",
            FallbackReason::NoEvents => "no-events",
            FallbackReason::NoLiveSource => "no-live-source",
        }
    }
}

/// Where the displayed events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Live,
    Fallback(FallbackReason),
}

impl Origin {
    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            Origin::Live => None,
            Origin::Fallback(reason) => Some(*reason),
        }
    }
}

/// The result of fetching and normalizing events.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub events: Vec<DisplayEvent>,
    pub origin: Origin,
}

/// A filtered snapshot of the events, ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct EventsView {
    pub events: Vec<DisplayEvent>,
    /// `None` while the initial load is still running.
    pub origin: Option<Origin>,
    /// Distinct categories of all loaded events, in order of appearance.
    pub categories: Vec<String>,
}

impl EventsView {
    pub fn loading(&self) -> bool {
        self.origin.is_none()
    }
}

#[derive(Default)]
struct State {
    events: Vec<DisplayEvent>,
    origin: Option<Origin>,
    filtered: Option<(EventFilter, Vec<DisplayEvent>)>,
}

/// The `Events` type wraps an event source with normalization, fallback and filtering.
#[derive(Clone)]
pub struct Events {
    event_source: Option<Arc<dyn EventSource>>,
    samples: Arc<[SampleEvent]>,
    format: Arc<DisplayFormat>,
    search_description: bool,
    state: Arc<Mutex<State>>,
}

impl Events {
    /// Creates new `Events` from an event source.
    pub fn new<T>(event_source: T, samples: Vec<SampleEvent>, format: DisplayFormat) -> Events
    where
        T: EventSource + 'static,
    {
        Events {
            event_source: Some(Arc::new(event_source)),
            samples: samples.into(),
            format: Arc::new(format),
            search_description: false,
            state: Default::default(),
        }
    }

    /// Creates new `Events` that only ever show the samples.
    pub fn samples_only(samples: Vec<SampleEvent>, format: DisplayFormat) -> Events {
        Events {
            event_source: None,
            samples: samples.into(),
            format: Arc::new(format),
            search_description: false,
            state: Default::default(),
        }
    }

    /// Also match search terms against event descriptions.
    pub fn with_description_search(mut self, enabled: bool) -> Events {
        self.search_description = enabled;
        self
    }

    /// Creates new `Events` from configuration.
    pub fn from_config(config: &EventsConfig) -> Result<Events> {
        let format = DisplayFormat::from_config(&config.display)?;
        let samples = config.samples.clone();

        let events = match config.event_source {
            EventSourceKind::Static => Events::samples_only(samples, format),
            EventSourceKind::RapidApi => {
                Events::new(RapidApiEventSource::new(&config.api)?, samples, format)
            }
        };

        Ok(events.with_description_search(config.display.search_description))
    }

    /// Builds a filter from user input, honoring the description search setting.
    pub fn filter(&self, term: Option<&str>, category: Option<&str>) -> EventFilter {
        EventFilter::new(term, category, self.search_description)
    }

    /// The sample events in display form.
    pub fn samples(&self) -> Vec<DisplayEvent> {
        self.samples
            .iter()
            .map(|sample| sample.to_display_event(&self.format))
            .collect()
    }

    /// Fetches and normalizes events, substituting the samples if nothing usable came back.
    /// State is left untouched.
    pub async fn fetch_and_build(&self) -> Loaded {
        let Some(event_source) = &self.event_source else {
            return Loaded {
                events: self.samples(),
                origin: Origin::Fallback(FallbackReason::NoLiveSource),
            };
        };

        let reason = match event_source.fetch_events().await {
            Ok(body) => {
                let envelope = Envelope::from_value(&body);
                log::debug!(
                    "events API response holds {} events",
                    envelope.event_count()
                );

                let events = build_display_events(&envelope, &self.format);

                if !events.is_empty() {
                    log::info!("loaded {} live events", events.len());
                    return Loaded {
                        events,
                        origin: Origin::Live,
                    };
                }

                if envelope.is_valid() {
                    FallbackReason::NoEvents
                } else {
                    log::warn!("events API response has an unexpected shape");
                    FallbackReason::InvalidResponse
                }
            }
            Err(err) => {
                log::error!("failed to fetch events: {err}");
                FallbackReason::FetchFailed
            }
        };

        log::info!(
            "showing {} sample events ({})",
            self.samples.len(),
            reason.as_str()
        );

        Loaded {
            events: self.samples(),
            origin: Origin::Fallback(reason),
        }
    }

    async fn commit(&self, loaded: Loaded) {
        let mut state = self.state.lock().await;
        state.events = loaded.events;
        state.origin = Some(loaded.origin);
        state.filtered = None;
    }

    /// Loads events into the store once.
    pub async fn load_once(&self) -> Origin {
        let loaded = self.fetch_and_build().await;
        let origin = loaded.origin;
        self.commit(loaded).await;
        origin
    }

    /// Starts the initial load in a background task. Returns a `LoadTaskHandle` to cancel it;
    /// dropping the handle cancels the load as well.
    pub fn spawn_load_task(&self) -> LoadTaskHandle {
        let events = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            tokio::select! {
                loaded = events.fetch_and_build() => events.commit(loaded).await,
                _ = &mut stop_rx => log::info!("cancelled loading events"),
            }
        });

        LoadTaskHandle {
            join_handle,
            stop_tx,
        }
    }

    /// Returns the loaded events matching `filter`. The latest result is kept until the filter
    /// or the events change.
    pub async fn view(&self, filter: &EventFilter) -> EventsView {
        let mut state = self.state.lock().await;

        let cached = state
            .filtered
            .as_ref()
            .filter(|(cached, _)| cached == filter)
            .map(|(_, events)| events.clone());

        let events = match cached {
            Some(events) => events,
            None => {
                let events = filter_events(&state.events, filter);
                state.filtered = Some((filter.clone(), events.clone()));
                events
            }
        };

        let categories: IndexSet<&String> = state
            .events
            .iter()
            .filter_map(|event| event.category.as_ref())
            .collect();

        EventsView {
            events,
            origin: state.origin,
            categories: categories.into_iter().cloned().collect(),
        }
    }
}

/// A handle for stopping the initial load task.
pub struct LoadTaskHandle {
    join_handle: JoinHandle<()>,
    stop_tx: Sender<()>,
}

impl LoadTaskHandle {
    /// Cancels the load unless it already finished. A cancelled load never updates the events.
    pub async fn stop(self) -> io::Result<()> {
        if self.stop_tx.send(()).is_ok() {
            self.join_handle.await?;
        }

        Ok(())
    }

    /// Waits for the load to finish.
    pub async fn finished(self) -> io::Result<()> {
        let LoadTaskHandle {
            join_handle,
            stop_tx,
        } = self;

        join_handle.await?;
        drop(stop_tx);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    macro_rules! sample {
        ($title:expr, $time:expr, [$($tag:expr),*]) => {
            SampleEvent {
                title: $title.into(),
                eventtime: Some($time),
                tags: vec![$($tag.into()),*],
                ..Default::default()
            }
        };
    }

    fn samples() -> Vec<SampleEvent> {
        vec![
            sample!("New Listing on Binance", 1759315200, ["Listing"]),
            sample!("Airdrop Event for TokenX", 1759401600, ["Airdrop"]),
        ]
    }

    fn live_body() -> Value {
        json!([{
            "eventlist": [
                { "nativename": "Live Listing", "eventtime": 1759315200, "tagnamelist": ["Listing"] },
                { "nativename": "Live Airdrop", "eventtime": 1759401600, "tagnamelist": ["Airdrop"] }
            ]
        }])
    }

    fn events_from(body: Value) -> Events {
        Events::new(StaticEventSource::new(body), samples(), DisplayFormat::default())
    }

    fn titles(events: &[DisplayEvent]) -> Vec<&str> {
        events.iter().map(|ev| ev.title.as_str()).collect()
    }

    struct Failing;

    #[async_trait]
    impl EventSource for Failing {
        async fn fetch_events(&self) -> Result<Value> {
            Err(Error::Io(io::Error::new(io::ErrorKind::TimedOut, "timed out")))
        }
    }

    #[actix_rt::test]
    async fn live_events() {
        let loaded = events_from(live_body()).fetch_and_build().await;

        assert_eq!(loaded.origin, Origin::Live);
        assert_eq!(titles(&loaded.events), vec!["Live Listing", "Live Airdrop"]);
    }

    #[actix_rt::test]
    async fn fallback_reasons() {
        let expected = events_from(Value::Null).samples();

        for (events, reason) in [
            (events_from(json!([])), FallbackReason::NoEvents),
            (events_from(json!([{ "eventlist": [] }, {}])), FallbackReason::NoEvents),
            (events_from(json!({ "data": { "list": [] } })), FallbackReason::NoEvents),
            (events_from(json!({ "message": "quota exceeded" })), FallbackReason::InvalidResponse),
            (
                Events::new(Failing, samples(), DisplayFormat::default()),
                FallbackReason::FetchFailed,
            ),
        ] {
            let loaded = events.fetch_and_build().await;
            assert_eq!(loaded.origin, Origin::Fallback(reason));
            assert_eq!(loaded.events, expected);
        }
    }

    #[actix_rt::test]
    async fn samples_use_live_derivation() {
        let samples = events_from(Value::Null).samples();

        assert_eq!(samples[0].location, normalize::EXCHANGE_LOCATION);
        assert_eq!(samples[0].date.as_deref(), Some("October 1, 2025"));
        assert_eq!(samples[0].time.as_deref(), Some("10:40"));
        assert_eq!(samples[0].category.as_deref(), Some("Listing"));
        assert_eq!(samples[1].location, normalize::ONLINE_LOCATION);

        let explicit = SampleEvent {
            category: Some("Exchange".into()),
            ..sample!("x", 0, ["Listing"])
        };
        assert_eq!(
            explicit
                .to_display_event(&DisplayFormat::default())
                .category
                .as_deref(),
            Some("Exchange")
        );
    }

    #[actix_rt::test]
    async fn view_before_and_after_load() {
        let events = events_from(live_body());
        let filter = events.filter(Some("airdrop"), None);

        let view = events.view(&filter).await;
        assert!(view.loading());
        assert!(view.events.is_empty());

        assert_eq!(events.load_once().await, Origin::Live);

        // The cached result from before the load must not be reused.
        let view = events.view(&filter).await;
        assert!(!view.loading());
        assert_eq!(titles(&view.events), vec!["Live Airdrop"]);
        assert_eq!(view.categories, vec!["Listing", "Airdrop"]);

        let view = events.view(&events.filter(None, None)).await;
        assert_eq!(view.events.len(), 2);
    }

    #[actix_rt::test]
    async fn category_filter_on_live_events() {
        let events = events_from(live_body());
        events.load_once().await;

        let view = events.view(&events.filter(None, Some("Listing"))).await;
        assert_eq!(titles(&view.events), vec!["Live Listing"]);
    }

    #[actix_rt::test]
    async fn description_search_setting() {
        let body = json!([{ "eventlist": [{ "nativename": "Summit", "description": "Blockchain talks" }] }]);

        let events = events_from(body.clone());
        events.load_once().await;
        assert!(events.view(&events.filter(Some("talks"), None)).await.events.is_empty());

        let events = events_from(body).with_description_search(true);
        events.load_once().await;
        assert_eq!(
            events.view(&events.filter(Some("talks"), None)).await.events.len(),
            1
        );
    }

    #[actix_rt::test]
    async fn load_task() {
        let events = events_from(live_body());

        events.spawn_load_task().finished().await.unwrap();

        let view = events.view(&EventFilter::default()).await;
        assert_eq!(view.origin, Some(Origin::Live));
        assert_eq!(view.events.len(), 2);
    }

    #[actix_rt::test]
    async fn stopped_load_task_does_not_update_events() {
        // An `EventSource` whose fetch never completes. Counts completed fetches.
        struct Hanging {
            started: Notify,
            fetched: AtomicUsize,
        }

        #[async_trait]
        impl EventSource for Hanging {
            async fn fetch_events(&self) -> Result<Value> {
                self.started.notify_one();
                std::future::pending::<()>().await;
                self.fetched.fetch_add(1, Ordering::SeqCst);
                Ok(live_body())
            }
        }

        let source = Arc::new(Hanging {
            started: Notify::new(),
            fetched: AtomicUsize::new(0),
        });
        let events = Events::new(source.clone(), samples(), DisplayFormat::default());

        let handle = events.spawn_load_task();
        source.started.notified().await;

        // Returns once the task has ended.
        handle.stop().await.unwrap();

        assert_eq!(source.fetched.load(Ordering::Relaxed), 0);
        assert!(events.view(&EventFilter::default()).await.loading());
    }

    #[actix_rt::test]
    async fn stopping_a_finished_load_task() {
        let events = events_from(live_body());
        let handle = events.spawn_load_task();

        while events.view(&EventFilter::default()).await.loading() {
            tokio::task::yield_now().await;
        }
        handle.stop().await.unwrap();

        assert_eq!(
            events.view(&EventFilter::default()).await.origin,
            Some(Origin::Live)
        );
    }

    #[test]
    fn static_source_from_config() {
        let config = EventsConfig {
            event_source: EventSourceKind::Static,
            api: ApiConfig::default(),
            display: Default::default(),
            samples: samples(),
        };

        let events = Events::from_config(&config).unwrap();
        assert_eq!(events.samples().len(), 2);
    }

    #[actix_rt::test]
    async fn static_mode_shows_samples_without_fetching() {
        let events = Events::samples_only(samples(), DisplayFormat::default());

        assert_eq!(
            events.load_once().await,
            Origin::Fallback(FallbackReason::NoLiveSource)
        );

        let view = events.view(&EventFilter::default()).await;
        assert_eq!(view.events, events.samples());
        assert_eq!(
            view.origin.and_then(|origin| origin.fallback_reason()),
            Some(FallbackReason::NoLiveSource)
        );
    }

    #[actix_rt::test]
    async fn server_error_falls_back_to_samples() {
        let (base_url, server) =
            rapidapi::test_server::serve_once("500 Internal Server Error", "{}").await;

        let source = RapidApiEventSource::new(&ApiConfig {
            api_key: Some("k".into()),
            base_url: Some(base_url),
            ..Default::default()
        })
        .unwrap();
        let events = Events::new(source, samples(), DisplayFormat::default());

        let loaded = events.fetch_and_build().await;
        assert_eq!(loaded.origin, Origin::Fallback(FallbackReason::FetchFailed));
        assert_eq!(loaded.events, events.samples());

        server.await.unwrap();
    }

    #[test]
    fn rapid_api_source_requires_key() {
        let config = EventsConfig {
            event_source: EventSourceKind::RapidApi,
            api: ApiConfig::default(),
            display: Default::default(),
            samples: Vec::new(),
        };

        assert!(matches!(
            Events::from_config(&config),
            Err(Error::Client(rapidapi::ClientError::MissingApiKey))
        ));
    }
}
