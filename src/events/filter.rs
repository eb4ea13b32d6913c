use super::DisplayEvent;

/// Selects the subset of events shown on the page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Search term, matched case-insensitively as a substring.
    pub term: String,
    /// Keep only events of this category.
    pub category: Option<String>,
    /// Match the search term against descriptions too.
    pub include_description: bool,
}

impl EventFilter {
    /// Creates a filter from raw query input. The term is kept as entered, a blank category is
    /// treated as absent.
    pub fn new(term: Option<&str>, category: Option<&str>, include_description: bool) -> Self {
        EventFilter {
            term: term.unwrap_or_default().to_owned(),
            category: category
                .map(str::trim)
                .filter(|category| !category.is_empty())
                .map(ToOwned::to_owned),
            include_description,
        }
    }

    /// Whether this filter lets every event through.
    pub fn is_empty(&self) -> bool {
        self.term.is_empty() && self.category.is_none()
    }

    pub fn matches(&self, event: &DisplayEvent) -> bool {
        self.matches_term(event) && self.matches_category(event)
    }

    fn matches_term(&self, event: &DisplayEvent) -> bool {
        if self.term.is_empty() {
            return true;
        }

        let term = self.term.to_lowercase();
        let contains = |text: &str| text.to_lowercase().contains(&term);

        if contains(&event.title) {
            return true;
        }

        self.include_description && event.description.as_deref().is_some_and(|d| contains(d))
    }

    fn matches_category(&self, event: &DisplayEvent) -> bool {
        match (&self.category, &event.category) {
            (None, _) => true,
            (Some(wanted), Some(category)) => wanted.eq_ignore_ascii_case(category),
            (Some(_), None) => false,
        }
    }
}

/// Returns the events matching `filter`, in their original order.
pub fn filter_events(events: &[DisplayEvent], filter: &EventFilter) -> Vec<DisplayEvent> {
    if filter.is_empty() {
        return events.to_vec();
    }

    events
        .iter()
        .filter(|event| filter.matches(event))
        .cloned()
        .collect()
}
