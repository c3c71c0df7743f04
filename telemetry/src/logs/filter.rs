//! Minimum-level filtering by logger category.

use crate::models::LogLevel;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-category minimum levels.
///
/// Built from the `Logging:LogLevel` section: `Default` sets the fallback and
/// every other key names a category prefix. The longest matching prefix wins.
/// A level of `None` turns a category off entirely.
///
/// # Example
///
/// ```
/// use telemetry::logs::LevelFilter;
/// use telemetry::models::LogLevel;
///
/// let filter = LevelFilter::new(Some(LogLevel::Info))
///     .with_category("api::routes", Some(LogLevel::Debug))
///     .with_category("hyper", None);
///
/// assert!(filter.enabled("api::routes::health", LogLevel::Debug));
/// assert!(!filter.enabled("api::state", LogLevel::Debug));
/// assert!(!filter.enabled("hyper::client", LogLevel::Fatal));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelFilter {
    default: Option<LogLevel>,
    categories: BTreeMap<String, Option<LogLevel>>,
}

impl LevelFilter {
    /// Creates a filter with only a default level.
    #[must_use]
    pub fn new(default: Option<LogLevel>) -> Self {
        Self {
            default,
            categories: BTreeMap::new(),
        }
    }

    /// Adds a category override.
    #[must_use]
    pub fn with_category(mut self, prefix: impl Into<String>, level: Option<LogLevel>) -> Self {
        self.categories
            .insert(prefix.into().to_ascii_lowercase(), level);
        self
    }

    /// Builds a filter from `(category, level)` pairs; `Default` is the fallback.
    ///
    /// # Errors
    ///
    /// Returns the offending pair if a level name is not recognized.
    pub fn from_entries<I>(entries: I) -> Result<Self, (String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut filter = Self::default();
        for (category, value) in entries {
            let level = match parse_level(&value) {
                Ok(level) => level,
                Err(()) => return Err((category, value)),
            };
            if category.eq_ignore_ascii_case("default") {
                filter.default = level;
            } else {
                filter = filter.with_category(category, level);
            }
        }
        Ok(filter)
    }

    /// The fallback minimum level; `None` when logging is off by default.
    #[must_use]
    pub fn default_level(&self) -> Option<LogLevel> {
        self.default
    }

    /// The minimum level for a category, or `None` if it is turned off.
    #[must_use]
    pub fn min_level(&self, category: &str) -> Option<LogLevel> {
        let category = category.to_ascii_lowercase();
        self.categories
            .iter()
            .filter(|(prefix, _)| matches_prefix(&category, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(self.default, |(_, level)| *level)
    }

    /// Whether a record at `level` in `category` passes the filter.
    #[must_use]
    pub fn enabled(&self, category: &str, level: LogLevel) -> bool {
        self.min_level(category).is_some_and(|min| level >= min)
    }
}

impl Default for LevelFilter {
    fn default() -> Self {
        Self::new(Some(LogLevel::Info))
    }
}

fn parse_level(value: &str) -> Result<Option<LogLevel>, ()> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| ())
}

/// `prefix` matches whole category segments, separated by `::` or `.`.
fn matches_prefix(category: &str, prefix: &str) -> bool {
    match category.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with("::") || rest.starts_with('.'),
        None => false,
    }
}
