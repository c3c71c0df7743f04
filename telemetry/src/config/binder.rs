//! Typed lookups over a [`ConfigSource`] section.

use super::source::{normalize_key, ConfigSource};
use crate::error::ConfigError;
use std::str::FromStr;

/// A view over one configuration section (`Logging:CloudWatch`, ...).
pub(crate) struct Section<'a> {
    source: &'a dyn ConfigSource,
    path: String,
}

impl<'a> Section<'a> {
    /// The root section.
    pub(crate) fn root(source: &'a dyn ConfigSource) -> Self {
        Self {
            source,
            path: String::new(),
        }
    }

    /// A child section.
    pub(crate) fn section(&self, name: &str) -> Section<'a> {
        Section {
            source: self.source,
            path: self.key(name),
        }
    }

    /// The first of the named child sections that has any configured key,
    /// falling back to the first name.
    pub(crate) fn first_present(&self, names: &[&str]) -> Section<'a> {
        names
            .iter()
            .map(|name| self.section(name))
            .find(Section::exists)
            .unwrap_or_else(|| self.section(names[0]))
    }

    /// Whether any key is configured under this section.
    pub(crate) fn exists(&self) -> bool {
        let prefix = format!("{}:", normalize_key(&self.path));
        self.source
            .keys()
            .iter()
            .any(|key| normalize_key(key).starts_with(&prefix))
    }

    /// The fully-qualified key for a child.
    pub(crate) fn key(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}:{name}", self.path)
        }
    }

    /// A raw value; blank values count as absent.
    pub(crate) fn get(&self, name: &str) -> Option<String> {
        self.source
            .get(&self.key(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn string_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    pub(crate) fn bool_or(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ConfigError::invalid(self.key(name), raw, "expected true or false")),
            },
        }
    }

    pub(crate) fn parse_or<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(self.key(name), raw, e.to_string())),
        }
    }

    /// A list value, written either comma-separated (`"a, b"`) or indexed
    /// (`Name:0`, `Name:1`, as produced by JSON arrays).
    pub(crate) fn list(&self, name: &str) -> Vec<String> {
        if let Some(raw) = self.get(name) {
            return raw
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        let mut indexed: Vec<(usize, String)> = self
            .section(name)
            .children()
            .into_iter()
            .filter_map(|(child, value)| child.parse().ok().map(|index| (index, value)))
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, value)| value).collect()
    }

    /// Direct children of this section that hold a value, as (name, value).
    ///
    /// Child names may contain `::` (Rust module paths used as log categories).
    pub(crate) fn children(&self) -> Vec<(String, String)> {
        let prefix_len = self.path.len() + 1;
        let prefix = format!("{}:", normalize_key(&self.path));

        self.source
            .keys()
            .into_iter()
            .filter(|key| normalize_key(key).starts_with(&prefix))
            .filter_map(|key| {
                let child = key.get(prefix_len..)?.to_string();
                if child.replace("::", "").contains(':') {
                    return None;
                }
                let value = self.source.get(&key)?;
                Some((child, value.trim().to_string()))
            })
            .collect()
    }
}
