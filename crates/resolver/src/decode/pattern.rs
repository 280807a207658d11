use std::fmt;
use std::ops::Deref;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A regex that is compiled once when a provider profile is loaded.
///
/// Patterns are built with `.` matching newlines, since embed pages put the
/// interesting payload anywhere in a multi-line script.
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        RegexBuilder::new(pattern)
            .dot_matches_new_line(true)
            .build()
            .map(Self)
    }

    /// Returns the `payload` named group, else group 1, else the whole match.
    /// Other named groups are returned alongside so callers can keep them.
    pub fn capture<'h>(&self, haystack: &'h str) -> Option<(&'h str, Vec<(String, String)>)> {
        let caps = self.0.captures(haystack)?;
        let payload = caps
            .name("payload")
            .or_else(|| caps.get(1))
            .or_else(|| caps.get(0))?
            .as_str();
        let named = self
            .0
            .capture_names()
            .flatten()
            .filter(|name| *name != "payload")
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();
        Some((payload, named))
    }
}

impl Deref for Pattern {
    type Target = Regex;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.0.as_str())
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pattern::new(&raw).map_err(serde::de::Error::custom)
    }
}
