//! Country-keyed network ranges and the override policy.

use ipnet::IpNet;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Normalize a country code: trimmed and lower-cased.
///
/// Returns `None` for an empty code.
pub fn normalize_code(code: &str) -> Option<String> {
    let code = code.trim().to_lowercase();
    if code.is_empty() {
        None
    } else {
        Some(code)
    }
}

/// Validate a user-supplied country code (two ASCII letters) and normalize it.
pub fn parse_code(code: &str) -> Result<String> {
    let normalized = code.trim().to_lowercase();
    if normalized.len() != 2 || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::Config(format!(
            "invalid country code (must be 2 letters): {}",
            code
        )));
    }
    Ok(normalized)
}

/// Networks grouped by lowercase country code.
///
/// Backed by an ordered map, so every iteration is in ascending code order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountryRangeMap {
    countries: BTreeMap<String, Vec<IpNet>>,
}

impl CountryRangeMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a network to a country's list.
    ///
    /// The code is normalized; an empty code is ignored and `false` returned.
    pub fn push(&mut self, code: &str, network: IpNet) -> bool {
        match normalize_code(code) {
            Some(code) => {
                self.countries.entry(code).or_default().push(network);
                true
            }
            None => false,
        }
    }

    /// Replace a country's whole list, returning the previous one.
    pub fn replace(&mut self, code: &str, networks: Vec<IpNet>) -> Option<Vec<IpNet>> {
        let code = normalize_code(code)?;
        self.countries.insert(code, networks)
    }

    /// Networks for a country.
    pub fn get(&self, code: &str) -> Option<&[IpNet]> {
        self.countries.get(code).map(Vec::as_slice)
    }

    /// Whether the code is present (possibly with an empty list).
    pub fn contains(&self, code: &str) -> bool {
        self.countries.contains_key(code)
    }

    /// Country codes in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.countries.keys().map(String::as_str)
    }

    /// `(code, networks)` pairs in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[IpNet])> {
        self.countries
            .iter()
            .map(|(code, networks)| (code.as_str(), networks.as_slice()))
    }

    /// Number of country codes.
    pub fn len(&self) -> usize {
        self.countries.len()
    }

    /// Whether the map has no codes.
    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    /// Total number of networks across all codes.
    pub fn network_count(&self) -> usize {
        self.countries.values().map(Vec::len).sum()
    }
}

impl<S: AsRef<str>> FromIterator<(S, IpNet)> for CountryRangeMap {
    fn from_iter<I: IntoIterator<Item = (S, IpNet)>>(iter: I) -> Self {
        let mut map = CountryRangeMap::new();
        for (code, network) in iter {
            map.push(code.as_ref(), network);
        }
        map
    }
}

/// Replaces one country's ranges with ranges from a more authoritative source.
///
/// Replacement is total: the decoded ranges for that code are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverridePolicy {
    code: String,
}

impl OverridePolicy {
    /// Create a policy for a country code.
    pub fn new(code: &str) -> Result<Self> {
        Ok(Self {
            code: parse_code(code)?,
        })
    }

    /// The designated country code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Apply the override. An empty replacement still leaves the code present.
    pub fn apply(&self, mut map: CountryRangeMap, replacement: Vec<IpNet>) -> CountryRangeMap {
        let count = replacement.len();
        let previous = map.countries.insert(self.code.clone(), replacement);
        log::info!(
            "override {}: {} networks replaced by {}",
            self.code,
            previous.map(|p| p.len()).unwrap_or(0),
            count
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_push_normalizes_code() {
        let mut map = CountryRangeMap::new();
        assert!(map.push("US", net("1.2.3.0/24")));
        assert!(map.push(" us ", net("1.2.4.0/24")));
        assert!(!map.push("", net("9.9.9.0/24")));

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("us").unwrap().len(), 2);
        assert_eq!(map.network_count(), 2);
    }

    #[test]
    fn test_codes_are_sorted() {
        let map: CountryRangeMap = vec![
            ("us", net("1.0.0.0/24")),
            ("cn", net("2.0.0.0/24")),
            ("jp", net("3.0.0.0/24")),
        ]
        .into_iter()
        .collect();

        let codes: Vec<&str> = map.codes().collect();
        assert_eq!(codes, vec!["cn", "jp", "us"]);
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("CN").unwrap(), "cn");
        assert!(parse_code("").is_err());
        assert!(parse_code("chn").is_err());
        assert!(parse_code("1a").is_err());
    }

    #[test]
    fn test_override_is_total_replacement() {
        let map: CountryRangeMap = vec![
            ("us", net("1.2.3.0/24")),
            ("cn", net("9.9.9.0/24")),
            ("cn", net("8.8.0.0/16")),
        ]
        .into_iter()
        .collect();

        let replacement = vec![net("1.1.1.0/24"), net("2.2.2.0/23")];
        let policy = OverridePolicy::new("cn").unwrap();
        let result = policy.apply(map, replacement.clone());

        assert_eq!(result.get("cn").unwrap(), replacement.as_slice());
        assert_eq!(result.get("us").unwrap(), &[net("1.2.3.0/24")]);
    }

    #[test]
    fn test_override_with_empty_replacement_keeps_key() {
        let map: CountryRangeMap = vec![("cn", net("9.9.9.0/24"))].into_iter().collect();
        let result = OverridePolicy::new("cn").unwrap().apply(map, Vec::new());

        assert!(result.contains("cn"));
        assert!(result.get("cn").unwrap().is_empty());
    }

    #[test]
    fn test_override_adds_missing_code() {
        let map: CountryRangeMap = vec![("us", net("1.2.3.0/24"))].into_iter().collect();
        let result = OverridePolicy::new("cn")
            .unwrap()
            .apply(map, vec![net("1.1.1.0/24")]);

        assert_eq!(result.len(), 2);
        assert_eq!(result.get("cn").unwrap(), &[net("1.1.1.0/24")]);
    }
}
