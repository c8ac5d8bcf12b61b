//! PSD reference data, record values and the provider abstraction

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

/// Attribute ID used when a name is absent from the attribute map.
pub const UNKNOWN_ATTRIBUTE_ID: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commodity {
    #[serde(rename = "commodityName")]
    pub name: String,
    #[serde(rename = "commodityCode")]
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    #[serde(rename = "countryName")]
    pub name: String,
    #[serde(rename = "countryCode")]
    pub code: String,
}

/// Anything that can be picked from a reference list by name or code.
pub trait ReferenceEntry {
    fn name(&self) -> &str;
    fn code(&self) -> &str;
}

impl ReferenceEntry for Commodity {
    fn name(&self) -> &str {
        &self.name
    }

    fn code(&self) -> &str {
        &self.code
    }
}

impl ReferenceEntry for Country {
    fn name(&self) -> &str {
        &self.name
    }

    fn code(&self) -> &str {
        &self.code
    }
}

/// Finds the entry whose name or code matches `query`, ignoring case and
/// surrounding whitespace. On failure the error lists a few close names.
pub fn find_entry<'a, T: ReferenceEntry>(entries: &'a [T], query: &str, kind: &str) -> Result<&'a T> {
    let needle = query.trim().to_lowercase();
    if let Some(entry) = entries
        .iter()
        .find(|e| e.name().trim().to_lowercase() == needle || e.code().trim().to_lowercase() == needle)
    {
        return Ok(entry);
    }

    let suggestions: Vec<&str> = entries
        .iter()
        .map(|e| e.name().trim())
        .filter(|name| !needle.is_empty() && name.to_lowercase().contains(&needle))
        .take(5)
        .collect();

    if suggestions.is_empty() {
        Err(anyhow!("Unknown {kind}: '{query}'"))
    } else {
        Err(anyhow!(
            "Unknown {kind}: '{query}'. Did you mean: {}?",
            suggestions.join(", ")
        ))
    }
}

/// Attribute name to attribute ID lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeMap(HashMap<String, i64>);

impl AttributeMap {
    pub fn id_of(&self, name: &str) -> Option<i64> {
        self.0.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(name, id)| (name.as_str(), *id))
    }
}

impl FromIterator<(String, i64)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Attribute ID to value for one (commodity, country, year) selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordValues(HashMap<i64, f64>);

impl RecordValues {
    pub fn get(&self, attribute_id: i64) -> Option<f64> {
        self.0.get(&attribute_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Later pairs overwrite earlier ones for the same attribute.
impl FromIterator<(i64, f64)> for RecordValues {
    fn from_iter<I: IntoIterator<Item = (i64, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A market year within the range the PSD database reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct MarketYear(u16);

impl MarketYear {
    pub const MIN: u16 = 1990;
    pub const MAX: u16 = 2030;

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl Default for MarketYear {
    fn default() -> Self {
        MarketYear(2020)
    }
}

impl TryFrom<u16> for MarketYear {
    type Error = String;

    fn try_from(year: u16) -> std::result::Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&year) {
            Ok(MarketYear(year))
        } else {
            Err(format!(
                "Market year {year} is outside {}..={}",
                Self::MIN,
                Self::MAX
            ))
        }
    }
}

impl From<MarketYear> for u16 {
    fn from(year: MarketYear) -> u16 {
        year.0
    }
}

impl FromStr for MarketYear {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let year: u16 = s
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid market year: {}", s))?;
        MarketYear::try_from(year).map_err(|e| anyhow!(e))
    }
}

impl Display for MarketYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (commodity, country, year) triple a balance is fetched for.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub commodity: Commodity,
    pub country: Country,
    pub year: MarketYear,
}

impl Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} / {} / {}",
            self.commodity.name.trim(),
            self.country.name.trim(),
            self.year
        )
    }
}

/// Source of PSD reference lists and records.
///
/// Implementations return empty collections, not errors, when the service
/// answers with a failure status or an unreadable body.
#[async_trait]
pub trait PsdProvider: Send + Sync {
    async fn fetch_commodities(&self) -> Result<Vec<Commodity>>;
    async fn fetch_countries(&self) -> Result<Vec<Country>>;
    async fn fetch_attribute_map(&self) -> Result<AttributeMap>;
    async fn fetch_records(
        &self,
        commodity_code: &str,
        country_code: &str,
        year: MarketYear,
    ) -> Result<RecordValues>;
}
