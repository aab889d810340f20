//! Indicator metadata catalog and its in-memory cache.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::Client;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Avg,
    Count,
    Max,
    Min,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Decimal,
    Text,
    Json,
}

/// How an indicator value is meant to be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Decimal,
    Integer,
    Percent,
    Ratio,
    Currency,
    Date,
    Timestamp,
    Time,
    Usage,
    Text,
    #[serde(rename = "")]
    Unformatted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorMetadata {
    pub code: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    pub format: Format,
    #[serde(default)]
    pub coverage: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    pub data_source: String,
    pub computed_date: NaiveDate,
    pub aggregate_fn: Aggregate,
    pub data_type: DataType,
    pub aggregate_weight: String,
    pub factor: f64,
    pub immutable: bool,
    /// Cost of requesting this indicator.
    pub credits: i64,
}

/// Immutable snapshot of the catalog, in server order.
#[derive(Debug, Default)]
struct Catalog {
    entries: Vec<IndicatorMetadata>,
    by_code: HashMap<String, usize>,
}

impl Catalog {
    fn build(list: Vec<IndicatorMetadata>) -> Self {
        let mut catalog = Catalog::default();
        for entry in list {
            // A repeated code replaces the earlier entry in place.
            match catalog.by_code.get(&entry.code) {
                Some(&idx) => catalog.entries[idx] = entry,
                None => {
                    catalog
                        .by_code
                        .insert(entry.code.clone(), catalog.entries.len());
                    catalog.entries.push(entry);
                }
            }
        }
        catalog
    }
}

/// Code-indexed cache of the indicator metadata catalog.
///
/// Filled by one fetch at construction. [`MetadataCache::refresh`] swaps in a
/// whole new snapshot, so concurrent readers see either the old catalog or the
/// new one, never a mix.
#[derive(Debug)]
pub struct MetadataCache {
    client: Client,
    catalog: ArcSwap<Catalog>,
}

impl MetadataCache {
    /// Fetches the catalog; no cache exists if that fails.
    pub fn new(client: Client) -> Result<Self> {
        let catalog = Catalog::build(client.fetch_metadata_catalog()?);
        info!(indicators = catalog.entries.len(), "metadata catalog loaded");
        Ok(Self {
            client,
            catalog: ArcSwap::from_pointee(catalog),
        })
    }

    /// Every cached entry, in the order the server listed them.
    pub fn all(&self) -> Vec<IndicatorMetadata> {
        self.catalog.load().entries.clone()
    }

    /// `None` for codes the catalog does not know.
    pub fn get(&self, code: &str) -> Option<IndicatorMetadata> {
        let catalog = self.catalog.load();
        catalog
            .by_code
            .get(code)
            .map(|&idx| catalog.entries[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.catalog.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-fetches the catalog and replaces the cached one wholesale. On error the
    /// previous catalog stays in place and the error is returned.
    pub fn refresh(&self) -> Result<()> {
        let catalog = Catalog::build(self.client.fetch_metadata_catalog()?);
        info!(indicators = catalog.entries.len(), "metadata catalog refreshed");
        self.catalog.store(Arc::new(catalog));
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{catalog_json, entry};
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::Error;
    use crate::transport::testing::ScriptedTransport;
    use serde_json::Value;

    fn cache_over(t: ScriptedTransport) -> Result<MetadataCache> {
        let config = ClientConfig::resolve(Some("dummy".into()), |_| None).unwrap();
        MetadataCache::new(Client::with_transport(config, Arc::new(t)))
    }

    #[test]
    fn lookup_and_listing() {
        let cache = cache_over(ScriptedTransport::new().respond(200, catalog_json(&["pop", "income"])))
            .unwrap();

        let codes: Vec<_> = cache.all().into_iter().map(|m| m.code).collect();
        assert_eq!(codes, vec!["pop", "income"]);

        let pop = cache.get("pop").unwrap();
        assert_eq!(pop.aggregate_fn, Aggregate::Sum);
        assert_eq!(pop.format, Format::Integer);
        assert_eq!(pop.computed_date, NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
        assert!(cache.get("nope").is_none());
    }

    #[test]
    fn refresh_replaces_everything() {
        let cache = cache_over(
            ScriptedTransport::new()
                .respond(200, catalog_json(&["pop", "income"]))
                .respond(200, catalog_json(&["income", "tourists"])),
        )
        .unwrap();

        cache.refresh().unwrap();

        assert!(cache.get("pop").is_none());
        assert!(cache.get("tourists").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_refresh_keeps_previous_catalog() {
        let cache = cache_over(
            ScriptedTransport::new()
                .respond(200, catalog_json(&["pop"]))
                .respond(503, "maintenance"),
        )
        .unwrap();

        let err = cache.refresh().unwrap_err();
        assert!(matches!(err, Error::UnknownApi { status: 503, .. }));
        assert!(cache.get("pop").is_some());
    }

    #[test]
    fn failed_construction_yields_no_cache() {
        let result = cache_over(ScriptedTransport::new().respond(500, "{}"));
        assert!(matches!(result, Err(Error::UnknownApi { .. })));
    }

    #[test]
    fn duplicate_codes_keep_last_value() {
        let mut second = entry("pop");
        second["name"] = Value::from("Population v2");
        let body = Value::Array(vec![entry("pop"), entry("income"), second]).to_string();

        let cache = cache_over(ScriptedTransport::new().respond(200, body)).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.all()[0].name, "Population v2");
    }

    #[test]
    fn empty_format_is_unformatted() {
        let mut raw = entry("pop");
        raw["format"] = Value::from("");
        let meta: IndicatorMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.format, Format::Unformatted);
    }
}
