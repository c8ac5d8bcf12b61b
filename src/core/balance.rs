//! Fetch-resolve-compute cycle for one balance selection.
use crate::core::metrics::{Adjustments, BalanceSheet, MetricSet};
use crate::core::psd::{
    AttributeMap, Commodity, Country, MarketYear, PsdProvider, Selection, find_entry,
};
use anyhow::{Context, Result, bail};
use futures::future::try_join3;
use tracing::{debug, info};

/// What the user asked for, before names are resolved to codes.
#[derive(Debug, Clone)]
pub struct BalanceRequest {
    pub commodity: String,
    pub country: String,
    pub year: MarketYear,
    pub adjustments: Adjustments,
}

/// The three reference lists, fetched together.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub commodities: Vec<Commodity>,
    pub countries: Vec<Country>,
    pub attributes: AttributeMap,
}

impl ReferenceData {
    pub async fn fetch(provider: &(dyn PsdProvider + Send + Sync)) -> Result<Self> {
        let (commodities, countries, attributes) = try_join3(
            provider.fetch_commodities(),
            provider.fetch_countries(),
            provider.fetch_attribute_map(),
        )
        .await
        .context("Failed to fetch reference data")?;

        debug!(
            commodities = commodities.len(),
            countries = countries.len(),
            attributes = attributes.len(),
            "Reference data loaded"
        );
        Ok(ReferenceData {
            commodities,
            countries,
            attributes,
        })
    }

    /// Maps user-typed names (or codes) to a selection.
    pub fn select(&self, commodity: &str, country: &str, year: MarketYear) -> Result<Selection> {
        if self.commodities.is_empty() {
            bail!("No commodities available from the PSD service");
        }
        if self.countries.is_empty() {
            bail!("No countries available from the PSD service");
        }
        Ok(Selection {
            commodity: find_entry(&self.commodities, commodity, "commodity")?.clone(),
            country: find_entry(&self.countries, country, "country")?.clone(),
            year,
        })
    }
}

/// Fetched inputs for a selection, before any adjustment.
#[derive(Debug, Clone)]
pub struct FetchedBalance {
    pub selection: Selection,
    pub inputs: MetricSet,
}

impl FetchedBalance {
    pub fn into_sheet(self, adjustments: &Adjustments) -> Result<BalanceSheet> {
        let inputs = self.inputs.adjusted(adjustments)?;
        Ok(BalanceSheet::new(self.selection, inputs))
    }
}

/// Fetches and resolves the inputs for the requested selection. `None` when
/// the service has no records for it. Invalid adjustments fail before any
/// request is made.
pub async fn fetch_balance(
    provider: &(dyn PsdProvider + Send + Sync),
    request: &BalanceRequest,
) -> Result<Option<FetchedBalance>> {
    request.adjustments.validate()?;
    let reference = ReferenceData::fetch(provider).await?;
    let selection = reference.select(&request.commodity, &request.country, request.year)?;
    info!(
        commodity = %selection.commodity.code,
        country = %selection.country.code,
        year = %selection.year,
        "Fetching balance"
    );

    let records = provider
        .fetch_records(
            &selection.commodity.code,
            &selection.country.code,
            selection.year,
        )
        .await?;
    if records.is_empty() {
        info!("No records for {}", selection);
        return Ok(None);
    }

    let inputs = MetricSet::resolve(&reference.attributes, &records);
    Ok(Some(FetchedBalance { selection, inputs }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::{MetricValue, MissingReason};
    use crate::core::psd::RecordValues;
    use async_trait::async_trait;

    struct FixedProvider {
        records: RecordValues,
    }

    #[async_trait]
    impl PsdProvider for FixedProvider {
        async fn fetch_commodities(&self) -> Result<Vec<Commodity>> {
            Ok(vec![Commodity {
                name: "Wheat".to_string(),
                code: "0410000".to_string(),
            }])
        }

        async fn fetch_countries(&self) -> Result<Vec<Country>> {
            Ok(vec![Country {
                name: "Australia".to_string(),
                code: "AS".to_string(),
            }])
        }

        async fn fetch_attribute_map(&self) -> Result<AttributeMap> {
            Ok(vec![
                ("Beginning Stocks".to_string(), 20),
                ("Production".to_string(), 28),
                ("Imports".to_string(), 57),
                ("Feed Dom. Consumption".to_string(), 149),
                ("Exports".to_string(), 88),
            ]
            .into_iter()
            .collect())
        }

        async fn fetch_records(
            &self,
            commodity_code: &str,
            country_code: &str,
            _year: MarketYear,
        ) -> Result<RecordValues> {
            assert_eq!(commodity_code, "0410000");
            assert_eq!(country_code, "AS");
            Ok(self.records.clone())
        }
    }

    fn request(commodity: &str) -> BalanceRequest {
        BalanceRequest {
            commodity: commodity.to_string(),
            country: "australia".to_string(),
            year: MarketYear::default(),
            adjustments: Adjustments::default(),
        }
    }

    async fn balance_sheet(
        provider: &FixedProvider,
        request: &BalanceRequest,
    ) -> Result<Option<BalanceSheet>> {
        match fetch_balance(provider, request).await? {
            Some(fetched) => Ok(Some(fetched.into_sheet(&request.adjustments)?)),
            None => Ok(None),
        }
    }

    #[tokio::test]
    async fn test_fetch_balance_into_sheet() {
        let provider = FixedProvider {
            records: vec![(20, 100.0), (28, 50.0), (57, 10.0), (149, 20.0), (88, 30.0)]
                .into_iter()
                .collect(),
        };

        let sheet = balance_sheet(&provider, &request("Wheat"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sheet.selection.country.code, "AS");
        // FSI Consumption is not in the attribute map
        assert_eq!(
            sheet.inputs.fsi_consumption,
            MetricValue::Missing(MissingReason::UnknownAttribute)
        );
        assert_eq!(sheet.derived.total_supply, 160.0);
        assert_eq!(sheet.derived.domestic_consumption, 20.0);
        assert_eq!(sheet.derived.ending_stocks, 110.0);
    }

    #[tokio::test]
    async fn test_adjustments_are_applied() {
        let provider = FixedProvider {
            records: vec![(20, 100.0), (28, 50.0)].into_iter().collect(),
        };
        let mut req = request("0410000");
        req.adjustments.exports = Some(40.0);

        let sheet = balance_sheet(&provider, &req).await.unwrap().unwrap();

        assert_eq!(sheet.derived.total_use, 40.0);
        assert_eq!(sheet.derived.ending_stocks, 110.0);
    }

    #[tokio::test]
    async fn test_no_records_yields_none() {
        let provider = FixedProvider {
            records: RecordValues::default(),
        };

        let result = balance_sheet(&provider, &request("Wheat")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_commodity_is_an_error() {
        let provider = FixedProvider {
            records: RecordValues::default(),
        };

        let err = balance_sheet(&provider, &request("Barley"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown commodity: 'Barley'");
    }

    #[tokio::test]
    async fn test_invalid_adjustment_is_rejected_before_fetching() {
        let provider = FixedProvider {
            records: RecordValues::default(),
        };
        let mut req = request("Wheat");
        req.adjustments.production = Some(2_000_000.0);

        // Without records this would be Ok(None) if the check came later
        let err = fetch_balance(&provider, &req).await.unwrap_err();
        assert!(err.to_string().starts_with("Production must be between 0 and"));
    }
}
