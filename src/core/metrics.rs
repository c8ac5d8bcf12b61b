//! Resolves the six balance inputs from fetched records and computes the
//! derived supply and demand totals.
use crate::core::psd::{AttributeMap, RecordValues, Selection, UNKNOWN_ATTRIBUTE_ID};
use anyhow::{Result, bail};
use std::fmt::Display;
use tracing::debug;

/// Largest value accepted for an adjusted input.
pub const MAX_ADJUSTMENT: f64 = 1_000_000.0;

/// The six inputs of a supply and demand balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputField {
    BeginningStocks,
    Production,
    Imports,
    FeedDomConsumption,
    FsiConsumption,
    Exports,
}

impl InputField {
    pub const ALL: [InputField; 6] = [
        InputField::BeginningStocks,
        InputField::Production,
        InputField::Imports,
        InputField::FeedDomConsumption,
        InputField::FsiConsumption,
        InputField::Exports,
    ];

    /// Fields a user may adjust. Beginning stocks are carried over from the
    /// previous year and always come from the fetched record.
    pub const EDITABLE: [InputField; 5] = [
        InputField::Production,
        InputField::Imports,
        InputField::FeedDomConsumption,
        InputField::FsiConsumption,
        InputField::Exports,
    ];

    /// Name of the attribute in the PSD attribute list.
    pub fn attribute_name(&self) -> &'static str {
        match self {
            InputField::BeginningStocks => "Beginning Stocks",
            InputField::Production => "Production",
            InputField::Imports => "Imports",
            InputField::FeedDomConsumption => "Feed Dom. Consumption",
            InputField::FsiConsumption => "FSI Consumption",
            InputField::Exports => "Exports",
        }
    }

    /// Row label used in tables and exports.
    pub fn label(&self) -> &'static str {
        match self {
            InputField::FeedDomConsumption => "Feed Domestic Consumption",
            other => other.attribute_name(),
        }
    }
}

impl Display for InputField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// The attribute name is not in the attribute map.
    UnknownAttribute,
    /// The attribute is known but the record has no value for it.
    NotReported,
}

impl Display for MissingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingReason::UnknownAttribute => write!(f, "unknown attribute"),
            MissingReason::NotReported => write!(f, "not reported"),
        }
    }
}

/// State of a single balance input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Reported(f64),
    Adjusted { value: f64, reported: Option<f64> },
    Missing(MissingReason),
}

impl MetricValue {
    /// Value used in arithmetic. Missing inputs count as zero.
    pub fn amount(&self) -> f64 {
        match self {
            MetricValue::Reported(v) => *v,
            MetricValue::Adjusted { value, .. } => *value,
            MetricValue::Missing(_) => 0.0,
        }
    }

    /// Value as fetched, before any adjustment.
    pub fn reported(&self) -> Option<f64> {
        match self {
            MetricValue::Reported(v) => Some(*v),
            MetricValue::Adjusted { reported, .. } => *reported,
            MetricValue::Missing(_) => None,
        }
    }

    fn adjust(self, value: f64) -> Self {
        MetricValue::Adjusted {
            value,
            reported: self.reported(),
        }
    }
}

/// Looks up one attribute by name, then its value in the record.
pub fn resolve_value(name: &str, attributes: &AttributeMap, records: &RecordValues) -> MetricValue {
    let attribute_id = attributes.id_of(name).unwrap_or(UNKNOWN_ATTRIBUTE_ID);
    if attribute_id == UNKNOWN_ATTRIBUTE_ID {
        debug!(attribute = name, "Attribute not in attribute map");
        return MetricValue::Missing(MissingReason::UnknownAttribute);
    }
    match records.get(attribute_id) {
        Some(v) => MetricValue::Reported(v),
        None => {
            debug!(attribute = name, attribute_id, "No value reported");
            MetricValue::Missing(MissingReason::NotReported)
        }
    }
}

/// User overrides for the editable inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Adjustments {
    pub production: Option<f64>,
    pub imports: Option<f64>,
    pub feed_dom_consumption: Option<f64>,
    pub fsi_consumption: Option<f64>,
    pub exports: Option<f64>,
}

impl Adjustments {
    pub fn get(&self, field: InputField) -> Option<f64> {
        match field {
            InputField::BeginningStocks => None,
            InputField::Production => self.production,
            InputField::Imports => self.imports,
            InputField::FeedDomConsumption => self.feed_dom_consumption,
            InputField::FsiConsumption => self.fsi_consumption,
            InputField::Exports => self.exports,
        }
    }

    /// Sets an override, checking it is a finite value in `0..=MAX_ADJUSTMENT`.
    pub fn set(&mut self, field: InputField, value: f64) -> Result<()> {
        validate_adjustment(field, value)?;
        let slot = match field {
            InputField::BeginningStocks => bail!("{field} is not editable"),
            InputField::Production => &mut self.production,
            InputField::Imports => &mut self.imports,
            InputField::FeedDomConsumption => &mut self.feed_dom_consumption,
            InputField::FsiConsumption => &mut self.fsi_consumption,
            InputField::Exports => &mut self.exports,
        };
        *slot = Some(value);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for field in InputField::EDITABLE {
            if let Some(value) = self.get(field) {
                validate_adjustment(field, value)?;
            }
        }
        Ok(())
    }
}

fn validate_adjustment(field: InputField, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=MAX_ADJUSTMENT).contains(&value) {
        bail!("{field} must be between 0 and {MAX_ADJUSTMENT}, got {value}");
    }
    Ok(())
}

/// The six balance inputs for one selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSet {
    pub beginning_stocks: MetricValue,
    pub production: MetricValue,
    pub imports: MetricValue,
    pub feed_dom_consumption: MetricValue,
    pub fsi_consumption: MetricValue,
    pub exports: MetricValue,
}

impl MetricSet {
    /// Resolves all six inputs. Never fails; gaps are flagged as missing.
    pub fn resolve(attributes: &AttributeMap, records: &RecordValues) -> Self {
        let value = |field: InputField| resolve_value(field.attribute_name(), attributes, records);
        MetricSet {
            beginning_stocks: value(InputField::BeginningStocks),
            production: value(InputField::Production),
            imports: value(InputField::Imports),
            feed_dom_consumption: value(InputField::FeedDomConsumption),
            fsi_consumption: value(InputField::FsiConsumption),
            exports: value(InputField::Exports),
        }
    }

    /// Builds a fully reported set from plain numbers.
    pub fn from_amounts(
        beginning_stocks: f64,
        production: f64,
        imports: f64,
        feed_dom_consumption: f64,
        fsi_consumption: f64,
        exports: f64,
    ) -> Self {
        MetricSet {
            beginning_stocks: MetricValue::Reported(beginning_stocks),
            production: MetricValue::Reported(production),
            imports: MetricValue::Reported(imports),
            feed_dom_consumption: MetricValue::Reported(feed_dom_consumption),
            fsi_consumption: MetricValue::Reported(fsi_consumption),
            exports: MetricValue::Reported(exports),
        }
    }

    pub fn get(&self, field: InputField) -> MetricValue {
        match field {
            InputField::BeginningStocks => self.beginning_stocks,
            InputField::Production => self.production,
            InputField::Imports => self.imports,
            InputField::FeedDomConsumption => self.feed_dom_consumption,
            InputField::FsiConsumption => self.fsi_consumption,
            InputField::Exports => self.exports,
        }
    }

    /// Returns a copy with the given overrides applied.
    pub fn adjusted(&self, adjustments: &Adjustments) -> Result<Self> {
        adjustments.validate()?;
        let apply = |field: InputField, current: MetricValue| match adjustments.get(field) {
            Some(v) => current.adjust(v),
            None => current,
        };
        Ok(MetricSet {
            beginning_stocks: self.beginning_stocks,
            production: apply(InputField::Production, self.production),
            imports: apply(InputField::Imports, self.imports),
            feed_dom_consumption: apply(InputField::FeedDomConsumption, self.feed_dom_consumption),
            fsi_consumption: apply(InputField::FsiConsumption, self.fsi_consumption),
            exports: apply(InputField::Exports, self.exports),
        })
    }

    pub fn missing_fields(&self) -> Vec<(InputField, MissingReason)> {
        InputField::ALL
            .iter()
            .filter_map(|field| match self.get(*field) {
                MetricValue::Missing(reason) => Some((*field, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn derived(&self) -> DerivedMetrics {
        DerivedMetrics::compute(self)
    }
}

/// Totals derived from a `MetricSet`. Always recomputed, never edited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedMetrics {
    pub total_supply: f64,
    pub domestic_consumption: f64,
    pub total_use: f64,
    pub ending_stocks: f64,
}

impl DerivedMetrics {
    pub fn compute(inputs: &MetricSet) -> Self {
        let total_supply = inputs.beginning_stocks.amount()
            + inputs.production.amount()
            + inputs.imports.amount();
        let domestic_consumption =
            inputs.feed_dom_consumption.amount() + inputs.fsi_consumption.amount();
        let total_use = domestic_consumption + inputs.exports.amount();
        let ending_stocks = total_supply - total_use;

        DerivedMetrics {
            total_supply,
            domestic_consumption,
            total_use,
            ending_stocks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Input(InputField),
    Derived,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRow {
    pub metric: &'static str,
    pub value: f64,
    pub kind: RowKind,
}

/// A selection together with its inputs and derived totals.
#[derive(Debug, Clone)]
pub struct BalanceSheet {
    pub selection: Selection,
    pub inputs: MetricSet,
    pub derived: DerivedMetrics,
}

impl BalanceSheet {
    pub fn new(selection: Selection, inputs: MetricSet) -> Self {
        let derived = inputs.derived();
        BalanceSheet {
            selection,
            inputs,
            derived,
        }
    }

    /// Ten rows in the fixed display and export order.
    pub fn rows(&self) -> Vec<BalanceRow> {
        let input = |field: InputField| BalanceRow {
            metric: field.label(),
            value: self.inputs.get(field).amount(),
            kind: RowKind::Input(field),
        };
        let derived = |metric: &'static str, value: f64| BalanceRow {
            metric,
            value,
            kind: RowKind::Derived,
        };

        vec![
            input(InputField::BeginningStocks),
            input(InputField::Production),
            input(InputField::Imports),
            derived("Total Supply", self.derived.total_supply),
            input(InputField::FeedDomConsumption),
            input(InputField::FsiConsumption),
            derived("Domestic Consumption", self.derived.domestic_consumption),
            input(InputField::Exports),
            derived("Total Use", self.derived.total_use),
            derived("Ending Stocks", self.derived.ending_stocks),
        ]
    }
}
