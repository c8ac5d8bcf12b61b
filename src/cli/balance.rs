use super::ui;
use crate::core::balance::{BalanceRequest, fetch_balance};
use crate::core::export;
use crate::core::metrics::{
    Adjustments, BalanceSheet, InputField, MAX_ADJUSTMENT, MetricSet, MetricValue, RowKind,
};
use crate::core::psd::{MarketYear, PsdProvider};
use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color};
use console::Term;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

pub const NO_DATA_WARNING: &str =
    "No data available for the selected Commodity, Country, and Year.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
}

#[derive(Debug, Clone)]
pub struct BalanceOptions {
    pub commodity: String,
    pub country: String,
    /// Falls back to the configured market year.
    pub year: Option<MarketYear>,
    pub adjustments: Adjustments,
    pub interactive: bool,
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
}

impl BalanceOptions {
    pub fn request(&self, default_year: MarketYear) -> BalanceRequest {
        BalanceRequest {
            commodity: self.commodity.clone(),
            country: self.country.clone(),
            year: self.year.unwrap_or(default_year),
            adjustments: self.adjustments,
        }
    }
}

impl BalanceSheet {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Metric"),
            ui::header_cell("Value"),
            ui::header_cell("Source"),
        ]);

        for row in self.rows() {
            let (value, source) = match row.kind {
                RowKind::Derived => (
                    ui::total_cell(row.value),
                    ui::source_cell("derived", Color::DarkGrey),
                ),
                RowKind::Input(field) => (
                    ui::amount_cell(row.value),
                    input_source_cell(self.inputs.get(field)),
                ),
            };
            let label = match row.kind {
                RowKind::Derived => Cell::new(row.metric).add_attribute(comfy_table::Attribute::Bold),
                RowKind::Input(_) => Cell::new(row.metric),
            };
            table.add_row(vec![label, value, source]);
        }

        let mut output = format!(
            "Supply & Demand: {}\n\n",
            ui::style_text(&self.selection.to_string(), ui::StyleType::Title)
        );
        output.push_str(&table.to_string());

        let ending_style = if self.derived.ending_stocks < 0.0 {
            ui::StyleType::Error
        } else {
            ui::StyleType::TotalValue
        };
        output.push_str(&format!(
            "\n\n{}: {}",
            ui::style_text("Ending Stocks", ui::StyleType::TotalLabel),
            ui::style_text(&ui::format_amount(self.derived.ending_stocks), ending_style)
        ));
        output
    }
}

fn input_source_cell(value: MetricValue) -> Cell {
    match value {
        MetricValue::Reported(_) => ui::source_cell("reported", Color::Reset),
        MetricValue::Adjusted {
            reported: Some(r), ..
        } => ui::source_cell(&format!("adjusted (was {})", ui::format_amount(r)), Color::Yellow),
        MetricValue::Adjusted { reported: None, .. } => ui::source_cell("adjusted", Color::Yellow),
        MetricValue::Missing(reason) => ui::source_cell(&format!("missing ({reason})"), Color::Red),
    }
}

/// One line per missing input, or `None` when every input was found.
pub fn missing_summary(inputs: &MetricSet) -> Option<String> {
    let missing = inputs.missing_fields();
    if missing.is_empty() {
        return None;
    }
    let fields: Vec<String> = missing
        .iter()
        .map(|(field, reason)| format!("{field} ({reason})"))
        .collect();
    Some(format!(
        "Treated as 0 because no value was found: {}",
        fields.join(", ")
    ))
}

/// Parses one line of interactive input. Blank keeps the current value.
pub fn parse_adjustment(field: InputField, input: &str) -> Result<Option<f64>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    let value: f64 = strip_thousands_separators(input)
        .and_then(|plain| plain.parse().ok())
        .with_context(|| format!("{field}: '{input}' is not a number"))?;
    let mut probe = Adjustments::default();
    probe.set(field, value)?;
    Ok(Some(value))
}

/// Drops commas that group the integer part in threes, e.g. `1,250.5`.
/// `None` when a comma appears anywhere else.
fn strip_thousands_separators(input: &str) -> Option<String> {
    if !input.contains(',') {
        return Some(input.to_string());
    }
    let (integer, fraction) = match input.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (input, None),
    };
    if fraction.is_some_and(|f| f.contains(',')) {
        return None;
    }

    let digits = integer.strip_prefix(['-', '+']).unwrap_or(integer);
    let mut groups = digits.split(',');
    let leading = groups.next()?;
    if leading.is_empty() || leading.len() > 3 || !groups.all(|g| g.len() == 3) {
        return None;
    }

    let mut plain = integer.replace(',', "");
    if let Some(fraction) = fraction {
        plain.push('.');
        plain.push_str(fraction);
    }
    Some(plain)
}

/// Asks for each editable input that has no adjustment yet.
fn prompt_adjustments(inputs: &MetricSet, adjustments: &mut Adjustments) -> Result<()> {
    let term = Term::stdout();
    if !term.is_term() {
        bail!("--interactive needs a terminal on stdout");
    }
    term.write_line(&ui::style_text(
        &format!("Adjust values (0 to {MAX_ADJUSTMENT}); press Enter to keep the current value."),
        ui::StyleType::Subtle,
    ))?;
    term.write_line(&format!(
        "Beginning Stocks: {} (carried over, not editable)",
        ui::format_amount(inputs.beginning_stocks.amount())
    ))?;

    for field in InputField::EDITABLE {
        if adjustments.get(field).is_some() {
            continue;
        }
        let current = inputs.get(field).amount();
        loop {
            term.write_str(&format!("{field} [{}]: ", ui::format_amount(current)))?;
            let line = term.read_line()?;
            match parse_adjustment(field, &line) {
                Ok(Some(value)) => {
                    adjustments.set(field, value)?;
                    break;
                }
                Ok(None) => break,
                Err(e) => term.write_line(&ui::style_text(&e.to_string(), ui::StyleType::Error))?,
            }
        }
    }
    Ok(())
}

pub async fn run(
    provider: &(dyn PsdProvider + Send + Sync),
    options: &BalanceOptions,
    default_year: MarketYear,
) -> Result<()> {
    run_with_output(
        provider,
        options,
        default_year,
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .await
}

/// Writes the balance (table or CSV) to `out` and warnings to `err`.
pub async fn run_with_output<O: Write, E: Write>(
    provider: &(dyn PsdProvider + Send + Sync),
    options: &BalanceOptions,
    default_year: MarketYear,
    out: &mut O,
    err: &mut E,
) -> Result<()> {
    let request = options.request(default_year);

    let pb = ui::new_spinner("Fetching PSD data...");
    let fetched = fetch_balance(provider, &request).await;
    pb.finish_and_clear();

    let Some(fetched) = fetched? else {
        writeln!(err, "{}", ui::warning_line(NO_DATA_WARNING))?;
        return Ok(());
    };

    let mut adjustments = request.adjustments;
    if options.interactive {
        prompt_adjustments(&fetched.inputs, &mut adjustments)?;
    }
    let sheet = fetched.into_sheet(&adjustments)?;
    debug!(derived = ?sheet.derived, "Computed balance");

    match options.format {
        OutputFormat::Table => writeln!(out, "{}", sheet.display_as_table())?,
        OutputFormat::Csv => export::write_csv(&sheet, &mut *out)?,
    }
    if let Some(summary) = missing_summary(&sheet.inputs) {
        writeln!(err, "{}", ui::warning_line(&summary))?;
    }

    if let Some(path) = &options.output {
        let written = export::export_to_path(&sheet, path)?;
        if options.format == OutputFormat::Table {
            writeln!(
                out,
                "\n{}",
                ui::style_text(
                    &format!("Saved CSV to {}", written.display()),
                    ui::StyleType::Subtle
                )
            )?;
        }
    }
    Ok(())
}
