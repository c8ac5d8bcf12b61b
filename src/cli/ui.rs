use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Defines different styles for text elements.
pub enum StyleType {
    Title,
    TotalLabel,
    TotalValue,
    Warning,
    Error,
    Subtle,
}

/// Applies a consistent style to a string.
pub fn style_text(text: &str, style_type: StyleType) -> String {
    let styled = match style_type {
        StyleType::Title => style(text).bold().underlined(),
        StyleType::TotalLabel => style(text).bold(),
        StyleType::TotalValue => style(text).green().bold(),
        StyleType::Warning => style(text).yellow().bold(),
        StyleType::Error => style(text).red(),
        StyleType::Subtle => style(text).dim(),
    };
    styled.to_string()
}

/// Creates a new `comfy_table::Table` with standard styling.
pub fn new_styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Creates a styled header cell for a table.
pub fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

pub fn format_amount(value: f64) -> String {
    format!("{value:.2}")
}

/// Right aligned amount; negatives in red.
pub fn amount_cell(value: f64) -> Cell {
    let cell = Cell::new(format_amount(value)).set_alignment(CellAlignment::Right);
    if value < 0.0 {
        cell.fg(Color::Red)
    } else {
        cell
    }
}

/// Bold amount for derived totals.
pub fn total_cell(value: f64) -> Cell {
    let color = if value < 0.0 { Color::Red } else { Color::Green };
    Cell::new(format_amount(value))
        .add_attribute(Attribute::Bold)
        .fg(color)
        .set_alignment(CellAlignment::Right)
}

/// Cell describing where a value came from.
pub fn source_cell(text: &str, color: Color) -> Cell {
    Cell::new(text).fg(color)
}

/// Spinner shown while waiting on the PSD service. Draws to stderr and
/// stays hidden when that is not a terminal.
pub fn new_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let spinner_style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg} [{elapsed_precise}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(spinner_style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn warning_line(message: &str) -> String {
    format!("{} {}", style_text("Warning:", StyleType::Warning), message)
}

/// Warnings go to stderr so they never mix with CSV on stdout.
pub fn print_warning(message: &str) {
    eprintln!("{}", warning_line(message));
}
