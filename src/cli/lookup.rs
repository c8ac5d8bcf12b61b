use super::ui;
use crate::core::psd::{AttributeMap, PsdProvider, ReferenceEntry};
use anyhow::Result;
use comfy_table::{Cell, CellAlignment};

/// Entries whose name contains `filter` (case-insensitive), sorted by name.
pub fn filter_entries<'a, T: ReferenceEntry>(entries: &'a [T], filter: Option<&str>) -> Vec<&'a T> {
    let needle = filter.map(|f| f.trim().to_lowercase());
    let mut matched: Vec<&T> = entries
        .iter()
        .filter(|e| match &needle {
            Some(n) => e.name().to_lowercase().contains(n.as_str()),
            None => true,
        })
        .collect();
    matched.sort_by(|a, b| a.name().trim().cmp(b.name().trim()));
    matched
}

pub fn reference_table<T: ReferenceEntry>(entries: &[&T]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Name"), ui::header_cell("Code")]);
    for entry in entries {
        table.add_row(vec![Cell::new(entry.name().trim()), Cell::new(entry.code())]);
    }
    table.to_string()
}

pub fn attribute_table(attributes: &AttributeMap) -> String {
    let mut rows: Vec<(&str, i64)> = attributes.iter().collect();
    rows.sort_by_key(|(name, id)| (*id, *name));

    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("ID"), ui::header_cell("Attribute")]);
    for (name, id) in rows {
        table.add_row(vec![
            Cell::new(id).set_alignment(CellAlignment::Right),
            Cell::new(name.trim()),
        ]);
    }
    table.to_string()
}

fn print_listing(kind: &str, total: usize, shown: usize, table: String) {
    if shown == 0 {
        ui::print_warning(&format!("No {kind} found."));
        return;
    }
    println!("{table}");
    println!(
        "{}",
        ui::style_text(&format!("{shown} of {total} {kind}"), ui::StyleType::Subtle)
    );
}

pub async fn commodities(
    provider: &(dyn PsdProvider + Send + Sync),
    filter: Option<&str>,
) -> Result<()> {
    let pb = ui::new_spinner("Fetching commodities...");
    let commodities = provider.fetch_commodities().await;
    pb.finish_and_clear();
    let commodities = commodities?;

    let matched = filter_entries(&commodities, filter);
    print_listing(
        "commodities",
        commodities.len(),
        matched.len(),
        reference_table(&matched),
    );
    Ok(())
}

pub async fn countries(
    provider: &(dyn PsdProvider + Send + Sync),
    filter: Option<&str>,
) -> Result<()> {
    let pb = ui::new_spinner("Fetching countries...");
    let countries = provider.fetch_countries().await;
    pb.finish_and_clear();
    let countries = countries?;

    let matched = filter_entries(&countries, filter);
    print_listing(
        "countries",
        countries.len(),
        matched.len(),
        reference_table(&matched),
    );
    Ok(())
}

pub async fn attributes(provider: &(dyn PsdProvider + Send + Sync)) -> Result<()> {
    let pb = ui::new_spinner("Fetching attributes...");
    let attributes = provider.fetch_attribute_map().await;
    pb.finish_and_clear();
    let attributes = attributes?;

    print_listing(
        "attributes",
        attributes.len(),
        attributes.len(),
        attribute_table(&attributes),
    );
    Ok(())
}
