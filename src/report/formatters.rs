use crate::holders::HolderSnapshot;
use alloy_primitives::U256;
use alloy_primitives::utils::format_units;
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

#[derive(Debug, Serialize)]
struct HolderRow {
    address: String,
    balance: String,
    staked: String,
    total: String,
    total_wei: String,
}

fn units(value: U256, decimals: u8) -> String {
    format_units(value, decimals).unwrap_or_else(|_| value.to_string())
}

/// Largest combined holding first.
fn rows(snapshot: &HolderSnapshot, decimals: u8) -> Vec<HolderRow> {
    let mut holders: Vec<_> = snapshot.holders.iter().collect();
    holders.sort_by(|a, b| b.holding.total().cmp(&a.holding.total()));

    holders
        .into_iter()
        .map(|h| HolderRow {
            address: format!("{:?}", h.address),
            balance: units(h.holding.balance, decimals),
            staked: units(h.holding.staked, decimals),
            total: units(h.holding.total(), decimals),
            total_wei: h.holding.total().to_string(),
        })
        .collect()
}

/// Renders a snapshot. Without `list` only the summary is printed.
pub fn format_holders(
    snapshot: &HolderSnapshot,
    symbol: &str,
    decimals: u8,
    list: bool,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Table => format_holders_table(snapshot, symbol, decimals, list),
        OutputFormat::Json => format_holders_json(snapshot, symbol, decimals, list),
        OutputFormat::Csv => format_holders_csv(snapshot, decimals, list),
    }
}

fn format_holders_table(
    snapshot: &HolderSnapshot,
    symbol: &str,
    decimals: u8,
    list: bool,
) -> String {
    let mut summary = Table::new();
    summary
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Metric", "Value"]);
    summary.add_row(vec![Cell::new(format!("{symbol} holders")), Cell::new(snapshot.count())]);
    summary.add_row(vec![Cell::new("Addresses checked"), Cell::new(snapshot.checked)]);
    summary.add_row(vec![Cell::new("Failed lookups"), Cell::new(snapshot.failed)]);

    if !list {
        return summary.to_string();
    }
    if snapshot.holders.is_empty() {
        return format!("{summary}\nNo holders found.");
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Rank", "Address", "Balance", "Staked", "Total"]);
    for (i, row) in rows(snapshot, decimals).into_iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(row.address),
            Cell::new(row.balance),
            Cell::new(row.staked),
            Cell::new(row.total),
        ]);
    }

    format!("{summary}\n{table}")
}

fn format_holders_json(
    snapshot: &HolderSnapshot,
    symbol: &str,
    decimals: u8,
    list: bool,
) -> String {
    let mut value = json!({
        "token": symbol,
        "holders": snapshot.count(),
        "checked": snapshot.checked,
        "failed": snapshot.failed,
    });
    if list {
        value["addresses"] = json!(rows(snapshot, decimals));
    }
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

fn format_holders_csv(snapshot: &HolderSnapshot, decimals: u8, list: bool) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    if list {
        for row in rows(snapshot, decimals) {
            let _ = wtr.serialize(row);
        }
        if snapshot.holders.is_empty() {
            let _ = wtr.write_record(["address", "balance", "staked", "total", "total_wei"]);
        }
    } else {
        let _ = wtr.write_record(["holders", "checked", "failed"]);
        let _ = wtr.write_record([
            snapshot.count().to_string(),
            snapshot.checked.to_string(),
            snapshot.failed.to_string(),
        ]);
    }

    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holders::{HolderBalance, Holding};
    use alloy_primitives::Address;

    fn snapshot() -> HolderSnapshot {
        let whole = U256::from(10u64).pow(U256::from(18));
        HolderSnapshot {
            holders: vec![
                HolderBalance {
                    address: Address::repeat_byte(1),
                    holding: Holding {
                        balance: whole,
                        staked: U256::ZERO,
                    },
                },
                HolderBalance {
                    address: Address::repeat_byte(2),
                    holding: Holding {
                        balance: whole,
                        staked: whole * U256::from(2),
                    },
                },
            ],
            checked: 3,
            failed: 1,
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("csv"), OutputFormat::Csv);
        assert_eq!(OutputFormat::from("anything"), OutputFormat::Table);
    }

    #[test]
    fn test_json_lists_largest_first() {
        let out = format_holders(&snapshot(), "PBTC", 18, true, OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(value["holders"], 2);
        assert_eq!(value["failed"], 1);
        let addresses = value["addresses"].as_array().unwrap();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0]["total"], "3.000000000000000000");
        assert_eq!(addresses[0]["staked"], "2.000000000000000000");
    }

    #[test]
    fn test_csv_summary() {
        let out = format_holders(&snapshot(), "PBTC", 18, false, OutputFormat::Csv);
        assert_eq!(out, "holders,checked,failed\n2,3,1\n");
    }

    #[test]
    fn test_csv_list_has_header() {
        let out = format_holders(&snapshot(), "PBTC", 18, true, OutputFormat::Csv);
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("address,balance,staked,total,total_wei"));
        assert_eq!(lines.count(), 2);
    }
}
