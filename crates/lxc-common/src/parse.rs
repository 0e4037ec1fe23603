//! Parsers for the table output of `lxc list` / `lxc image list` and the
//! address lines of `lxc info`.
//!
//! The column offsets below match the CLI's default table format:
//!
//! ```text
//! +-------+---------+----------------------+------+-----------+
//! | NAME  |  STATE  |         IPV4         | IPV6 |   TYPE    |
//! +-------+---------+----------------------+------+-----------+
//! | web1  | RUNNING | 10.0.0.5 (eth0)      |      | CONTAINER |
//! +-------+---------+----------------------+------+-----------+
//! ```
//!
//! Leading `|` makes field 0 empty, so data starts at field 1. Nothing here
//! fails: malformed rows are skipped.

use crate::{ContainerRecord, ContainerState, ImageRecord};

/// Number of lines (border, header, border) before the first data row.
const HEADER_LINES: usize = 3;

fn table_rows(text: &str) -> impl Iterator<Item = Vec<&str>> {
    text.lines()
        .skip(HEADER_LINES)
        .filter(|line| !line.trim().is_empty() && line.contains('|'))
        .map(|line| line.split('|').map(str::trim).collect())
}

fn column(fields: &[&str], index: usize) -> String {
    fields.get(index).map(|s| s.to_string()).unwrap_or_default()
}

pub fn parse_container_listing(text: &str) -> Vec<ContainerRecord> {
    table_rows(text)
        .filter(|fields| fields.len() >= 4 && !fields[1].is_empty())
        .map(|fields| ContainerRecord {
            name: fields[1].to_string(),
            state: ContainerState::from_column(fields[2]),
            ipv4: column(&fields, 3),
            ipv6: column(&fields, 4),
            kind: fields
                .get(5)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "container".to_string()),
        })
        .collect()
}

pub fn parse_image_listing(text: &str) -> Vec<ImageRecord> {
    table_rows(text)
        .filter(|fields| fields.len() >= 3 && !fields[1].is_empty())
        .map(|fields| ImageRecord {
            alias: fields[1].to_string(),
            fingerprint: column(&fields, 2),
            public: column(&fields, 3),
            description: column(&fields, 4),
            architecture: column(&fields, 5),
            size: column(&fields, 6),
        })
        .collect()
}

/// First global-scope address from an `lxc info` dump, without its prefix length.
pub fn parse_container_address(text: &str) -> Option<String> {
    text.lines()
        .filter(|line| line.contains("inet") && line.contains("global"))
        .find_map(|line| line.split_whitespace().nth(1))
        .and_then(|token| token.split('/').next())
        .map(str::to_string)
}
