use crate::fields::{self, TradeFields, COST_KEY, HEADER_KEY, QTY_PRICE_KEY};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

const SEPARATOR: char = ':';
// Broker exports put "Individual · Jun 2" style subtitles inside blocks.
const SUBTITLE_MARK: char = '·';

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub line: usize,
    pub code: &'static str,
    pub message: String,
}

/// Result of a best-effort parse: every trade that could be read plus one
/// warning per dropped line or block. Nothing in the text makes the parse
/// fail as a whole.
#[derive(Debug, Clone, Default)]
pub struct ParsedTradeText {
    pub trades: Vec<TradeFields>,
    pub warnings: Vec<ParseWarning>,
}

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    no: usize,
    text: &'a str,
}

pub fn parse_trade_file(path: &Path) -> anyhow::Result<ParsedTradeText> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(parse_trade_text(&text))
}

#[derive(Debug, Clone)]
pub struct ConvertSummary {
    pub out_path: PathBuf,
    pub trade_count: usize,
    pub warnings: Vec<ParseWarning>,
}

/// Parses a text file and writes its trades as a pretty JSON array, by
/// default next to the input with a `.json` extension.
pub fn convert_text_file(path: &Path, out: Option<&Path>) -> anyhow::Result<ConvertSummary> {
    let parsed = parse_trade_file(path)?;
    let out_path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.with_extension("json"));
    let body = serde_json::to_string_pretty(&parsed.trades).context("failed to serialize trades")?;
    std::fs::write(&out_path, body)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    Ok(ConvertSummary {
        out_path,
        trade_count: parsed.trades.len(),
        warnings: parsed.warnings,
    })
}

pub fn parse_trade_text(text: &str) -> ParsedTradeText {
    let mut out = ParsedTradeText::default();
    let mut current: Option<TradeFields> = None;

    for group in split_groups(text) {
        let first = group[0];

        match current.as_mut() {
            // With a trade open, only a group that can carry the three
            // positional lines starts the next one.
            Some(trade) if is_label_line(first.text) || group.len() < 3 => {
                read_field_lines(&group, trade, &mut out.warnings);
                continue;
            }
            None if group.len() < 3 => {
                let warning = if is_label_line(first.text) {
                    ParseWarning {
                        line: first.no,
                        code: "orphan_group",
                        message: format!(
                            "label lines starting {:?} do not follow a trade header",
                            first.text
                        ),
                    }
                } else {
                    ParseWarning {
                        line: first.no,
                        code: "short_block",
                        message: format!(
                            "block starting {:?} has {} line(s); header, cost and quantity/price are required",
                            first.text,
                            group.len()
                        ),
                    }
                };
                out.warnings.push(warning);
                continue;
            }
            _ => {}
        }

        if let Some(done) = current.take() {
            out.trades.push(done);
        }

        let mut trade = TradeFields::new();
        trade.insert(HEADER_KEY, group[0].text);
        trade.insert(COST_KEY, group[1].text);
        trade.insert(QTY_PRICE_KEY, group[2].text);
        read_field_lines(&group[3..], &mut trade, &mut out.warnings);
        current = Some(trade);
    }

    if let Some(done) = current.take() {
        out.trades.push(done);
    }
    out
}

/// Groups of consecutive non-blank lines, trimmed, subtitles removed.
/// Every returned group is non-empty.
fn split_groups(text: &str) -> Vec<Vec<Line<'_>>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut groups = Vec::new();
    let mut group: Vec<Line<'_>> = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let t = raw.trim();
        if t.is_empty() {
            if !group.is_empty() {
                groups.push(std::mem::take(&mut group));
            }
            continue;
        }
        if t.contains(SUBTITLE_MARK) {
            continue;
        }
        group.push(Line { no: i + 1, text: t });
    }
    if !group.is_empty() {
        groups.push(group);
    }
    groups
}

fn is_label_line(line: &str) -> bool {
    fields::is_stacked_label(line) || line.contains(SEPARATOR)
}

fn is_reserved(label: &str) -> bool {
    label == HEADER_KEY || label == COST_KEY || label == QTY_PRICE_KEY
}

fn split_label(line: &str) -> Option<(&str, &str)> {
    let (label, value) = line.split_once(SEPARATOR)?;
    let (label, value) = (label.trim(), value.trim());
    if label.is_empty() || value.is_empty() {
        return None;
    }
    Some((label, value))
}

fn read_field_lines(lines: &[Line<'_>], trade: &mut TradeFields, warnings: &mut Vec<ParseWarning>) {
    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];

        // A stacked label owns the next line even when it holds a colon
        // ("Submitted" / "7/30/2025, 10:15 AM EDT").
        if fields::is_stacked_label(line.text) {
            match lines.get(i + 1) {
                Some(value) => trade.insert(line.text, value.text),
                None => warnings.push(ParseWarning {
                    line: line.no,
                    code: "missing_value",
                    message: format!("label {:?} has no value line", line.text),
                }),
            }
            i += 2;
            continue;
        }

        match split_label(line.text) {
            Some((label, _)) if is_reserved(label) => warnings.push(ParseWarning {
                line: line.no,
                code: "reserved_label",
                message: format!("label {label:?} is positional and cannot be set by a field line"),
            }),
            Some((label, value)) => trade.insert(label, value),
            None => warnings.push(ParseWarning {
                line: line.no,
                code: "malformed_line",
                message: format!("{:?} is not a label/value pair", line.text),
            }),
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(t: &TradeFields) -> Vec<&str> {
        t.iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn inline_fields_after_positional_group() {
        let text = "AAPL BUY\n150.25\n10 @ 150.00\n\nExchange: NASDAQ\nNotes\n";
        let parsed = parse_trade_text(text);
        assert_eq!(parsed.trades.len(), 1);
        let t = &parsed.trades[0];
        assert_eq!(labels(t), vec!["header", "cost", "qtyPrice", "Exchange"]);
        assert_eq!(t.get_text("header"), Some("AAPL BUY"));
        assert_eq!(t.get_text("cost"), Some("150.25"));
        assert_eq!(t.get_text("qtyPrice"), Some("10 @ 150.00"));
        assert_eq!(t.get_text("Exchange"), Some("NASDAQ"));

        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].code, "malformed_line");
        assert_eq!(parsed.warnings[0].line, 6);
    }

    #[test]
    fn stacked_labels_take_the_next_line() {
        let text = "Buy SPY $645 Call 7/31\n$94.00\n2 contracts at $0.47\nIndividual · Jun 2\n\
                    Type\nLimit order\nSubmitted\n7/30/2025, 10:15 AM EDT\nStatus\nFilled\n";
        let parsed = parse_trade_text(text);
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
        let t = &parsed.trades[0];
        assert_eq!(t.get_text("Type"), Some("Limit order"));
        assert_eq!(t.get_text("Submitted"), Some("7/30/2025, 10:15 AM EDT"));
        assert_eq!(t.get_text("Status"), Some("Filled"));
        assert!(!t.iter().any(|(_, v)| v.to_string().contains('·')));
    }

    #[test]
    fn each_header_group_starts_a_new_trade() {
        let text = "AAPL BUY\n150.25\n10 @ 150.00\n\nExchange: NASDAQ\n\n\n\
                    MSFT SELL\n410.00\n5 @ 82.00\n\nExchange: NYSE\n";
        let parsed = parse_trade_text(text);
        assert_eq!(parsed.trades.len(), 2);
        assert_eq!(parsed.trades[0].get_text("Exchange"), Some("NASDAQ"));
        assert_eq!(parsed.trades[1].get_text("header"), Some("MSFT SELL"));
        assert_eq!(parsed.trades[1].get_text("Exchange"), Some("NYSE"));
    }

    #[test]
    fn short_block_is_skipped_not_fatal() {
        let text = "TSLA BUY\n250.00\n\nExchange: NASDAQ\n\nNVDA BUY\n120.00\n1 @ 120.00\n";
        let parsed = parse_trade_text(text);
        assert_eq!(parsed.trades.len(), 1);
        assert_eq!(parsed.trades[0].get_text("header"), Some("NVDA BUY"));
        let codes: Vec<&str> = parsed.warnings.iter().map(|w| w.code).collect();
        assert_eq!(codes, vec!["short_block", "orphan_group"]);
    }

    #[test]
    fn unlabelled_group_inside_a_trade_keeps_later_pairs() {
        let text = "AAPL BUY\n150.25\n10 @ 150.00\n\nNotes\n\nExchange: NASDAQ\n";
        let parsed = parse_trade_text(text);
        assert_eq!(parsed.trades.len(), 1);
        assert_eq!(parsed.trades[0].get_text("Exchange"), Some("NASDAQ"));
        assert!(!parsed.trades[0].contains("Notes"));
        let codes: Vec<(&str, usize)> = parsed.warnings.iter().map(|w| (w.code, w.line)).collect();
        assert_eq!(codes, vec![("malformed_line", 5)]);
    }

    #[test]
    fn next_trade_follows_a_dropped_group() {
        let text = "AAPL BUY\n150.25\n10 @ 150.00\n\nNotes\nsee chart\n\n\
                    MSFT SELL\n410.00\n5 @ 82.00\nExchange: NYSE\n";
        let parsed = parse_trade_text(text);
        assert_eq!(parsed.trades.len(), 2);
        assert_eq!(labels(&parsed.trades[0]), vec!["header", "cost", "qtyPrice"]);
        assert_eq!(parsed.trades[1].get_text("header"), Some("MSFT SELL"));
        assert_eq!(parsed.trades[1].get_text("Exchange"), Some("NYSE"));
        let codes: Vec<(&str, usize)> = parsed.warnings.iter().map(|w| (w.code, w.line)).collect();
        assert_eq!(codes, vec![("malformed_line", 5), ("malformed_line", 6)]);
    }

    #[test]
    fn header_with_a_colon_still_opens_a_trade() {
        let parsed = parse_trade_text("AAPL BUY 10:30\n150.25\n10 @ 150.00\n\nExchange: NASDAQ\n");
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
        assert_eq!(parsed.trades.len(), 1);
        let t = &parsed.trades[0];
        assert_eq!(t.get_text("header"), Some("AAPL BUY 10:30"));
        assert_eq!(t.get_text("qtyPrice"), Some("10 @ 150.00"));
        assert_eq!(t.get_text("Exchange"), Some("NASDAQ"));
    }

    #[test]
    fn positional_keys_cannot_be_overwritten() {
        let parsed = parse_trade_text("AAPL BUY\n150.25\n10 @ 150.00\nheader: other\n");
        assert_eq!(parsed.trades[0].get_text("header"), Some("AAPL BUY"));
        assert_eq!(parsed.warnings[0].code, "reserved_label");
    }

    #[test]
    fn crlf_and_bom_are_tolerated() {
        let text = "\u{feff}AAPL BUY\r\n150.25\r\n10 @ 150.00\r\n   \r\nVenue : IEX \r\n";
        let parsed = parse_trade_text(text);
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.trades[0].get_text("header"), Some("AAPL BUY"));
        assert_eq!(parsed.trades[0].get_text("Venue"), Some("IEX"));
    }

    #[test]
    fn trailing_stacked_label_without_value_warns() {
        let parsed = parse_trade_text("AAPL BUY\n150.25\n10 @ 150.00\nStatus\n");
        assert!(!parsed.trades[0].contains("Status"));
        assert_eq!(parsed.warnings[0].code, "missing_value");
    }

    #[test]
    fn empty_text_has_no_trades() {
        let parsed = parse_trade_text("\n\n   \n");
        assert!(parsed.trades.is_empty());
        assert!(parsed.warnings.is_empty());
    }
}
