use crate::blocks::ParseWarning;
use crate::fields::TradeFields;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonImportError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("expected a trade object or an array of trade objects, found {0}")]
    Shape(&'static str),
}

impl JsonImportError {
    pub fn code(&self) -> &'static str {
        match self {
            JsonImportError::Io { .. } => "io_failed",
            JsonImportError::Syntax(_) => "bad_json",
            JsonImportError::Shape(_) => "bad_shape",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedTradeJson {
    pub trades: Vec<TradeFields>,
    pub warnings: Vec<ParseWarning>,
}

pub fn parse_trade_json_file(path: &Path) -> Result<ParsedTradeJson, JsonImportError> {
    let text = std::fs::read_to_string(path).map_err(|source| JsonImportError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    })?;
    parse_trade_json(&text)
}

/// A single trade object or an array of them. Keys and values are kept as
/// written; `line` in warnings is the 1-based index of the trade.
pub fn parse_trade_json(text: &str) -> Result<ParsedTradeJson, JsonImportError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let root: serde_json::Value = serde_json::from_str(text)?;

    let items = match root {
        serde_json::Value::Object(obj) => vec![serde_json::Value::Object(obj)],
        serde_json::Value::Array(items) => items,
        other => return Err(JsonImportError::Shape(kind_name(&other))),
    };

    let mut out = ParsedTradeJson::default();
    for (i, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            out.warnings.push(ParseWarning {
                line: i + 1,
                code: "not_an_object",
                message: format!("trade #{} is {}, not an object", i + 1, kind_name(item)),
            });
            continue;
        };
        let (fields, unsupported) = TradeFields::from_json_object(obj);
        for label in unsupported {
            out.warnings.push(ParseWarning {
                line: i + 1,
                code: "unsupported_value",
                message: format!("trade #{} field {label:?} is not a string or number", i + 1),
            });
        }
        out.trades.push(fields);
    }
    Ok(out)
}

fn kind_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldValue;

    #[test]
    fn single_object_keeps_key_order_and_types() {
        let parsed =
            parse_trade_json(r#"{"header":"Buy SPY","Quantity":2,"Total Cost":"$94.00"}"#)
                .expect("parse");
        assert_eq!(parsed.trades.len(), 1);
        let t = &parsed.trades[0];
        let labels: Vec<&str> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(labels, vec!["header", "Quantity", "Total Cost"]);
        assert_eq!(t.get("Quantity"), Some(&FieldValue::from(2i64)));
    }

    #[test]
    fn array_skips_non_objects_with_warning() {
        let parsed = parse_trade_json(r#"[{"header":"a"}, 7, {"header":"b","legs":[1]}]"#)
            .expect("parse");
        assert_eq!(parsed.trades.len(), 2);
        let codes: Vec<&str> = parsed.warnings.iter().map(|w| w.code).collect();
        assert_eq!(codes, vec!["not_an_object", "unsupported_value"]);
        assert!(!parsed.trades[1].contains("legs"));
    }

    #[test]
    fn scalar_root_and_bad_syntax_are_errors() {
        let shape = parse_trade_json("\"just text\"").expect_err("shape");
        assert_eq!(shape.code(), "bad_shape");
        let syntax = parse_trade_json("{\"header\": ").expect_err("syntax");
        assert_eq!(syntax.code(), "bad_json");
    }
}
