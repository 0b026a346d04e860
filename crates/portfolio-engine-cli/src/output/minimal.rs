use serde_json::Value;

use super::{payload, scalar_text};

/// Print just the headline of a result.
///
/// Weight maps print one `SYMBOL weight` line each; otherwise the first
/// non-null well-known field wins, falling back to the first field.
pub fn print_minimal(value: &Value) {
    let result = payload(value);

    if let Some(Value::Object(weights)) = result.get("weights") {
        for (symbol, w) in weights {
            println!("{} {}", symbol, scalar_text(w));
        }
        return;
    }

    let priority_keys = [
        "actions",
        "sharpe_ratio",
        "value_at_risk",
        "expected_volatility",
        "expected_returns",
        "turnover",
    ];

    if let Value::Object(map) = result {
        if let Some(Value::Array(weights)) = map.get("weights") {
            for w in weights {
                println!(
                    "{} {}",
                    w.get("symbol").map(scalar_text).unwrap_or_default(),
                    w.get("weight").map(scalar_text).unwrap_or_default()
                );
            }
            if !weights.is_empty() {
                return;
            }
        }

        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    println!("{}", scalar_text(val));
                    return;
                }
            }
        }

        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, scalar_text(val));
            return;
        }
    }

    println!("{}", scalar_text(result));
}
