use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

use super::{payload, primary_rows, scalar_text};

/// Format output as tables: scalar fields first, then the main row set.
pub fn print_table(value: &Value) {
    let result = payload(value);
    match result {
        Value::Object(map) => {
            print_scalars(map);
            if let Some(Value::Object(weights)) = map.get("weights") {
                println!("\nWeights:");
                print_weight_map(weights);
            }
            if let Some(rows) = primary_rows(result) {
                println!();
                print_rows(rows);
            }
        }
        Value::Array(arr) => print_rows(arr),
        other => println!("{}", scalar_text(other)),
    }

    let envelope = value.as_object();
    let warnings = envelope
        .and_then(|m| m.get("warnings"))
        .or_else(|| result.get("warnings"));
    if let Some(Value::Array(warnings)) = warnings {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(|w| w.as_str()) {
                println!("  - {}", w);
            }
        }
    }
    if let Some(Value::String(meth)) = envelope.and_then(|m| m.get("methodology")) {
        println!("\nMethodology: {}", meth);
    }
}

fn print_scalars(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        if val.is_array() || key == "weights" || key == "warnings" {
            continue;
        }
        let text = match val {
            Value::Object(_) => nested_summary(val),
            _ => scalar_text(val),
        };
        builder.push_record([key.as_str(), text.as_str()]);
    }
    println!("{}", Table::from(builder));
}

/// Flatten one level of a nested object as `key=value` pairs.
fn nested_summary(value: &Value) -> String {
    match value {
        Value::Object(m) => m
            .iter()
            .filter(|(_, v)| !v.is_array() && !v.is_object())
            .map(|(k, v)| format!("{}={}", k, scalar_text(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => scalar_text(other),
    }
}

fn print_weight_map(weights: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Symbol", "Weight"]);
    for (symbol, w) in weights {
        builder.push_record([symbol.as_str(), scalar_text(w).as_str()]);
    }
    println!("{}", Table::from(builder));
}

fn print_rows(arr: &[Value]) {
    if arr.is_empty() {
        println!("(empty)");
        return;
    }

    if let Some(Value::Object(first)) = arr.first() {
        let headers: Vec<String> = first.keys().cloned().collect();
        let mut builder = Builder::default();
        builder.push_record(&headers);
        for item in arr {
            if let Value::Object(map) = item {
                let row: Vec<String> = headers
                    .iter()
                    .map(|h| map.get(h.as_str()).map(scalar_text).unwrap_or_default())
                    .collect();
                builder.push_record(row);
            }
        }
        println!("{}", Table::from(builder));
    } else {
        for item in arr {
            println!("{}", scalar_text(item));
        }
    }
}
