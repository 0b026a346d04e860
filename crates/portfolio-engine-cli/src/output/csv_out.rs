use serde_json::Value;
use std::io;

use super::{payload, primary_rows, scalar_text};

/// Write output as CSV to stdout.
///
/// Row-shaped results (trades, contributions, weights) become one record per
/// row; anything else is written as `field,value` pairs.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());
    let result = payload(value);

    if let Some(rows) = primary_rows(result) {
        write_rows(&mut wtr, rows);
    } else if let Some(Value::Object(weights)) = result.get("weights") {
        let _ = wtr.write_record(["symbol", "weight"]);
        for (symbol, w) in weights {
            let _ = wtr.write_record([symbol.as_str(), &scalar_text(w)]);
        }
    } else {
        match result {
            Value::Object(map) => {
                let _ = wtr.write_record(["field", "value"]);
                for (key, val) in map {
                    let _ = wtr.write_record([key.as_str(), &scalar_text(val)]);
                }
            }
            Value::Array(arr) => write_rows(&mut wtr, arr),
            other => {
                let _ = wtr.write_record([&scalar_text(other)]);
            }
        }
    }

    let _ = wtr.flush();
}

fn write_rows(wtr: &mut csv::Writer<io::StdoutLock<'_>>, arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        for item in arr {
            let _ = wtr.write_record([&scalar_text(item)]);
        }
        return;
    };

    let headers: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
    let _ = wtr.write_record(&headers);
    for item in arr {
        if let Value::Object(map) = item {
            let row: Vec<String> = headers
                .iter()
                .map(|h| map.get(*h).map(scalar_text).unwrap_or_default())
                .collect();
            let _ = wtr.write_record(&row);
        }
    }
}
