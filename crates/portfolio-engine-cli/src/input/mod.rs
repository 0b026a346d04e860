pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;

/// Load command input from `--input <file>` or piped stdin.
pub fn load<T: DeserializeOwned>(path: &Option<String>) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(ref path) = path {
        file::read_input(path)
    } else if let Some(data) = stdin::read_stdin()? {
        Ok(serde_json::from_value(data)?)
    } else {
        Err("--input <file.json|file.yaml> or stdin required".into())
    }
}
