//! Dotenv loading for API keys and bot settings kept out of the config file.

use std::collections::HashMap;
use std::path::Path;

/// Parse a dotenv-format string into a key-value map.
///
/// Supports:
/// - `KEY=value`
/// - `export KEY=value`
/// - Quoted values (`"value"` or `'value'`)
/// - Comments (`# ...`) and blank lines
pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(eq_pos) = trimmed.find('=') else {
            continue;
        };
        let key = trimmed[..eq_pos].trim();
        let key = key.strip_prefix("export ").map(str::trim).unwrap_or(key);
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), unquote(trimmed[eq_pos + 1..].trim()));
    }
    map
}

fn unquote(s: &str) -> String {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        return s[1..s.len() - 1].to_string();
    }
    s.to_string()
}

/// Export entries from a dotenv file into the process environment.
/// Variables that are already set win over the file. Returns how many were exported.
pub fn load_dotenv<P: AsRef<Path>>(path: P) -> usize {
    let path = path.as_ref();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return 0,
    };

    let mut exported = 0;
    for (key, value) in parse_dotenv(&content) {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            exported += 1;
        }
    }
    tracing::debug!("Exported {} variable(s) from {:?}", exported, path);
    exported
}
