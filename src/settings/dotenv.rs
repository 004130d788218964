use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub fn load_dotenv_map(path: &Path) -> Result<HashMap<String, String>, std::io::Error> {
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(parse_dotenv_content(raw.as_str()))
}

pub fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let mut entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        if let Some(rest) = entry.strip_prefix("export ") {
            entry = rest.trim_start();
        }
        let Some((key_raw, value_raw)) = entry.split_once('=') else {
            continue;
        };
        let key = key_raw.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), unquote_value(value_raw.trim()));
    }
    out
}

fn unquote_value(value: &str) -> String {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        return value[1..value.len() - 1].to_string();
    }
    match value.split_once(" #") {
        Some((before_comment, _)) => before_comment.trim_end().to_string(),
        None => value.to_string(),
    }
}
