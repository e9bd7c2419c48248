//! Shared helpers for the line-oriented instrument formats.

use chrono::NaiveDateTime;

/// Decodes raw bytes into a string with a BOM stripped, `\n` line endings and no trailing
/// blank lines. UTF-16 is recognized by its BOM; bytes that are not valid UTF-8 are read
/// as Latin-1, which is what older potentiostat software writes.
pub fn normalize(bytes: &[u8]) -> String {
    let text = if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        String::from_utf8_lossy(rest).into_owned()
    } else if bytes.starts_with(&[0xFF, 0xFE]) {
        decode_utf16(&bytes[2..], u16::from_le_bytes)
    } else if bytes.starts_with(&[0xFE, 0xFF]) {
        decode_utf16(&bytes[2..], u16::from_be_bytes)
    } else {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => bytes.iter().map(|&b| b as char).collect(),
        }
    };
    let mut text = text.replace("\r\n", "\n").replace('\r', "\n");
    while text.ends_with('\n') || text.ends_with(' ') || text.ends_with('\t') {
        text.pop();
    }
    text
}

fn decode_utf16(bytes: &[u8], read: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| read([c[0], c[1]])).collect();
    String::from_utf16_lossy(&units)
}

/// Parses a number written with either `.` or `,` as the decimal separator.
pub fn parse_number(field: &str) -> Option<f64> {
    let field = field.trim().trim_matches('"');
    if field.is_empty() {
        return None;
    }
    if let Ok(v) = field.parse::<f64>() {
        return Some(v);
    }
    if field.contains(',') && !field.contains('.') {
        return field.replacen(',', ".", 1).parse::<f64>().ok();
    }
    None
}

/// Like [`parse_number`], with NaN standing in for an unparsable cell.
pub fn number_or_nan(field: &str) -> f64 {
    parse_number(field).unwrap_or(f64::NAN)
}

/// Picks the field separator of a delimited line: tab, then semicolon, then comma.
pub fn detect_separator(line: &str) -> char {
    if line.contains('\t') {
        '\t'
    } else if line.contains(';') {
        ';'
    } else {
        ','
    }
}

pub fn split_fields(line: &str, separator: char) -> Vec<String> {
    line.split(separator)
        .map(|f| f.trim().trim_matches('"').to_string())
        .collect()
}

/// Splits `"Power [W]"` or `"Power (W)"` into its name and unit.
pub fn split_unit(header: &str) -> (String, Option<String>) {
    let header = header.trim();
    for (open, close) in [('[', ']'), ('(', ')')] {
        if let (Some(start), true) = (header.rfind(open), header.ends_with(close)) {
            let name = header[..start].trim().to_string();
            let unit = header[start + 1..header.len() - 1].trim().to_string();
            if !name.is_empty() && !unit.is_empty() {
                return (name, Some(unit));
            }
        }
    }
    (header.to_string(), None)
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S%.f",
    "%a %b %d %H:%M:%S %Y",
    "%b. %d, %Y %H:%M:%S",
    "%B %d, %Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M",
];

/// Lenient timestamp parsing over the formats the supported instruments write.
pub fn parse_datetime(field: &str) -> Option<NaiveDateTime> {
    let field = field.trim().trim_matches('"');
    if field.is_empty() {
        return None;
    }
    let collapsed = field.split_whitespace().collect::<Vec<_>>().join(" ");
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&collapsed, fmt).ok())
}

/// Combines separate date and time fields, as most instrument exports store them.
pub fn parse_date_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    parse_datetime(&format!("{} {}", date.trim(), time.trim()))
}
