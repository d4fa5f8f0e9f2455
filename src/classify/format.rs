//! Display formatting for classified lines and byte sizes.

use std::path::Path;

use super::rules::FILE_LINE;

/// Render a raw size token into a human unit.
///
/// A token with a trailing unit letter (`k`/`m`/`g`/`t`, any case) renders
/// as `{value:.1} {UNIT}B`. A pure digit token (grouping and decimal
/// punctuation stripped) is a byte count, rendered with binary (1024-based)
/// thresholds and one decimal place. Anything else passes through unchanged.
pub fn format_size(raw: &str) -> String {
    let raw = raw.trim();

    if raw.len() > 1 {
        if let Some(unit) = raw.chars().last().filter(|c| c.is_ascii_alphabetic()) {
            let num_part = raw[..raw.len() - 1].trim();
            if let Ok(val) = num_part.parse::<f64>() {
                return match unit.to_ascii_uppercase() {
                    'K' => format!("{val:.1} KB"),
                    'M' => format!("{val:.1} MB"),
                    'G' => format!("{val:.1} GB"),
                    'T' => format!("{val:.1} TB"),
                    _ => raw.to_string(),
                };
            }
            return raw.to_string();
        }
    }

    let digits: String = raw.chars().filter(|c| *c != ',' && *c != '.').collect();
    if let Ok(bytes) = digits.parse::<u64>() {
        const KIB: u64 = 1024;
        const MIB: u64 = KIB * 1024;
        const GIB: u64 = MIB * 1024;
        const TIB: u64 = GIB * 1024;
        return match bytes {
            b if b < KIB => format!("{b} B"),
            b if b < MIB => format!("{:.1} KB", b as f64 / KIB as f64),
            b if b < GIB => format!("{:.1} MB", b as f64 / MIB as f64),
            b if b < TIB => format!("{:.1} GB", b as f64 / GIB as f64),
            b => format!("{:.1} TB", b as f64 / TIB as f64),
        };
    }

    raw.to_string()
}

/// Render a copy-tool line for display.
///
/// Structured rows become fixed tab-stop columns (`status`, human size,
/// path), with the path joined onto `base` when one is given. Unstructured
/// lines pass through with internal tabs normalized to double spaces so they
/// do not drift columns in monospaced rendering.
pub fn format_file_line(line: &str, base: Option<&Path>) -> String {
    if let Some(caps) = FILE_LINE.captures(line) {
        let status = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let size = format_size(&caps[2]);
        let path = caps[3].trim();
        let path = match base {
            Some(base) => base.join(path).display().to_string(),
            None => path.to_string(),
        };
        return format!("  {status}\t{size}\t{path}");
    }

    line.replace('\t', "  ")
}
