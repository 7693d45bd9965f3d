//! Header-value table: parses `xheader`/`header2`/`header` and regenerates
//! byte-identical payloads for the same dialect and codepage (spec.md §4.5,
//! §8 "Round-trip").
//!
//! Grounded on `ewf.rs::EwfHeaderSection` (`decode`, `table_to_map`,
//! `parse_metadata`), which inflated the section and discarded everything
//! but the final key/value map. This keeps the original surrounding lines
//! (the `"1"` / `"main"` preamble rows real EWF headers carry) so
//! re-encoding can reproduce them.

use crate::format::{Codepage, DateFormat};

/// A parsed `header`/`header2`/`xheader` payload: a tab-separated table
/// with a small preamble of category lines above it.
#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    preamble: Vec<String>,
    columns: Vec<String>,
    values: Vec<String>,
    uses_crlf: bool,
    trailing_newline: bool,
}

impl HeaderTable {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == key)
            .map(|i| self.values[i].as_str())
    }

    pub fn set(&mut self, key: &str, value: String) {
        if let Some(i) = self.columns.iter().position(|c| c == key) {
            self.values[i] = value;
        } else {
            self.columns.push(key.to_string());
            self.values.push(value);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Merge `other`'s entries into `self`, `other` winning on conflicts —
    /// used when a later, higher-fidelity dialect (e.g. `header2`, UTF-16)
    /// is read after an earlier one.
    pub fn merge_from(&mut self, other: &HeaderTable) {
        if self.preamble.is_empty() {
            self.preamble = other.preamble.clone();
            self.uses_crlf = other.uses_crlf;
            self.trailing_newline = other.trailing_newline;
        }
        for key in other.keys() {
            self.set(key, other.get(key).unwrap().to_string());
        }
    }

    fn newline(&self) -> &'static str {
        if self.uses_crlf {
            "\r\n"
        } else {
            "\n"
        }
    }

    fn to_text(&self) -> String {
        let nl = self.newline();
        let mut lines: Vec<String> = self.preamble.clone();
        lines.push(self.columns.join("\t"));
        lines.push(self.values.join("\t"));
        let mut text = lines.join(nl);
        if self.trailing_newline {
            text.push_str(nl);
        }
        text
    }

    fn from_text(text: &str) -> Self {
        let uses_crlf = text.contains("\r\n");
        let trailing_newline = text.ends_with('\n');
        let raw_lines: Vec<&str> = text.split(['\r', '\n']).filter(|l| !l.is_empty()).collect();

        for i in 0..raw_lines.len().saturating_sub(1) {
            if raw_lines[i].contains('\t') && raw_lines[i + 1].contains('\t') {
                let columns: Vec<String> = raw_lines[i].split('\t').map(str::to_string).collect();
                let values: Vec<String> = raw_lines[i + 1].split('\t').map(str::to_string).collect();
                let preamble = raw_lines[..i].iter().map(|s| s.to_string()).collect();
                return Self {
                    preamble,
                    columns,
                    values,
                    uses_crlf,
                    trailing_newline,
                };
            }
        }

        // Fallback: one `key<TAB>value` pair per line (seen in very old
        // images, spec.md §4.5).
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for line in &raw_lines {
            if let Some((k, v)) = line.split_once('\t') {
                columns.push(k.to_string());
                values.push(v.to_string());
            }
        }
        Self {
            preamble: Vec::new(),
            columns,
            values,
            uses_crlf,
            trailing_newline,
        }
    }

    pub fn parse_xheader(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes).into_owned();
        Self::from_text(strip_bom(&text))
    }

    pub fn encode_xheader(&self) -> Vec<u8> {
        self.to_text().into_bytes()
    }

    pub fn parse_header2(bytes: &[u8]) -> Self {
        let utf16: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let text = String::from_utf16_lossy(&utf16);
        Self::from_text(strip_bom(&text))
    }

    pub fn encode_header2(&self) -> Vec<u8> {
        let text = self.to_text();
        let mut out = Vec::with_capacity(text.len() * 2);
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    pub fn parse_header(bytes: &[u8], codepage: Codepage) -> Self {
        let text = codepage.decode(bytes);
        Self::from_text(strip_bom(&text))
    }

    pub fn encode_header(&self, codepage: Codepage) -> Vec<u8> {
        codepage.encode(&self.to_text())
    }
}

fn strip_bom(text: &str) -> &str {
    text.trim_start_matches('\u{FEFF}')
}

/// A normalized acquisition/system date, stored internally as
/// `YYYY MM DD HH MM SS tz` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedDate {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl NormalizedDate {
    /// Parse the libewf-style space-separated acquisition date
    /// (`"2024 3 15 10 30 0"`) used inside `header`/`header2`/`xheader`
    /// payloads.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split_whitespace().collect();
        if parts.len() < 6 {
            return None;
        }
        Some(Self {
            year: parts[0].parse().ok()?,
            month: parts[1].parse().ok()?,
            day: parts[2].parse().ok()?,
            hour: parts[3].parse().ok()?,
            minute: parts[4].parse().ok()?,
            second: parts[5].parse().ok()?,
        })
    }

    pub fn to_internal(self) -> String {
        format!(
            "{:04} {:02} {:02} {:02} {:02} {:02} +0000",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    pub fn render(self, format: DateFormat) -> String {
        const MONTHS: [&str; 12] = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        let month_name = MONTHS.get((self.month as usize).wrapping_sub(1)).copied().unwrap_or("???");
        match format {
            DateFormat::Ctime => format!(
                "{} {:2} {:02}:{:02}:{:02} {:04}",
                month_name, self.day, self.hour, self.minute, self.second, self.year
            ),
            DateFormat::DayMonth => format!(
                "{:02}/{:02}/{:04} {:02}:{:02}:{:02}",
                self.day, self.month, self.year, self.hour, self.minute, self.second
            ),
            DateFormat::MonthDay => format!(
                "{:02}/{:02}/{:04} {:02}:{:02}:{:02}",
                self.month, self.day, self.year, self.hour, self.minute, self.second
            ),
            DateFormat::Iso8601 => format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
                self.year, self.month, self.day, self.hour, self.minute, self.second
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xheader_roundtrip_is_byte_identical() {
        let payload = b"1\nmain\ncase_number\texaminer_name\n12-3\tJ. Doe\n".to_vec();
        let table = HeaderTable::parse_xheader(&payload);
        assert_eq!(table.get("case_number"), Some("12-3"));
        assert_eq!(table.encode_xheader(), payload);
    }

    #[test]
    fn header2_roundtrip_is_byte_identical() {
        let text = "1\r\nmain\r\ncase_number\texaminer_name\r\n7\tJ. Doe\r\n";
        let mut payload = Vec::new();
        for unit in text.encode_utf16() {
            payload.extend_from_slice(&unit.to_le_bytes());
        }
        let table = HeaderTable::parse_header2(&payload);
        assert_eq!(table.get("case_number"), Some("7"));
        assert_eq!(table.encode_header2(), payload);
    }

    #[test]
    fn date_parse_and_render() {
        let d = NormalizedDate::parse("2024 3 15 10 30 0").unwrap();
        assert_eq!(d.to_internal(), "2024 03 15 10 30 00 +0000");
        assert_eq!(d.render(DateFormat::Iso8601), "2024-03-15T10:30:00Z");
    }
}
