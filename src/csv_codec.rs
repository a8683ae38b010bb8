//! Collection CSV dialect: header names, quoting and tolerant parsing.
//!
//! Export always writes comma-separated, fully quoted fields with CRLF line
//! endings behind a UTF-8 BOM. Import accepts comma or semicolon files as
//! spreadsheets in different locales save them.

pub const BOM: char = '\u{feff}';

pub const EXPORT_HEADER: [&str; 8] = [
    "card_id",
    "quantity",
    "name",
    "set_name",
    "rarity",
    "price_eur",
    "paid_eur",
    "condition",
];

pub fn quote_field(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn encode_record<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| quote_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix(BOM).unwrap_or(text)
}

pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// `;` when the header line has strictly more semicolons than commas.
pub fn detect_delimiter(header_line: &str) -> char {
    let semis = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    if semis > commas {
        ';'
    } else {
        ','
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// 1-based line where the record starts.
    pub line_no: usize,
    pub fields: Vec<String>,
}

/// Splits normalized text into records. Quoted fields may contain the
/// delimiter, doubled quotes and newlines. Blank lines are dropped.
pub fn parse_records(text: &str, delimiter: char) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut line_no = 1usize;
    let mut record_start = 1usize;

    let chars: Vec<char> = text.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == '\n' {
            line_no += 1;
            if in_quotes {
                buf.push(ch);
                i += 1;
                continue;
            }
            fields.push(std::mem::take(&mut buf));
            push_record(&mut out, record_start, std::mem::take(&mut fields));
            record_start = line_no;
            i += 1;
            continue;
        }
        if ch == delimiter && !in_quotes {
            fields.push(std::mem::take(&mut buf));
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    if !buf.is_empty() || !fields.is_empty() {
        fields.push(buf);
        push_record(&mut out, record_start, fields);
    }
    out
}

fn push_record(out: &mut Vec<Record>, line_no: usize, fields: Vec<String>) {
    if fields.iter().all(|f| f.trim().is_empty()) {
        return;
    }
    out.push(Record { line_no, fields });
}

/// Case-insensitive header lookup.
pub fn find_column(header: &[String], name: &str) -> Option<usize> {
    header
        .iter()
        .position(|h| strip_bom(h).trim().eq_ignore_ascii_case(name))
}

pub fn parse_card_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

/// Non-negative integral quantity; a comma decimal separator is accepted,
/// so `"3,0"` is 3 while `"2,5"` and `"-1"` are rejected.
pub fn parse_quantity(raw: &str) -> Option<i64> {
    let v = raw.trim().replace(',', ".").parse::<f64>().ok()?;
    if !v.is_finite() || v < 0.0 || v.fract() != 0.0 || v > i64::MAX as f64 {
        return None;
    }
    Some(v as i64)
}

/// Price cell: two decimals with a dot, empty for unknown.
pub fn format_price(v: Option<f64>) -> String {
    v.map(|p| format!("{p:.2}")).unwrap_or_default()
}
