use regex::{Regex, RegexBuilder};

use docscan_core::{FieldResult, LabelMode, Record, TableResult, TableRow};

// ── Public extraction API ─────────────────────────────────────────────────────

/// Pulls labelled fields and whitespace-separated tables out of OCR text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extractor {
    label_mode: LabelMode,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label_mode(label_mode: LabelMode) -> Self {
        Self { label_mode }
    }

    pub fn label_mode(&self) -> LabelMode {
        self.label_mode
    }

    /// One value per field name, in input order. A field whose label is not
    /// found (or, in pattern mode, does not compile) maps to `""`.
    ///
    /// The label is matched case-insensitively and may be followed by an
    /// optional colon and whitespace; the value runs to the end of that line.
    /// Capture groups inside a pattern label never become the value.
    pub fn fields<S: AsRef<str>>(&self, text: &str, fields: &[S]) -> FieldResult {
        let mut result = Record::with_capacity(fields.len());
        for field in fields {
            let field = field.as_ref();
            let value = self
                .label_regex(field)
                .and_then(|re| re.captures(text).and_then(|c| c.name("value")))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            result.insert(field, value);
        }
        result
    }

    /// Locate the first line naming every column and parse the lines after it
    /// into rows. Lines with fewer tokens than columns are skipped; extra
    /// tokens are dropped.
    pub fn table<S: AsRef<str>>(text: &str, columns: &[S]) -> TableResult {
        let lines: Vec<&str> = text.split('\n').map(str::trim).filter(|l| !l.is_empty()).collect();

        let needles: Vec<String> = columns.iter().map(|c| c.as_ref().to_lowercase()).collect();
        let Some(header_idx) = lines.iter().position(|line| {
            let line = line.to_lowercase();
            needles.iter().all(|n| line.contains(n.as_str()))
        }) else {
            return Vec::new();
        };

        lines[header_idx + 1..]
            .iter()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < columns.len() {
                    return None;
                }
                let mut row = TableRow::with_capacity(columns.len());
                for (col, cell) in columns.iter().zip(parts) {
                    row.insert(col.as_ref(), cell);
                }
                Some(row)
            })
            .collect()
    }

    fn label_regex(&self, field: &str) -> Option<Regex> {
        let label = match self.label_mode {
            LabelMode::Literal => regex::escape(field),
            LabelMode::Pattern => field.to_string(),
        };
        match RegexBuilder::new(&format!(r"{label}\s*:?\s*(?P<value>[^\n]+)"))
            .case_insensitive(true)
            .build()
        {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(field, error = %e, "Field label is not a valid pattern");
                None
            }
        }
    }
}

/// [`Extractor::fields`] with literal labels.
pub fn extract_fields<S: AsRef<str>>(text: &str, fields: &[S]) -> FieldResult {
    Extractor::new().fields(text, fields)
}

pub fn extract_table<S: AsRef<str>>(text: &str, columns: &[S]) -> TableResult {
    Extractor::table(text, columns)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
