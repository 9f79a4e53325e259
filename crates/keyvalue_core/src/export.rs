use std::io::Write;

use crate::error::{KeyValueError, Result};
use crate::triple::Triple;

pub const DEFAULT_DELIMITER: char = ',';
pub const DEFAULT_QUOTE: char = '"';
pub const EXPORT_FILENAME: &str = "keyvalues.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: char,
    pub quote: char,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            quote: DEFAULT_QUOTE,
        }
    }
}

impl CsvOptions {
    pub fn new(delimiter: char, quote: char) -> Result<Self> {
        let options = Self { delimiter, quote };
        options.validate()?;
        Ok(options)
    }

    /// Parses single-character option strings; empty strings fall back to
    /// the defaults.
    pub fn parse(delimiter: Option<&str>, quote: Option<&str>) -> Result<Self> {
        Self::new(
            parse_char("delimiter", delimiter, DEFAULT_DELIMITER)?,
            parse_char("quote", quote, DEFAULT_QUOTE)?,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.delimiter == self.quote {
            return Err(KeyValueError::InvalidCsvOptions(format!(
                "delimiter and quote must differ (both are {:?})",
                self.delimiter
            )));
        }
        // Tab is the only control character allowed, as a delimiter for TSV.
        for (name, ch) in [("delimiter", self.delimiter), ("quote", self.quote)] {
            if ch.is_control() && ch != '\t' {
                return Err(KeyValueError::InvalidCsvOptions(format!(
                    "{name} cannot be a control character (got {ch:?})"
                )));
            }
        }
        Ok(())
    }
}

/// Writes one `key,value` row per triple of a single category.
pub fn write_category_csv<W: Write>(
    writer: &mut W,
    triples: &[Triple],
    options: &CsvOptions,
) -> Result<usize> {
    options.validate()?;
    for triple in triples {
        write_row(writer, &[triple.key.as_str(), triple.value.as_str()], options)?;
    }
    Ok(triples.len())
}

/// Writes one `category,key,value` row per triple.
pub fn write_all_csv<W: Write>(
    writer: &mut W,
    triples: &[Triple],
    options: &CsvOptions,
) -> Result<usize> {
    options.validate()?;
    for triple in triples {
        write_row(
            writer,
            &[
                triple.category.as_str(),
                triple.key.as_str(),
                triple.value.as_str(),
            ],
            options,
        )?;
    }
    Ok(triples.len())
}

fn write_row<W: Write>(writer: &mut W, fields: &[&str], options: &CsvOptions) -> Result<()> {
    let mut line = String::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            line.push(options.delimiter);
        }
        push_field(&mut line, field, options);
    }
    line.push('\n');
    writer.write_all(line.as_bytes())?;
    Ok(())
}

fn push_field(out: &mut String, field: &str, options: &CsvOptions) {
    let needs_quotes = field.chars().any(|ch| {
        ch == options.delimiter || ch == options.quote || matches!(ch, '\n' | '\r' | '\t' | ' ')
    });
    if !needs_quotes {
        out.push_str(field);
        return;
    }
    out.push(options.quote);
    for ch in field.chars() {
        if ch == options.quote {
            out.push(options.quote);
        }
        out.push(ch);
    }
    out.push(options.quote);
}

fn parse_char(name: &str, value: Option<&str>, default: char) -> Result<char> {
    let Some(value) = value.filter(|value| !value.is_empty()) else {
        return Ok(default);
    };
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(ch),
        _ => Err(KeyValueError::InvalidCsvOptions(format!(
            "{name} must be a single character, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_all(triples: &[Triple], options: &CsvOptions) -> String {
        let mut out = Vec::new();
        write_all_csv(&mut out, triples, options).expect("write csv");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn default_quote_is_a_real_quote_character() {
        let options = CsvOptions::default();
        assert_eq!(options.delimiter, ',');
        assert_eq!(options.quote, '"');
    }

    #[test]
    fn category_export_writes_key_value_rows() {
        let mut out = Vec::new();
        let written = write_category_csv(
            &mut out,
            &[
                Triple::new("Pricing", "eur", "8.50"),
                Triple::new("Pricing", "usd", "9.99"),
            ],
            &CsvOptions::default(),
        )
        .expect("write");
        assert_eq!(written, 2);
        assert_eq!(String::from_utf8(out).expect("utf8"), "eur,8.50\nusd,9.99\n");
    }

    #[test]
    fn all_export_quotes_fields_that_need_it() {
        let csv = render_all(
            &[
                Triple::new("Specs", "size", "1,2"),
                Triple::new("Specs", "note", "say \"hi\""),
                Triple::new("Specs", "multi", "a\nb"),
            ],
            &CsvOptions::default(),
        );
        assert_eq!(
            csv,
            "Specs,size,\"1,2\"\nSpecs,note,\"say \"\"hi\"\"\"\nSpecs,multi,\"a\nb\"\n"
        );
    }

    #[test]
    fn custom_delimiter_and_quote_are_used() {
        let options = CsvOptions::new(';', '\'').expect("options");
        let csv = render_all(&[Triple::new("A", "k", "x;y")], &options);
        assert_eq!(csv, "A;k;'x;y'\n");
    }

    #[test]
    fn delimiter_equal_to_quote_is_rejected() {
        let err = CsvOptions::new(',', ',').expect_err("must fail");
        assert!(err.to_string().contains("must differ"));
        let mut out = Vec::new();
        let bad = CsvOptions {
            delimiter: ',',
            quote: ',',
        };
        assert!(write_all_csv(&mut out, &[], &bad).is_err());
    }

    #[test]
    fn parse_falls_back_to_defaults_and_rejects_long_values() {
        assert_eq!(
            CsvOptions::parse(None, Some("")).expect("defaults"),
            CsvOptions::default()
        );
        assert_eq!(
            CsvOptions::parse(Some("\t"), None).expect("tab").delimiter,
            '\t'
        );
        assert!(CsvOptions::parse(Some(",,"), None).is_err());
    }

    #[test]
    fn control_characters_other_than_tab_are_rejected() {
        for ch in ['\0', '\n', '\r', '\u{1b}', '\u{7f}'] {
            let err = CsvOptions::new(ch, '"').expect_err("delimiter must fail");
            assert!(err.to_string().contains("control character"));
            assert!(CsvOptions::new(',', ch).is_err());
        }
        assert!(CsvOptions::new('\t', '"').is_ok());
    }

    #[test]
    fn fields_with_spaces_or_tabs_are_quoted() {
        let csv = render_all(
            &[Triple::new("A", "two words", "x\ty"), Triple::new("A", "k", "plain")],
            &CsvOptions::default(),
        );
        assert_eq!(csv, "A,\"two words\",\"x\ty\"\nA,k,plain\n");
    }
}
