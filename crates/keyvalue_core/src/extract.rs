//! Scanning of `{{#keyvalue: category | key | value }}` directives.
//!
//! Parsing is permissive: a directive that does not carry exactly three
//! `|`-separated parameters is skipped without an error, so a page with a
//! typo still saves the directives that are well formed.

use crate::triple::Triple;

pub const DEFAULT_MARKER: &str = "keyvalue";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extractor {
    marker: String,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

/// One `{{ ... }}` span whose head matched the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirectiveSpan<'a> {
    start: usize,
    end: usize,
    params: &'a str,
}

impl Extractor {
    /// `marker` is the parser function name without the leading `#`.
    pub fn new(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        let marker = marker.trim().trim_start_matches('#').trim();
        let marker = if marker.is_empty() {
            DEFAULT_MARKER
        } else {
            marker
        };
        Self {
            marker: marker.to_string(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Returns every well-formed directive in `text` in order of appearance.
    pub fn extract(&self, text: &str) -> Vec<Triple> {
        self.directives(text)
            .into_iter()
            .filter_map(|span| parse_params(span.params))
            .collect()
    }

    /// Replaces every well-formed directive with its value. Malformed
    /// directives are kept verbatim.
    pub fn render(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut copied = 0usize;
        for span in self.directives(text) {
            out.push_str(&text[copied..span.start]);
            match parse_params(span.params) {
                Some(triple) => out.push_str(&triple.value),
                None => out.push_str(&text[span.start..span.end]),
            }
            copied = span.end;
        }
        out.push_str(&text[copied..]);
        out
    }

    fn directives<'a>(&self, text: &'a str) -> Vec<DirectiveSpan<'a>> {
        let bytes = text.as_bytes();
        let mut out = Vec::new();
        let mut cursor = 0usize;

        while cursor + 1 < bytes.len() {
            if bytes[cursor] == b'{' && bytes[cursor + 1] == b'{' {
                let head = cursor + 2;
                if let Some(offset) = self.match_head(&text[head..]) {
                    let params_start = head + offset;
                    let Some(close) = text[params_start..].find("}}") else {
                        break;
                    };
                    let params_end = params_start + close;
                    out.push(DirectiveSpan {
                        start: cursor,
                        end: params_end + 2,
                        params: &text[params_start..params_end],
                    });
                    cursor = params_end + 2;
                    continue;
                }
            }
            cursor += 1;
        }

        out
    }

    /// Matches `\s*#marker\s*:` at the start of `rest` and returns the byte
    /// length consumed.
    fn match_head(&self, rest: &str) -> Option<usize> {
        let trimmed = rest.trim_start();
        let after_hash = trimmed.strip_prefix('#')?;
        let name = after_hash.get(..self.marker.len())?;
        if !name.eq_ignore_ascii_case(&self.marker) {
            return None;
        }
        let tail = after_hash[self.marker.len()..].trim_start();
        let after_colon = tail.strip_prefix(':')?;
        Some(rest.len() - after_colon.len())
    }
}

/// Scans `text` with the default marker.
pub fn extract_triples(text: &str) -> Vec<Triple> {
    Extractor::default().extract(text)
}

fn parse_params(params: &str) -> Option<Triple> {
    let mut parts = params.split('|').map(str::trim);
    let category = parts.next()?;
    let key = parts.next()?;
    let value = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Triple::new(category, key, value))
}

#[cfg(test)]
mod tests {
    use super::{Extractor, extract_triples};
    use crate::triple::Triple;

    #[test]
    fn extract_handles_pricing_scenario() {
        let text = "{{#keyvalue: Pricing | usd | 9.99 }} junk {{#keyvalue: Pricing|usd|19.99}} {{#keyvalue: Specs | weight}}";
        let triples = extract_triples(text);
        assert_eq!(
            triples,
            vec![
                Triple::new("Pricing", "usd", "9.99"),
                Triple::new("Pricing", "usd", "19.99"),
            ]
        );
    }

    #[test]
    fn extract_returns_empty_without_directives() {
        assert!(extract_triples("").is_empty());
        assert!(extract_triples("plain text {{Template|a|b|c}} [[Link]]").is_empty());
        assert!(extract_triples("{{#keyvalue: A | B | C").is_empty());
    }

    #[test]
    fn extract_reads_adjacent_directives() {
        let triples = extract_triples("{{#keyvalue:A|a|1}}{{#keyvalue:B|b|2}}");
        assert_eq!(
            triples,
            vec![Triple::new("A", "a", "1"), Triple::new("B", "b", "2")]
        );
    }

    #[test]
    fn extract_drops_wrong_parameter_counts() {
        let text = "{{#keyvalue: A }} {{#keyvalue: A | b }} {{#keyvalue: A | b | c | d }} {{#keyvalue: ok | k | v }}";
        assert_eq!(extract_triples(text), vec![Triple::new("ok", "k", "v")]);
    }

    #[test]
    fn extract_keeps_empty_fields() {
        let triples = extract_triples("{{#keyvalue: | | }}{{#keyvalue:Cat||}}");
        assert_eq!(
            triples,
            vec![Triple::new("", "", ""), Triple::new("Cat", "", "")]
        );
    }

    #[test]
    fn extract_matches_across_lines_but_not_past_closing_braces() {
        let text = "{{#keyvalue:\n  Specs |\n  weight |\n  2kg\n}}";
        assert_eq!(
            extract_triples(text),
            vec![Triple::new("Specs", "weight", "2kg")]
        );

        // The first span ends at its own `}}` and has only two parameters.
        let text = "{{#keyvalue: A | b }} | c }}";
        assert!(extract_triples(text).is_empty());
    }

    #[test]
    fn extract_marker_is_case_insensitive_and_whitespace_tolerant() {
        let text = "{{ #KeyValue : A | b | c }} {{#KEYVALUE:D|e|f}}";
        assert_eq!(
            extract_triples(text),
            vec![Triple::new("A", "b", "c"), Triple::new("D", "e", "f")]
        );
        assert!(extract_triples("{{#keyvalues: A | b | c }}").is_empty());
        assert!(extract_triples("{{keyvalue: A | b | c }}").is_empty());
    }

    #[test]
    fn extract_finds_directive_after_unrelated_open_braces() {
        let text = "{{{#keyvalue:A|b|c}}} {{Infobox {{#keyvalue:D|e|f}}";
        assert_eq!(
            extract_triples(text),
            vec![Triple::new("A", "b", "c"), Triple::new("D", "e", "f")]
        );
    }

    #[test]
    fn extract_uses_configured_marker() {
        let extractor = Extractor::new("#data");
        assert_eq!(extractor.marker(), "data");
        let text = "{{#data: A | b | c }} {{#keyvalue: D | e | f }}";
        assert_eq!(extractor.extract(text), vec![Triple::new("A", "b", "c")]);
    }

    #[test]
    fn extracted_triples_reextract_from_their_directive() {
        let text = "{{#keyvalue: Pricing | usd | 9.99 }}\n{{#keyvalue:Ünïcode|ключ| value with spaces }}{{#keyvalue:||}}";
        let extractor = Extractor::default();
        let triples = extractor.extract(text);
        assert_eq!(triples.len(), 3);
        for triple in triples {
            let again = extractor.extract(&triple.to_directive(extractor.marker()));
            assert_eq!(again, vec![triple]);
        }
    }

    #[test]
    fn render_replaces_directives_with_values() {
        let extractor = Extractor::default();
        let text = "Price: {{#keyvalue: Pricing | usd | 9.99 }} USD, weight {{#keyvalue: Specs | weight}}.";
        assert_eq!(
            extractor.render(text),
            "Price: 9.99 USD, weight {{#keyvalue: Specs | weight}}."
        );
        assert_eq!(extractor.render("no directives"), "no directives");
    }
}
