//! Structural parsing of a previous artifact into test units.
//!
//! A unit starts at an `@operation` marker line and runs until the next
//! marker or the end of the text. Engine annotations are removed wherever
//! they appear, so re-emitting parsed text never stacks old block headers
//! on top of new ones.

use super::{TestUnit, UnitSyntax};
use crate::contract::OperationId;

/// A unit that could not be isolated from the previous artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitParseFailure {
    /// 1-based line of the marker that opened the unit.
    pub line: usize,
    pub reason: String,
}

/// Result of parsing a previous artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArtifact {
    /// Text before the first unit (imports, fixtures), annotations removed.
    pub preamble: String,
    /// Units in order of appearance.
    pub units: Vec<TestUnit>,
    pub failures: Vec<UnitParseFailure>,
}

/// Segment of lines opened by one marker.
struct Segment<'a> {
    line: usize,
    operation: &'a str,
    lines: Vec<&'a str>,
}

/// Split `text` into units. Never fails: malformed units are reported in
/// [`ParsedArtifact::failures`] and left out.
pub fn parse_units(text: &str, syntax: UnitSyntax) -> ParsedArtifact {
    let mut preamble: Vec<&str> = Vec::new();
    let mut segments: Vec<Segment<'_>> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        if syntax.is_annotation(line) {
            continue;
        }
        if let Some(operation) = syntax.parse_marker(line) {
            segments.push(Segment {
                line: idx + 1,
                operation,
                lines: Vec::new(),
            });
            continue;
        }
        match segments.last_mut() {
            Some(segment) => segment.lines.push(line),
            None => preamble.push(line),
        }
    }

    let mut parsed = ParsedArtifact {
        preamble: trim_blank_lines(&preamble),
        ..Default::default()
    };

    for segment in segments {
        match build_unit(&segment, syntax) {
            Ok(unit) => parsed.units.push(unit),
            Err(reason) => parsed.failures.push(UnitParseFailure {
                line: segment.line,
                reason,
            }),
        }
    }

    parsed
}

fn build_unit(segment: &Segment<'_>, syntax: UnitSyntax) -> Result<TestUnit, String> {
    let operation: OperationId = segment
        .operation
        .parse()
        .map_err(|e| format!("bad operation marker: {e}"))?;

    let name = segment
        .lines
        .iter()
        .find_map(|line| syntax.declared_name(line))
        .ok_or_else(|| format!("no test declaration follows the marker for {operation}"))?;

    Ok(TestUnit {
        name,
        operation,
        body: trim_blank_lines(&segment.lines),
    })
}

/// Join lines, dropping leading and trailing blank ones.
pub(crate) fn trim_blank_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end]
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREVIOUS: &str = r#"# [contract-sync] artifact v2 for contract petstore
import requests

BASE = "https://api.example.com"

# [contract-sync] preserved from previous version (1 units)
# @operation GET /a
def u1(client):
    response = client.get("/a")
    assert response.status_code == 200

# [contract-sync] regenerated for new or modified operations (1 units)
# @operation POST /b
@pytest.mark.smoke
def u2(client):
    # ordinary comment survives
    response = client.post("/b", json={})
    assert response.status_code == 201
"#;

    #[test]
    fn test_parse_units_and_preamble() {
        let parsed = parse_units(PREVIOUS, UnitSyntax::Pytest);

        assert!(parsed.failures.is_empty());
        assert_eq!(
            parsed.preamble,
            "import requests\n\nBASE = \"https://api.example.com\""
        );

        let names: Vec<&str> = parsed.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["u1", "u2"]);
        assert_eq!(parsed.units[0].operation.to_string(), "GET /a");
        assert_eq!(parsed.units[1].operation.to_string(), "POST /b");
    }

    #[test]
    fn test_annotations_stripped_from_unit_bodies() {
        let parsed = parse_units(PREVIOUS, UnitSyntax::Pytest);
        for unit in &parsed.units {
            assert!(!unit.body.contains("[contract-sync]"), "{}", unit.body);
            assert!(!unit.body.contains("@operation"));
        }
        assert!(parsed.units[1].body.starts_with("@pytest.mark.smoke\ndef u2(client):"));
        assert!(parsed.units[1].body.contains("# ordinary comment survives"));
        assert!(parsed.units[0].body.ends_with("assert response.status_code == 200"));
    }

    #[test]
    fn test_malformed_marker_dropped() {
        let text = "\
# @operation FETCH /a
def test_a():
    pass

# @operation GET /b
def test_b():
    pass
";
        let parsed = parse_units(text, UnitSyntax::Pytest);
        assert_eq!(parsed.units.len(), 1);
        assert_eq!(parsed.units[0].name, "test_b");
        assert_eq!(parsed.failures.len(), 1);
        assert_eq!(parsed.failures[0].line, 1);
        // The broken unit's lines do not leak into neighbours.
        assert!(!parsed.units[0].body.contains("test_a"));
    }

    #[test]
    fn test_marker_without_declaration_dropped() {
        let text = "\
# @operation GET /a
x = 1
# @operation GET /b
def test_b():
    pass
";
        let parsed = parse_units(text, UnitSyntax::Pytest);
        assert_eq!(parsed.units.len(), 1);
        assert_eq!(parsed.failures.len(), 1);
        assert!(parsed.failures[0].reason.contains("GET /a"));
    }

    #[test]
    fn test_parse_rust_units() {
        let text = "\
// [contract-sync] artifact v1 for contract api
use crate::client::Client;

// [contract-sync] regenerated for new or modified operations (1 units)
// @operation GET /pets
#[tokio::test]
async fn get_pets_ok() {
    let response = Client::default().get(\"/pets\").await;
    assert_eq!(response.status().as_u16(), 200);
}
";
        let parsed = parse_units(text, UnitSyntax::Rust);
        assert!(parsed.failures.is_empty());
        assert_eq!(parsed.preamble, "use crate::client::Client;");
        assert_eq!(parsed.units.len(), 1);
        assert_eq!(parsed.units[0].name, "get_pets_ok");
        assert!(parsed.units[0].body.starts_with("#[tokio::test]"));
    }

    #[test]
    fn test_empty_text() {
        let parsed = parse_units("", UnitSyntax::Pytest);
        assert_eq!(parsed, ParsedArtifact::default());
    }

    #[test]
    fn test_trim_blank_lines() {
        assert_eq!(trim_blank_lines(&["", "  a  ", "", "b", "   "]), "  a\n\nb");
        assert_eq!(trim_blank_lines(&["", " "]), "");
    }
}
