//! Pretty-printing of XML job payloads.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::Event;

/// Re-indent `data` if it is a single well-formed XML document.
///
/// Returns `None` for anything else: plain text, fragments with several
/// roots, unbalanced tags or text outside the root element.
pub fn pretty_xml(data: &str) -> Option<String> {
    let mut reader = Reader::from_str(data);
    reader.config_mut().trim_text(true);

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        let event = reader.read_event().ok()?;
        match &event {
            Event::Eof => break,
            Event::Start(_) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.checked_sub(1)?;
            }
            Event::Empty(_) => {
                if depth == 0 {
                    roots += 1;
                }
            }
            Event::Text(_) | Event::CData(_) if depth == 0 => return None,
            _ => {}
        }
        writer.write_event(event).ok()?;
    }

    if depth != 0 || roots != 1 {
        return None;
    }

    String::from_utf8(writer.into_inner()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indents_nested_elements() {
        let pretty = pretty_xml("<order><line qty=\"2\">A</line><line/></order>").unwrap_or_default();
        assert!(pretty.starts_with("<order>"));
        assert!(pretty.contains("\n  <line qty=\"2\">A</line>"));
        assert!(pretty.trim_end().ends_with("</order>"));
    }

    #[test]
    fn rejects_non_xml() {
        assert_eq!(pretty_xml("bla bla"), None);
        assert_eq!(pretty_xml(""), None);
    }

    #[test]
    fn rejects_malformed_xml() {
        assert_eq!(pretty_xml("<a><b></a>"), None);
        assert_eq!(pretty_xml("<a>"), None);
        assert_eq!(pretty_xml("<a/><b/>"), None);
    }
}
