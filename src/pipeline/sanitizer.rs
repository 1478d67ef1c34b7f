//! Allowlist HTML filter for chat text.
//!
//! The input is parsed as a fragment into a small tree. Elements outside
//! `ALLOWED_TAGS` are unwrapped (their children take their place) and
//! every `on*` attribute is removed from the elements that remain. Other
//! attribute vectors such as `href="javascript:..."` are left alone.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Elements that survive sanitization.
const ALLOWED_TAGS: &[&str] = &[
    "b", "i", "u", "strong", "em", "br", "a", "p", "div", "span",
];

/// Elements that never have children or an end tag.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text up to the matching end tag.
const RAW_TEXT_TAGS: &[&str] = &[
    "script", "style", "textarea", "title", "xmp", "noscript", "iframe", "noembed", "noframes",
];

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^<(/)?([A-Za-z][A-Za-z0-9:_-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
        .expect("tag pattern is valid")
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("attribute pattern is valid")
});

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9A-Fa-f]{1,6})|(amp|lt|gt|quot|apos|nbsp));")
        .expect("entity pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    fn new(name: String, attrs: Vec<(String, String)>) -> Self {
        Self {
            name,
            attrs,
            children: Vec::new(),
        }
    }
}

/// Filters `input` down to allowlisted markup.
pub fn sanitize(input: &str) -> String {
    let nodes = filter(parse_fragment(input));
    let mut out = String::with_capacity(input.len());
    serialize(&nodes, &mut out);
    out
}

fn filter(nodes: Vec<Node>) -> Vec<Node> {
    let mut kept = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Text(text) => kept.push(Node::Text(text)),
            Node::Element(mut element) => {
                let children = filter(std::mem::take(&mut element.children));
                if ALLOWED_TAGS.contains(&element.name.as_str()) {
                    element.attrs.retain(|(name, _)| !name.starts_with("on"));
                    element.children = children;
                    kept.push(Node::Element(element));
                } else {
                    kept.extend(children);
                }
            }
        }
    }
    kept
}

fn parse_fragment(input: &str) -> Vec<Node> {
    let mut builder = TreeBuilder::default();
    let mut pos = 0;

    while pos < input.len() {
        let Some(offset) = input[pos..].find('<') else {
            builder.text(&decode_entities(&input[pos..]));
            break;
        };
        if offset > 0 {
            builder.text(&decode_entities(&input[pos..pos + offset]));
            pos += offset;
        }

        let rest = &input[pos..];
        if let Some(len) = markup_declaration_len(rest) {
            pos += len;
            continue;
        }

        let Some(caps) = TAG_RE.captures(rest) else {
            builder.text("<");
            pos += 1;
            continue;
        };
        let tag_len = caps[0].len();
        let name = caps[2].to_ascii_lowercase();
        pos += tag_len;

        if caps.get(1).is_some() {
            builder.close(&name);
            continue;
        }

        let attrs = parse_attributes(caps.get(3).map_or("", |m| m.as_str()));
        if VOID_TAGS.contains(&name.as_str()) {
            builder.leaf(Element::new(name, attrs));
        } else if RAW_TEXT_TAGS.contains(&name.as_str()) {
            let (content, consumed) = raw_text_content(&input[pos..], &name);
            let mut element = Element::new(name, attrs);
            if !content.is_empty() {
                element.children.push(Node::Text(content.to_string()));
            }
            builder.leaf(element);
            pos += consumed;
        } else {
            builder.open(Element::new(name, attrs));
        }
    }

    builder.finish()
}

/// Length of a comment, doctype or processing instruction at the start of
/// `rest`. These are dropped from the output.
fn markup_declaration_len(rest: &str) -> Option<usize> {
    if let Some(body) = rest.strip_prefix("<!--") {
        return Some(body.find("-->").map_or(rest.len(), |end| 4 + end + 3));
    }
    if rest.starts_with("<!") || rest.starts_with("<?") {
        return Some(rest.find('>').map_or(rest.len(), |end| end + 1));
    }
    None
}

/// Returns the raw text before `</name` and how many bytes to skip,
/// including the end tag.
fn raw_text_content<'a>(rest: &'a str, name: &str) -> (&'a str, usize) {
    let lowered = rest.to_ascii_lowercase();
    let needle = format!("</{name}");
    let mut search_from = 0;

    while let Some(found) = lowered[search_from..].find(&needle) {
        let start = search_from + found;
        let after = start + needle.len();
        let boundary = lowered[after..].chars().next();
        if matches!(boundary, None | Some('>' | '/')) || boundary.is_some_and(char::is_whitespace)
        {
            let end = lowered[after..].find('>').map_or(rest.len(), |gt| after + gt + 1);
            return (&rest[..start], end);
        }
        search_from = after;
    }

    (rest, rest.len())
}

fn parse_attributes(source: &str) -> Vec<(String, String)> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for caps in ATTR_RE.captures_iter(source) {
        let name = caps[1].to_ascii_lowercase();
        if attrs.iter().any(|(existing, _)| *existing == name) {
            continue;
        }
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or(String::new(), |m| decode_entities(m.as_str()));
        attrs.push((name, value));
    }
    attrs
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let decoded = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16)
                    .ok()
                    .and_then(char::from_u32)
            } else {
                match &caps[3] {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    _ => Some('\u{a0}'),
                }
            };
            decoded
                .filter(|c| *c != '\0')
                .unwrap_or(char::REPLACEMENT_CHARACTER)
                .to_string()
        })
        .into_owned()
}

#[derive(Default)]
struct TreeBuilder {
    roots: Vec<Node>,
    open: Vec<Element>,
}

impl TreeBuilder {
    fn push_node(&mut self, node: Node) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let siblings = match self.open.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.roots,
        };
        if let Some(Node::Text(previous)) = siblings.last_mut() {
            previous.push_str(text);
        } else {
            siblings.push(Node::Text(text.to_string()));
        }
    }

    fn leaf(&mut self, element: Element) {
        self.push_node(Node::Element(element));
    }

    fn open(&mut self, element: Element) {
        self.open.push(element);
    }

    /// Closes the innermost open element named `name` along with everything
    /// opened inside it. End tags with no open counterpart are ignored.
    fn close(&mut self, name: &str) {
        let Some(index) = self.open.iter().rposition(|element| element.name == name) else {
            return;
        };
        while self.open.len() > index {
            self.pop();
        }
    }

    fn pop(&mut self) {
        if let Some(element) = self.open.pop() {
            self.push_node(Node::Element(element));
        }
    }

    fn finish(mut self) -> Vec<Node> {
        while !self.open.is_empty() {
            self.pop();
        }
        self.roots
    }
}

fn serialize(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => escape_into(text, false, out),
            Node::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for (name, value) in &element.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&element.name.as_str()) {
                    continue;
                }
                serialize(&element.children, out);
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' if attribute => out.push_str("&quot;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_tag_is_unwrapped_to_text() {
        let out = sanitize("<script>alert(1)</script>");
        assert_eq!(out, "alert(1)");
        assert!(!out.contains("<script"));
    }

    #[test]
    fn markup_inside_script_is_neutralised() {
        let out = sanitize("<script><b onclick=\"x()\">hi</b></script>");
        assert_eq!(out, "&lt;b onclick=\"x()\"&gt;hi&lt;/b&gt;");
    }

    #[test]
    fn allowlisted_markup_passes_through() {
        let input = "<p>Hello <b>bold</b> <em>and</em> <a href=\"https://example.com\">link</a><br></p>";
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn event_handlers_are_stripped_from_kept_elements() {
        let out = sanitize("<div onclick=\"steal()\" class=\"x\" ONMOUSEOVER='y'>hi</div>");
        assert_eq!(out, "<div class=\"x\">hi</div>");
    }

    #[test]
    fn disallowed_wrapper_keeps_allowed_descendants() {
        let out = sanitize("<table><tr><td><strong>cell</strong></td></tr></table>");
        assert_eq!(out, "<strong>cell</strong>");
    }

    #[test]
    fn img_with_handler_disappears() {
        let out = sanitize("before<img src=x onerror=alert(1)>after");
        assert_eq!(out, "beforeafter");
    }

    #[test]
    fn javascript_href_is_not_rewritten() {
        let out = sanitize("<a href=\"javascript:alert(1)\">x</a>");
        assert_eq!(out, "<a href=\"javascript:alert(1)\">x</a>");
    }

    #[test]
    fn comments_and_doctype_are_dropped() {
        assert_eq!(sanitize("<!DOCTYPE html>a<!-- secret -->b"), "ab");
        assert_eq!(sanitize("a<!-- never closed"), "a");
    }

    #[test]
    fn malformed_input_degrades_gracefully() {
        assert_eq!(sanitize("1 < 2 and 3 > 2"), "1 &lt; 2 and 3 &gt; 2");
        assert_eq!(sanitize("<b>unclosed"), "<b>unclosed</b>");
        assert_eq!(sanitize("stray</i> end"), "stray end");
        assert_eq!(sanitize("<b><i>x</b>y"), "<b><i>x</i></b>y");
        assert_eq!(sanitize("<script>never closed"), "never closed");
    }

    #[test]
    fn tag_names_are_case_insensitive() {
        assert_eq!(sanitize("<B>x</B><SCRIPT>y</SCRIPT>"), "<b>x</b>y");
    }

    #[test]
    fn entities_are_normalised() {
        assert_eq!(sanitize("fish &amp; chips &lt;3 &#65;&#x42;"), "fish &amp; chips &lt;3 AB");
        assert_eq!(sanitize("a & b"), "a &amp; b");
        assert_eq!(sanitize("a&nbsp;b"), "a&nbsp;b");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "<b>hi</b><script>x</script>",
            "<div onclick=a title='\"q\" & <r>'>t &amp; u</div>",
            "<p>1 < 2<br/>3</p><style>p{}</style>",
            "<span>nested <u><i>deep</i></u></span><iframe src=x></iframe>",
            "plain text",
            "",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn self_closing_syntax_on_void_element() {
        assert_eq!(sanitize("a<br/>b<br />c"), "a<br>b<br>c");
    }
}
