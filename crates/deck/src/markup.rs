//! Markup contract for slide documents
//!
//! Slides are authored as HTML fragments in a narrow, rendering-safe subset
//! and wrapped into a fixed 720pt x 405pt document shell. The validator
//! enforces the subset on every fragment, templated or generated.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Node, Selector};

use crate::config::StyleConfig;

/// Class marking a chart placeholder element; the converter wires images into it
pub const PLACEHOLDER_CLASS: &str = "placeholder";

const BULLET_GLYPHS: &[char] = &['•', '◦', '▪', '‣', '●', '・'];
const TEXT_CONTAINERS: &[&str] = &["p", "h1", "h2", "h3", "h4", "h5", "h6", "li"];
const GENERIC_FONTS: &[&str] = &["serif", "sans-serif", "monospace", "cursive", "fantasy", "system-ui"];
const DECORATION_PROPERTIES: &[&str] = &["background", "border", "box-shadow"];

static OPENING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").unwrap());
static CLOSING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n?```\s*$").unwrap());
static BODY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<body[\s>]").unwrap());
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static START_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<[A-Za-z][A-Za-z0-9-]*(?:\s+[^\s"'/>=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*\s*/?>"#).unwrap()
});
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\s([^\s"'/>=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});

/// One way a fragment breaks the markup contract
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("fragment is empty")]
    Empty,

    #[error("tag <{0}> is not allowed")]
    DisallowedTag(String),

    #[error("embedded vector/canvas element <{0}> is not allowed")]
    VectorGraphics(String),

    #[error("font '{font}' on <{tag}> is not an allowed font")]
    DisallowedFont { tag: String, font: String },

    #[error("manual bullet in text '{0}'; use <ul>/<ol> list items")]
    BulletGlyph(String),

    #[error("gradient on <{0}> is not allowed")]
    Gradient(String),

    #[error("{property} on <{tag}> is only allowed on <div>")]
    DecorationOutsideBlock { tag: String, property: String },

    #[error("text '{text}' inside <{parent}> must be wrapped in <p>, <h1>-<h6> or a list")]
    BareText { parent: String, text: String },

    #[error("chart placeholders {found:?} do not match the expected {expected:?}")]
    PlaceholderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Escape text for inclusion in element content or attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Remove a leading/trailing Markdown code fence around model output
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without_open = OPENING_FENCE.replace(trimmed, "");
    CLOSING_FENCE.replace(&without_open, "").trim().to_string()
}

/// Reduce a full HTML document to the contents of its `<body>`
pub fn extract_body(text: &str) -> String {
    if !BODY_TAG.is_match(text) {
        return text.trim().to_string();
    }
    let document = Html::parse_document(text);
    let body = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next().map(|el| el.inner_html()));
    body.map(|b| b.trim().to_string())
        .unwrap_or_else(|| text.trim().to_string())
}

/// Model output to a validatable fragment
pub fn clean_model_output(text: &str) -> String {
    extract_body(&strip_code_fences(text))
}

/// The placeholder element the generator asks for and the templates emit
pub fn placeholder_element(token: &str, style: &str) -> String {
    format!(
        r#"<div id="{}" class="{}" style="{}"></div>"#,
        escape(token),
        PLACEHOLDER_CLASS,
        escape(style)
    )
}

/// `id` and `class` of one start tag, as the HTML parser would read them
fn tag_identity(tag: &str) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut class = None;
    for caps in ATTRIBUTE.captures_iter(tag) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str())
            .to_string();
        // First occurrence wins, like the tree builder
        match caps[1].to_ascii_lowercase().as_str() {
            "id" if id.is_none() => id = Some(value),
            "class" if class.is_none() => class = Some(value),
            _ => {}
        }
    }
    (id, class)
}

/// Rewrite the start tag of each placeholder element whose id is in `tokens`.
///
/// Elements are matched the way [`MarkupValidator`] reads them: by parsed
/// `id` value on an element carrying the placeholder class, whatever the
/// attribute quoting. Start tags inside comments are ignored. `rewrite` gets
/// the token's position in `tokens` and the tag text, and returns the
/// replacement. Fails with the first token that has no placeholder element
/// or appears twice.
fn rewrite_placeholders<F>(markup: &str, tokens: &[&str], mut rewrite: F) -> Result<String, String>
where
    F: FnMut(usize, &str) -> String,
{
    let comments: Vec<_> = COMMENT.find_iter(markup).map(|m| m.range()).collect();
    let mut seen = vec![false; tokens.len()];
    let mut out = String::with_capacity(markup.len() + tokens.len() * 48);
    let mut copied = 0;

    for tag in START_TAG.find_iter(markup) {
        if comments.iter().any(|c| c.contains(&tag.start())) {
            continue;
        }
        let (Some(id), Some(class)) = tag_identity(tag.as_str()) else {
            continue;
        };
        if !class
            .split_ascii_whitespace()
            .any(|c| c.eq_ignore_ascii_case(PLACEHOLDER_CLASS))
        {
            continue;
        }
        let Some(slot) = tokens.iter().position(|token| *token == id) else {
            continue;
        };
        if std::mem::replace(&mut seen[slot], true) {
            return Err(id);
        }

        out.push_str(&markup[copied..tag.start()]);
        out.push_str(&rewrite(slot, tag.as_str()));
        copied = tag.end();
    }

    if let Some(missing) = seen.iter().position(|s| !s) {
        return Err(tokens[missing].to_string());
    }
    out.push_str(&markup[copied..]);
    Ok(out)
}

/// Add `data-chart-src` to each placeholder element named in `sources`
/// (token to image path). Errors name the unresolved token.
pub fn annotate_placeholders(markup: &str, sources: &[(String, String)]) -> Result<String, String> {
    let tokens: Vec<&str> = sources.iter().map(|(token, _)| token.as_str()).collect();
    rewrite_placeholders(markup, &tokens, |slot, tag| {
        let close = if tag.ends_with("/>") { tag.len() - 2 } else { tag.len() - 1 };
        format!(
            r#"{} data-chart-src="{}"{}"#,
            tag[..close].trim_end(),
            escape(&sources[slot].1),
            &tag[close..]
        )
    })
}

/// Put an `<img>` filling each placeholder element named in `images`
/// (token, image URL, alt text)
pub fn embed_chart_images(markup: &str, images: &[(String, String, String)]) -> Result<String, String> {
    let tokens: Vec<&str> = images.iter().map(|(token, _, _)| token.as_str()).collect();
    rewrite_placeholders(markup, &tokens, |slot, tag| {
        let (_, src, alt) = &images[slot];
        // A self-closing div stays open in HTML, so the image still lands inside
        let open = match tag.strip_suffix("/>") {
            Some(head) => format!("{}>", head.trim_end()),
            None => tag.to_string(),
        };
        format!(
            r#"{}<img src="{}" alt="{}" style="width: 100%; height: 100%; object-fit: contain;">"#,
            open,
            escape(src),
            escape(alt)
        )
    })
}

/// Wrap a validated fragment in the fixed-canvas document shell
pub fn document_shell(heading: &str, fragment: &str, style: &StyleConfig) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n\
         html {{ background: {bg}; }}\n\
         body {{ width: 720pt; height: 405pt; margin: 0; padding: 0; display: flex; \
         font-family: {font}, sans-serif; color: {fg}; background: {bg}; }}\n\
         </style>\n</head>\n<body>\n{fragment}\n</body>\n</html>\n",
        title = escape(heading),
        bg = style.background_color,
        font = style.primary_font(),
        fg = style.primary_color,
        fragment = fragment.trim(),
    )
}

/// Checks fragments against the configured style contract
#[derive(Debug, Clone)]
pub struct MarkupValidator {
    allowed_tags: HashSet<String>,
    allowed_fonts: HashSet<String>,
}

impl MarkupValidator {
    pub fn new(style: &StyleConfig) -> Self {
        Self {
            allowed_tags: style.allowed_tags.iter().map(|t| t.to_lowercase()).collect(),
            allowed_fonts: style
                .fonts
                .iter()
                .map(|f| f.to_lowercase())
                .chain(GENERIC_FONTS.iter().map(|f| f.to_string()))
                .collect(),
        }
    }

    /// `Ok` when the fragment is clean and its placeholders are exactly
    /// `expected_tokens`, in order
    pub fn check(&self, fragment: &str, expected_tokens: &[String]) -> Result<(), Vec<Violation>> {
        let violations = self.validate(fragment, expected_tokens);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Every violation found, in document order; placeholder mismatch last
    pub fn validate(&self, fragment: &str, expected_tokens: &[String]) -> Vec<Violation> {
        if fragment.trim().is_empty() {
            return vec![Violation::Empty];
        }

        let html = Html::parse_fragment(fragment);
        let mut violations = Vec::new();
        let mut found = Vec::new();

        for node in html.tree.root().descendants() {
            match node.value() {
                Node::Element(element) => {
                    let tag = element.name().to_lowercase();
                    // Fragment parsing wraps everything in a synthetic <html>
                    if tag == "html" && node.parent().map_or(true, |p| p.parent().is_none()) {
                        continue;
                    }

                    if tag == "svg" || tag == "canvas" {
                        violations.push(Violation::VectorGraphics(tag.clone()));
                    } else if !self.allowed_tags.contains(&tag) {
                        violations.push(Violation::DisallowedTag(tag.clone()));
                    }

                    if let Some(style) = element.attr("style") {
                        self.check_style(&tag, style, &mut violations);
                    }

                    if element.classes().any(|c| c.eq_ignore_ascii_case(PLACEHOLDER_CLASS)) {
                        found.push(element.attr("id").unwrap_or_default().to_string());
                    }
                }
                Node::Text(text) => {
                    let content = text.trim();
                    if content.is_empty() {
                        continue;
                    }

                    let leads = node.prev_sibling().is_none();
                    if content.contains(BULLET_GLYPHS)
                        || (leads && (content.starts_with("- ") || content.starts_with("* ")))
                    {
                        violations.push(Violation::BulletGlyph(excerpt(content)));
                    }

                    let mut in_container = false;
                    let mut parent_tag = String::from("fragment");
                    for (depth, ancestor) in node.ancestors().enumerate() {
                        if let Some(el) = ancestor.value().as_element() {
                            if depth == 0 && el.name() != "html" {
                                parent_tag = el.name().to_lowercase();
                            }
                            if TEXT_CONTAINERS.contains(&el.name()) {
                                in_container = true;
                                break;
                            }
                        }
                    }
                    if !in_container {
                        violations.push(Violation::BareText {
                            parent: parent_tag,
                            text: excerpt(content),
                        });
                    }
                }
                _ => {}
            }
        }

        if found != expected_tokens {
            violations.push(Violation::PlaceholderMismatch {
                expected: expected_tokens.to_vec(),
                found,
            });
        }

        violations
    }

    fn check_style(&self, tag: &str, style: &str, violations: &mut Vec<Violation>) {
        for declaration in style.split(';') {
            let Some((property, value)) = declaration.split_once(':') else {
                continue;
            };
            let property = property.trim().to_lowercase();
            let value = value.trim();
            let lowered = value.to_lowercase();

            if lowered.contains("gradient(") {
                violations.push(Violation::Gradient(tag.to_string()));
            }

            if tag != "div" && DECORATION_PROPERTIES.iter().any(|p| property.starts_with(p)) {
                violations.push(Violation::DecorationOutsideBlock {
                    tag: tag.to_string(),
                    property: property.clone(),
                });
            }

            if property == "font-family" {
                for font in value.split(',') {
                    let font = font.trim().trim_matches(|c| c == '"' || c == '\'').trim();
                    if !font.is_empty() && !self.allowed_fonts.contains(&font.to_lowercase()) {
                        violations.push(Violation::DisallowedFont {
                            tag: tag.to_string(),
                            font: font.to_string(),
                        });
                    }
                }
            }
        }
    }
}

fn excerpt(text: &str) -> String {
    crate::text::truncate_chars(&crate::text::squash_whitespace(text), 40)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> MarkupValidator {
        MarkupValidator::new(&StyleConfig::default())
    }

    #[test]
    fn clean_fragment_passes() {
        let fragment = r#"<div style="display: flex; background: #fff; border: 1px solid #ccc;">
            <div style="flex: 0 0 40%;">
                <h1 style="font-family: Arial, sans-serif;">Revenue</h1>
                <ul><li>Up <b>12%</b></li><li>Costs flat</li></ul>
            </div>
            <div id="slide-01-chart-1" class="placeholder" style="flex: 1;"></div>
        </div>"#;

        let expected = vec!["slide-01-chart-1".to_string()];
        assert_eq!(validator().validate(fragment, &expected), vec![]);
    }

    #[test]
    fn raw_bullets_are_rejected() {
        let violations = validator().validate("<p>• first point</p><p>- second</p>", &[]);
        assert_eq!(violations.len(), 2);
        assert!(matches!(violations[0], Violation::BulletGlyph(_)));
    }

    #[test]
    fn forbidden_constructs_are_reported() {
        let fragment = r#"<div style="background: linear-gradient(#fff, #000);">
            <p style="border: 1px solid red; font-family: 'Comic Sans MS';">x</p>
            <svg></svg>
            <img src="a.png">
        </div>"#;

        let violations = validator().validate(fragment, &[]);
        assert!(violations.contains(&Violation::Gradient("div".to_string())));
        assert!(violations.contains(&Violation::DecorationOutsideBlock {
            tag: "p".to_string(),
            property: "border".to_string(),
        }));
        assert!(violations.contains(&Violation::DisallowedFont {
            tag: "p".to_string(),
            font: "Comic Sans MS".to_string(),
        }));
        assert!(violations.contains(&Violation::VectorGraphics("svg".to_string())));
        assert!(violations.contains(&Violation::DisallowedTag("img".to_string())));
    }

    #[test]
    fn text_outside_containers_is_rejected() {
        let violations = validator().validate("<div>loose <span>words</span></div>", &[]);
        assert_eq!(violations.len(), 2);
        assert!(matches!(
            &violations[0],
            Violation::BareText { parent, .. } if parent == "div"
        ));

        assert!(validator().validate("<p>kept <span>inside</span></p>", &[]).is_empty());
    }

    #[test]
    fn placeholders_must_match_in_order() {
        let fragment = format!(
            "{}{}",
            placeholder_element("slide-02-chart-2", "flex: 1;"),
            placeholder_element("slide-02-chart-1", "flex: 1;")
        );
        let expected = vec!["slide-02-chart-1".to_string(), "slide-02-chart-2".to_string()];
        let violations = validator().validate(&fragment, &expected);
        assert!(matches!(violations.as_slice(), [Violation::PlaceholderMismatch { .. }]));

        let missing = validator().validate("<p>no charts</p>", &expected);
        assert!(matches!(missing.as_slice(), [Violation::PlaceholderMismatch { found, .. }] if found.is_empty()));
    }

    #[test]
    fn empty_fragment_is_a_violation() {
        assert_eq!(validator().validate("   ", &[]), vec![Violation::Empty]);
    }

    #[test]
    fn model_output_is_cleaned() {
        assert_eq!(strip_code_fences("```html\n<p>x</p>\n```"), "<p>x</p>");
        assert_eq!(strip_code_fences("<p>x</p>"), "<p>x</p>");

        let document = "<!DOCTYPE html><html><head><style>p{}</style></head><body><p>hi</p></body></html>";
        assert_eq!(clean_model_output(&format!("```\n{}\n```", document)), "<p>hi</p>");
    }

    #[test]
    fn placeholders_are_annotated_whatever_the_quoting() {
        let sources = vec![
            ("slide-01-chart-1".to_string(), "charts/01-a.png".to_string()),
            ("slide-01-chart-2".to_string(), "charts/02-b.png".to_string()),
            ("slide-01-chart-3".to_string(), "charts/03-c.png".to_string()),
        ];
        let fragment = concat!(
            r#"<div class="placeholder" id=slide-01-chart-1></div>"#,
            r#"<div ID = 'slide-01-chart-2' class='box placeholder' />"#,
            r#"<div id="slide-01-chart-3" class="placeholder" style="flex: 1;"></div>"#,
        );
        let expected: Vec<String> = sources.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(validator().validate(fragment, &expected), vec![]);

        let annotated = annotate_placeholders(fragment, &sources).unwrap();
        assert!(annotated.contains(r#"id=slide-01-chart-1 data-chart-src="charts/01-a.png">"#));
        assert!(annotated.contains(r#"class='box placeholder' data-chart-src="charts/02-b.png"/>"#));
        assert!(annotated.contains(r#"style="flex: 1;" data-chart-src="charts/03-c.png">"#));
    }

    #[test]
    fn only_placeholder_elements_are_annotated() {
        let sources = vec![("slide-02-chart-1".to_string(), "charts/01-a.png".to_string())];
        let fragment = concat!(
            "<!-- <div id=\"slide-02-chart-1\" class=\"placeholder\"></div> -->",
            r#"<p id="slide-02-chart-1">caption</p>"#,
            r#"<div id="slide-02-chart-1" class="placeholder"></div>"#,
        );

        let annotated = annotate_placeholders(fragment, &sources).unwrap();
        assert_eq!(annotated.matches("data-chart-src").count(), 1);
        assert!(annotated.contains(r#"<div id="slide-02-chart-1" class="placeholder" data-chart-src="charts/01-a.png">"#));

        assert_eq!(
            annotate_placeholders(r#"<p id="slide-02-chart-1">x</p>"#, &sources),
            Err("slide-02-chart-1".to_string())
        );
        let twice = format!("{0}{0}", placeholder_element("slide-02-chart-1", ""));
        assert_eq!(annotate_placeholders(&twice, &sources), Err("slide-02-chart-1".to_string()));
    }

    #[test]
    fn escaping_covers_markup_characters() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn shell_embeds_fragment_and_canvas_size() {
        let doc = document_shell("Q & A", "<p>x</p>", &StyleConfig::default());
        assert!(doc.contains("<title>Q &amp; A</title>"));
        assert!(doc.contains("width: 720pt; height: 405pt"));
        assert!(doc.contains("<body>\n<p>x</p>\n</body>"));
    }
}
