//! Prompt composition for content slides

use crate::brain::{CompletionRequest, ResponseFormat};
use crate::config::StyleConfig;
use crate::markup::{placeholder_element, Violation, PLACEHOLDER_CLASS};
use crate::model::{BodyHints, SlideSpec};

/// System prompt for the slide designer
pub const SLIDE_SYSTEM_PROMPT: &str = r#"You are an expert presentation designer and HTML developer.

You author the body of exactly one 720pt x 405pt slide (16:9) as an HTML fragment.
The fragment is placed inside a <body> that already uses `display: flex`.
Output the fragment only: no <!DOCTYPE>, <html>, <head>, <body> or <style> elements,
no Markdown fences, no explanation."#;

/// Build the completion request for one content slide
///
/// `feedback` carries the violations of the previous attempt, if any.
pub fn content_request(
    spec: &SlideSpec,
    style: &StyleConfig,
    feedback: &[Violation],
) -> CompletionRequest {
    let (question, answer) = match &spec.body_hints {
        BodyHints::QuestionAnswer { question, answer } => (question.as_str(), answer.as_str()),
        _ => (spec.heading.as_str(), ""),
    };

    let mut prompt = String::new();

    prompt.push_str("## Slide content\n\n");
    prompt.push_str(&format!("Heading: {}\n\n", spec.heading));
    prompt.push_str(&format!("Question:\n{}\n\n", question));
    prompt.push_str(&format!("Answer:\n{}\n\n", answer));

    prompt.push_str(&style_contract(style));
    prompt.push_str(&placeholder_section(spec));

    if !style.layout_guidance.is_empty() {
        prompt.push_str("## Layout\n\n");
        for line in &style.layout_guidance {
            prompt.push_str(&format!("- {}\n", line));
        }
        prompt.push('\n');
    }

    if !feedback.is_empty() {
        prompt.push_str("## Fix these problems from your previous attempt\n\n");
        for violation in feedback {
            prompt.push_str(&format!("- {}\n", violation));
        }
        prompt.push('\n');
    }

    prompt.push_str("Respond with the HTML fragment only.");

    CompletionRequest::new(prompt)
        .with_system(SLIDE_SYSTEM_PROMPT)
        .with_format(ResponseFormat::Freeform)
}

fn style_contract(style: &StyleConfig) -> String {
    let tags = style
        .allowed_tags
        .iter()
        .map(|t| format!("<{}>", t))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "## Style contract\n\n\
         - Allowed fonts only: {fonts}.\n\
         - Allowed elements only: {tags}.\n\
         - ALL text must be inside <p>, <h1>-<h6>, or <li> elements; never put text directly in a <div> or <span>.\n\
         - Never type bullet characters (•, -, *); use <ul>/<ol> with <li>.\n\
         - Backgrounds, borders and box shadows go on <div> elements only.\n\
         - Never use CSS gradients (linear-gradient, radial-gradient), <svg> or <canvas>.\n\
         - Use hex colors with a # prefix. Primary {primary}, accent {accent}, background {background}.\n\
         - Use margin for spacing and flexbox for layout.\n\n",
        fonts = style.fonts.join(", "),
        tags = tags,
        primary = style.primary_color,
        accent = style.accent_color,
        background = style.background_color,
    )
}

fn placeholder_section(spec: &SlideSpec) -> String {
    let placeholders = spec.expected_placeholders();
    if placeholders.is_empty() {
        return format!(
            "## Charts\n\nThis slide has no charts. Do not emit any element with class=\"{}\".\n\n",
            PLACEHOLDER_CLASS
        );
    }

    let mut section = format!(
        "## Charts\n\nThis slide shows {} chart(s). Emit exactly these placeholder elements, \
         each once, in this order, and no others. Size them with width/height in pt:\n\n",
        placeholders.len()
    );
    for placeholder in &placeholders {
        section.push_str(&format!(
            "{}  (chart '{}')\n",
            placeholder_element(&placeholder.token, "width: 350pt; height: 200pt;"),
            placeholder.chart_id
        ));
    }
    section.push('\n');
    section
}
