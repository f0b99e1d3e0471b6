//! Companion HTML deck
//!
//! Every rendered slide on one self-contained page, each a 720pt x 405pt
//! card in slide order, with chart images inlined as data URIs. Saved next
//! to the presentation file under the same stem.

use base64::Engine;

use crate::config::StyleConfig;
use crate::error::ConversionError;
use crate::markup::{embed_chart_images, escape, extract_body};
use crate::model::ConversionManifest;

use super::staging::sniff_extension;

fn mime_type(bytes: &[u8]) -> &'static str {
    match sniff_extension(bytes) {
        "jpg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

fn data_uri(bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type(bytes),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Render the manifest's slides as a single HTML document
pub fn render(manifest: &ConversionManifest, style: &StyleConfig) -> Result<String, ConversionError> {
    let mut sections = Vec::with_capacity(manifest.slides.len());

    for slide in &manifest.slides {
        let index = slide.spec.index;
        let mut images = Vec::with_capacity(slide.chart_placeholders.len());
        for placeholder in &slide.chart_placeholders {
            let bytes = manifest
                .chart_binaries
                .get(&placeholder.chart_id)
                .ok_or_else(|| ConversionError::MissingChartBinary {
                    slide: index,
                    chart_id: placeholder.chart_id.clone(),
                })?;
            images.push((placeholder.token.clone(), data_uri(bytes), placeholder.chart_id.clone()));
        }

        let body = embed_chart_images(&extract_body(&slide.markup), &images)
            .map_err(|token| ConversionError::UnresolvedPlaceholder { slide: index, token })?;
        sections.push(format!(
            "<section class=\"slide\" data-index=\"{}\" data-kind=\"{}\">\n{}\n</section>",
            index,
            slide.spec.kind,
            body
        ));
    }

    let title = manifest
        .slides
        .first()
        .map(|s| s.spec.heading.as_str())
        .unwrap_or_default();

    tracing::debug!("[CONVERTER] Rendered HTML deck with {} slide(s)", sections.len());

    Ok(format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n<style>\n\
         html {{ background: #eef1f5; }}\n\
         body {{ margin: 0; padding: 32pt 16pt; display: flex; flex-direction: column; \
         align-items: center; gap: 24pt; font-family: {font}, sans-serif; color: {fg}; }}\n\
         .slide {{ width: 720pt; height: 405pt; overflow: hidden; display: flex; \
         background: {bg}; box-shadow: 0 8pt 24pt rgba(15, 23, 42, 0.12); }}\n\
         .slide > * {{ flex: 1; }}\n\
         </style>\n</head>\n<body>\n{sections}\n</body>\n</html>\n",
        title = escape(title),
        font = style.primary_font(),
        fg = style.primary_color,
        bg = style.background_color,
        sections = sections.join("\n"),
    ))
}
