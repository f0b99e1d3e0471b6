//! Serialise a conversion manifest into the request workspace

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConversionError;
use crate::markup::annotate_placeholders;
use crate::model::ConversionManifest;
use crate::text::slugify;

/// Node build script understood by the default toolchain
pub const BUILD_SCRIPT: &str = include_str!("../../assets/build.js");

pub const DESCRIPTOR_FILE: &str = "build.json";
pub const SCRIPT_FILE: &str = "build.js";
pub const SLIDES_DIR: &str = "slides";
pub const CHARTS_DIR: &str = "charts";

/// The build descriptor written as `build.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    pub title: String,
    pub layout: String,
    /// Output file name inside the workspace
    pub output: String,
    pub slides: Vec<SlideEntry>,
    /// Chart id to workspace-relative image path
    pub charts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideEntry {
    pub index: usize,
    pub kind: String,
    pub file: String,
    pub placeholders: Vec<PlaceholderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderEntry {
    pub token: String,
    pub chart_id: String,
    pub image: String,
}

/// Paths of a staged build
#[derive(Debug, Clone)]
pub struct StagedBuild {
    pub descriptor: BuildDescriptor,
    pub descriptor_path: PathBuf,
    pub output_path: PathBuf,
}

/// Image extension from magic bytes; png when unknown
pub fn sniff_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.starts_with(b"GIF8") {
        "gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else {
        "png"
    }
}

/// Output file name without any directory part
fn output_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "presentation.pptx".to_string())
}

/// Write slides, charts, descriptor and build script into `workspace`,
/// resolving every chart placeholder to its image path
pub async fn stage(manifest: &ConversionManifest, workspace: &Path) -> Result<StagedBuild, ConversionError> {
    let slides_dir = workspace.join(SLIDES_DIR);
    let charts_dir = workspace.join(CHARTS_DIR);
    tokio::fs::create_dir_all(&slides_dir).await.map_err(ConversionError::Staging)?;
    tokio::fs::create_dir_all(&charts_dir).await.map_err(ConversionError::Staging)?;

    let mut charts = BTreeMap::new();
    for (ordinal, (id, bytes)) in manifest.chart_binaries.iter().enumerate() {
        let file = format!("{:02}-{}.{}", ordinal + 1, slugify(id), sniff_extension(bytes));
        tokio::fs::write(charts_dir.join(&file), bytes)
            .await
            .map_err(ConversionError::Staging)?;
        charts.insert(id.clone(), format!("{}/{}", CHARTS_DIR, file));
    }

    let mut slides = Vec::with_capacity(manifest.slides.len());
    for slide in &manifest.slides {
        let index = slide.spec.index;
        let mut placeholders = Vec::with_capacity(slide.chart_placeholders.len());

        for placeholder in &slide.chart_placeholders {
            let image = charts
                .get(&placeholder.chart_id)
                .ok_or_else(|| ConversionError::MissingChartBinary {
                    slide: index,
                    chart_id: placeholder.chart_id.clone(),
                })?
                .clone();
            placeholders.push(PlaceholderEntry {
                token: placeholder.token.clone(),
                chart_id: placeholder.chart_id.clone(),
                image,
            });
        }

        let sources: Vec<(String, String)> = placeholders
            .iter()
            .map(|p| (p.token.clone(), p.image.clone()))
            .collect();
        let markup = annotate_placeholders(&slide.markup, &sources)
            .map_err(|token| ConversionError::UnresolvedPlaceholder { slide: index, token })?;

        let file = format!("{}/slide-{:02}.html", SLIDES_DIR, index);
        tokio::fs::write(workspace.join(&file), markup)
            .await
            .map_err(ConversionError::Staging)?;

        slides.push(SlideEntry {
            index,
            kind: slide.spec.kind.to_string(),
            file,
            placeholders,
        });
    }

    let output = output_file_name(&manifest.output_name);
    let descriptor = BuildDescriptor {
        title: manifest
            .slides
            .first()
            .map(|s| s.spec.heading.clone())
            .unwrap_or_default(),
        layout: "LAYOUT_16x9".to_string(),
        output: output.clone(),
        slides,
        charts,
    };

    let descriptor_path = workspace.join(DESCRIPTOR_FILE);
    let json = serde_json::to_vec_pretty(&descriptor)
        .map_err(|e| ConversionError::Staging(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    tokio::fs::write(&descriptor_path, json)
        .await
        .map_err(ConversionError::Staging)?;
    tokio::fs::write(workspace.join(SCRIPT_FILE), BUILD_SCRIPT)
        .await
        .map_err(ConversionError::Staging)?;

    tracing::debug!(
        "[CONVERTER] Staged {} slide(s), {} chart(s) in {}",
        descriptor.slides.len(),
        descriptor.charts.len(),
        workspace.display()
    );

    Ok(StagedBuild {
        descriptor,
        descriptor_path,
        output_path: workspace.join(output),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BodyHints, ChartPlaceholder, RenderedSlide, SlideKind, SlideSpec};

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

    fn slide(index: usize, charts: &[&str]) -> RenderedSlide {
        let spec = SlideSpec {
            index,
            kind: SlideKind::Content,
            heading: format!("Slide {}", index),
            body_hints: BodyHints::QuestionAnswer {
                question: "Q".to_string(),
                answer: "A".to_string(),
            },
            chart_refs: charts.iter().map(|c| c.to_string()).collect(),
        };
        let placeholders: Vec<ChartPlaceholder> = spec.expected_placeholders();
        let body: String = placeholders
            .iter()
            .map(|p| format!(r#"<div id="{}" class="placeholder"></div>"#, p.token))
            .collect();
        RenderedSlide {
            markup: format!("<html><body><p>x</p>{}</body></html>", body),
            chart_placeholders: placeholders,
            spec,
        }
    }

    fn manifest(slides: Vec<RenderedSlide>, charts: &[(&str, &[u8])]) -> ConversionManifest {
        ConversionManifest {
            slides,
            chart_binaries: charts.iter().map(|(id, b)| (id.to_string(), b.to_vec())).collect(),
            output_name: "../escape/deck.pptx".to_string(),
        }
    }

    #[test]
    fn magic_bytes_pick_extension() {
        assert_eq!(sniff_extension(PNG), "png");
        assert_eq!(sniff_extension(JPEG), "jpg");
        assert_eq!(sniff_extension(b"GIF89a"), "gif");
        assert_eq!(sniff_extension(b"RIFF\0\0\0\0WEBPVP8 "), "webp");
        assert_eq!(sniff_extension(b"??"), "png");
    }

    #[tokio::test]
    async fn every_chart_is_resolved_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest(
            vec![slide(1, &["sales", "costs"]), slide(2, &["people"])],
            &[("sales", PNG), ("costs", JPEG), ("people", PNG)],
        );

        let staged = stage(&manifest, dir.path()).await.unwrap();

        let mut resolved: Vec<&str> = staged
            .descriptor
            .slides
            .iter()
            .flat_map(|s| s.placeholders.iter().map(|p| p.chart_id.as_str()))
            .collect();
        resolved.sort();
        assert_eq!(resolved, vec!["costs", "people", "sales"]);
        assert_eq!(staged.descriptor.charts.len(), 3);
        assert!(staged.descriptor.charts["costs"].ends_with(".jpg"));

        let html = std::fs::read_to_string(dir.path().join("slides/slide-01.html")).unwrap();
        assert!(html.contains(r#"id="slide-01-chart-1" class="placeholder" data-chart-src="charts/"#));

        for path in staged.descriptor.charts.values() {
            assert!(dir.path().join(path).exists());
        }
        assert!(dir.path().join(SCRIPT_FILE).exists());

        let on_disk: BuildDescriptor =
            serde_json::from_slice(&std::fs::read(dir.path().join(DESCRIPTOR_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk, staged.descriptor);
    }

    #[tokio::test]
    async fn output_stays_inside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let staged = stage(&manifest(vec![slide(0, &[])], &[]), dir.path()).await.unwrap();
        assert_eq!(staged.output_path, dir.path().join("deck.pptx"));
    }

    #[tokio::test]
    async fn missing_binary_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = stage(&manifest(vec![slide(1, &["gone"])], &[]), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::MissingChartBinary { slide: 1, .. }));
    }

    #[tokio::test]
    async fn validated_unquoted_placeholder_is_staged() {
        use crate::config::StyleConfig;
        use crate::markup::{document_shell, MarkupValidator};

        let dir = tempfile::tempdir().unwrap();
        let fragment = r#"<div style="display: flex;"><h1>Trend</h1><div class="placeholder" id=slide-01-chart-1></div></div>"#;
        let style = StyleConfig::default();
        let mut unquoted = slide(1, &["sales"]);
        let tokens: Vec<String> = unquoted.chart_placeholders.iter().map(|p| p.token.clone()).collect();
        assert_eq!(MarkupValidator::new(&style).validate(fragment, &tokens), vec![]);
        unquoted.markup = document_shell("Trend", fragment, &style);

        let staged = stage(&manifest(vec![unquoted], &[("sales", PNG)]), dir.path()).await.unwrap();

        let html = std::fs::read_to_string(dir.path().join("slides/slide-01.html")).unwrap();
        assert!(html.contains(r#"id=slide-01-chart-1 data-chart-src="charts/01-sales.png">"#));
        assert_eq!(staged.descriptor.slides[0].placeholders[0].image, "charts/01-sales.png");
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = slide(1, &["sales"]);
        broken.markup = "<p>no slot</p>".to_string();
        let err = stage(&manifest(vec![broken], &[("sales", PNG)]), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnresolvedPlaceholder { slide: 1, .. }));
    }
}
