//! Data contracts passed between the pipeline components
//!
//! All values are created fresh per request and are not mutated once the
//! owning component hands them on.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One question/answer exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    /// Chart ids this turn explicitly asks for, in display order
    #[serde(default)]
    pub chart_refs: Vec<String>,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            chart_refs: Vec::new(),
        }
    }

    pub fn with_chart(mut self, chart_id: impl Into<String>) -> Self {
        self.chart_refs.push(chart_id.into());
        self
    }
}

/// A chart image owned by the request and referenced by id
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartAsset {
    pub id: String,
    #[serde(skip)]
    pub image: Vec<u8>,
    pub caption: Option<String>,
    /// Zero-based turn this chart declares itself attached to
    pub turn: Option<usize>,
}

impl ChartAsset {
    pub fn new(id: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            image,
            caption: None,
            turn: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn for_turn(mut self, turn: usize) -> Self {
        self.turn = Some(turn);
        self
    }
}

impl fmt::Debug for ChartAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChartAsset")
            .field("id", &self.id)
            .field("image_bytes", &self.image.len())
            .field("caption", &self.caption)
            .field("turn", &self.turn)
            .finish()
    }
}

/// A cited source, collected into the trailing slide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub label: String,
    pub url: Option<String>,
}

impl Source {
    pub fn new(label: impl Into<String>, url: Option<String>) -> Self {
        Self {
            label: label.into(),
            url,
        }
    }
}

/// One request's worth of pipeline input, already decoded
#[derive(Debug, Clone, Default)]
pub struct DeckInput {
    pub user_name: String,
    pub thread_id: String,
    /// Replaces the title derived from the first question
    pub title: Option<String>,
    pub conversation: Vec<ConversationTurn>,
    pub charts: Vec<ChartAsset>,
    pub sources: Vec<Source>,
}

impl DeckInput {
    pub fn new(user_name: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            thread_id: thread_id.into(),
            ..Self::default()
        }
    }

    pub fn with_turn(mut self, turn: ConversationTurn) -> Self {
        self.conversation.push(turn);
        self
    }

    pub fn with_chart(mut self, chart: ChartAsset) -> Self {
        self.charts.push(chart);
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideKind {
    Title,
    Content,
    Sources,
}

impl fmt::Display for SlideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlideKind::Title => write!(f, "title"),
            SlideKind::Content => write!(f, "content"),
            SlideKind::Sources => write!(f, "sources"),
        }
    }
}

/// Structured hints for the slide body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyHints {
    Subtitle { text: String },
    QuestionAnswer { question: String, answer: String },
    Sources { items: Vec<Source> },
}

/// Normalized description of one slide, before any markup exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideSpec {
    pub index: usize,
    pub kind: SlideKind,
    pub heading: String,
    pub body_hints: BodyHints,
    pub chart_refs: Vec<String>,
}

impl SlideSpec {
    /// Placeholder token for the chart at `position` (0-based) on this slide
    pub fn placeholder_token(&self, position: usize) -> String {
        format!("slide-{:02}-chart-{}", self.index, position + 1)
    }

    /// The expected `(chart id, token)` pairs, in `chart_refs` order
    pub fn expected_placeholders(&self) -> Vec<ChartPlaceholder> {
        self.chart_refs
            .iter()
            .enumerate()
            .map(|(pos, id)| ChartPlaceholder {
                chart_id: id.clone(),
                token: self.placeholder_token(pos),
            })
            .collect()
    }
}

/// Output of the parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDeck {
    pub title: String,
    pub subtitle: String,
    pub slide_specs: Vec<SlideSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPlaceholder {
    pub chart_id: String,
    pub token: String,
}

/// A complete markup document for one slide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedSlide {
    pub spec: SlideSpec,
    pub markup: String,
    pub chart_placeholders: Vec<ChartPlaceholder>,
}

/// Everything the conversion toolchain needs for one request
#[derive(Clone)]
pub struct ConversionManifest {
    pub slides: Vec<RenderedSlide>,
    pub chart_binaries: BTreeMap<String, Vec<u8>>,
    pub output_name: String,
}

impl fmt::Debug for ConversionManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionManifest")
            .field("slides", &self.slides.len())
            .field("charts", &self.chart_binaries.keys().collect::<Vec<_>>())
            .field("output_name", &self.output_name)
            .finish()
    }
}

/// Stable per-requester key used to isolate stored artifacts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerKey(String);

impl OwnerKey {
    /// Lowercase hex SHA-256 of the requester identity
    pub fn from_user(user_name: &str) -> Self {
        let digest = Sha256::digest(user_name.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier returned by the artifact store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The packaged deck
#[derive(Clone)]
pub struct PresentationArtifact {
    pub bytes: Vec<u8>,
    pub suggested_filename: String,
    pub owner_key: OwnerKey,
    pub slide_count: usize,
}

impl fmt::Debug for PresentationArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentationArtifact")
            .field("bytes", &self.bytes.len())
            .field("suggested_filename", &self.suggested_filename)
            .field("owner_key", &self.owner_key)
            .field("slide_count", &self.slide_count)
            .finish()
    }
}
