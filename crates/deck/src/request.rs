//! Inbound request contract and response bodies
//!
//! Decodes the camelCase request payload into a [`DeckInput`]: turns ordered
//! by their optional `index`, charts base64-decoded with default ids and
//! captions, sources normalised.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ParseError, WorkflowError};
use crate::model::{ChartAsset, ConversationTurn, DeckInput, Source};
use crate::workflow::WorkflowOutcome;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub user_name: String,
    pub thread_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub conversation: Vec<RequestTurn>,
    #[serde(default)]
    pub assets: Option<Assets>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTurn {
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub question: Option<TextContent>,
    #[serde(default)]
    pub answer: Option<TextContent>,
    /// Chart ids to show on this turn's slide
    #[serde(default)]
    pub charts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Assets {
    #[serde(default)]
    pub indicator_charts: Option<Vec<IndicatorChart>>,
    #[serde(default)]
    pub source_list: Option<Vec<SourceEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorChart {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    pub encoded_image: String,
    /// Zero-based position in the ordered conversation
    #[serde(default)]
    pub turn: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceEntry {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default, alias = "link_pdf")]
    pub link_pdf: Option<String>,
    #[serde(default, alias = "link_img")]
    pub link_img: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl GenerateRequest {
    pub fn from_json(payload: &str) -> Result<Self, ParseError> {
        serde_json::from_str(payload).map_err(|e| ParseError::InvalidPayload(e.to_string()))
    }

    /// Decode into pipeline input
    pub fn into_input(self) -> Result<DeckInput, ParseError> {
        let mut turns: Vec<(usize, RequestTurn)> = self.conversation.into_iter().enumerate().collect();
        // Indexed turns first by index, the rest keep arrival order
        turns.sort_by_key(|(pos, turn)| match turn.index {
            Some(index) => (0, index, *pos),
            None => (1, 0, *pos),
        });

        let conversation = turns
            .into_iter()
            .map(|(_, turn)| ConversationTurn {
                question: text_of(turn.question),
                answer: text_of(turn.answer),
                chart_refs: turn.charts.unwrap_or_default(),
            })
            .collect();

        let assets = self.assets.unwrap_or_default();

        let charts = assets
            .indicator_charts
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(position, chart)| decode_chart(position, chart))
            .collect::<Result<Vec<_>, _>>()?;

        let sources = assets
            .source_list
            .unwrap_or_default()
            .into_iter()
            .filter_map(normalise_source)
            .collect();

        Ok(DeckInput {
            user_name: self.user_name,
            thread_id: self.thread_id,
            title: self.title,
            conversation,
            charts,
            sources,
        })
    }
}

fn text_of(content: Option<TextContent>) -> String {
    content.and_then(|c| c.content).unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn decode_chart(position: usize, chart: IndicatorChart) -> Result<ChartAsset, ParseError> {
    let encoded = chart.encoded_image.trim();
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    if compact.is_empty() {
        return Err(ParseError::InvalidChartEncoding {
            position,
            reason: "image is empty".to_string(),
        });
    }

    let image = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ParseError::InvalidChartEncoding {
            position,
            reason: e.to_string(),
        })?;

    let id = non_empty(chart.id).unwrap_or_else(|| format!("chart-{}", position));
    let caption = non_empty(chart.title)
        .or_else(|| non_empty(chart.label))
        .unwrap_or_else(|| format!("Chart {}", position + 1));

    Ok(ChartAsset {
        id,
        image,
        caption: Some(caption),
        turn: chart.turn,
    })
}

fn normalise_source(entry: SourceEntry) -> Option<Source> {
    let link = non_empty(entry.link)
        .or_else(|| non_empty(entry.link_pdf))
        .or_else(|| non_empty(entry.link_img))
        .or_else(|| non_empty(entry.url));
    let label = non_empty(entry.title)
        .or_else(|| non_empty(entry.name))
        .or_else(|| non_empty(entry.label))
        .or_else(|| link.clone())?;

    Some(Source { label, url: link })
}

/// Success body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub file_id: String,
    pub html_file_id: String,
}

impl From<&WorkflowOutcome> for GenerateResponse {
    fn from(outcome: &WorkflowOutcome) -> Self {
        Self {
            file_id: outcome.file_id.0.clone(),
            html_file_id: outcome.html_file_id.0.clone(),
        }
    }
}

/// Failure body; carries no diagnostics or prompt text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            error: kind.public_message().to_string(),
            kind,
            retryable: !kind.is_client_error(),
        }
    }

    /// 400 for input the caller must fix, 500 otherwise
    pub fn http_status(&self) -> u16 {
        if self.kind.is_client_error() {
            400
        } else {
            500
        }
    }
}

impl From<&WorkflowError> for ErrorResponse {
    fn from(err: &WorkflowError) -> Self {
        Self::from_kind(err.kind())
    }
}
