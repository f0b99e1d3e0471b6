//! WorkflowCoordinator: one request through parse, generate, convert, save
//!
//! `Created -> Parsed -> Rendered -> Converted -> Saved -> Done`, with
//! `Failed(kind)` reachable from any state. The workspace is allocated before
//! parsing and released on every exit path. A request-level timeout cancels
//! whatever is in flight.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{DeckConfig, StyleConfig, WorkflowConfig};
use crate::converter::{html_deck, ConversionOrchestrator};
use crate::error::{ErrorKind, WorkflowError};
use crate::generator::SlideContentGenerator;
use crate::model::{ArtifactId, ConversionManifest, DeckInput, OwnerKey, PresentationArtifact};
use crate::parser::ContentParser;
use crate::runtime::Runtime;
use crate::store::ArtifactStore;
use crate::text::slugify;
use crate::workspace::Workspace;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Workspace,
    Parse,
    Generate,
    Convert,
    Save,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Workspace => "workspace",
            Stage::Parse => "parse",
            Stage::Generate => "generate",
            Stage::Convert => "convert",
            Stage::Save => "save",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Created,
    Parsed,
    Rendered,
    Converted,
    Saved,
    Done,
    Failed(ErrorKind),
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Created => write!(f, "Created"),
            WorkflowState::Parsed => write!(f, "Parsed"),
            WorkflowState::Rendered => write!(f, "Rendered"),
            WorkflowState::Converted => write!(f, "Converted"),
            WorkflowState::Saved => write!(f, "Saved"),
            WorkflowState::Done => write!(f, "Done"),
            WorkflowState::Failed(kind) => write!(f, "Failed({})", kind),
        }
    }
}

/// A finished request
#[derive(Debug)]
pub struct WorkflowOutcome {
    pub file_id: ArtifactId,
    /// Companion HTML deck, same stem as `file_id`
    pub html_file_id: ArtifactId,
    pub artifact: PresentationArtifact,
    pub transitions: Vec<WorkflowState>,
    /// Set when workspace retention is on
    pub retained_workspace: Option<PathBuf>,
}

/// `{YYYYMMDD}-{slug(title)}-{slug(thread)}.pptx`
pub fn build_filename(date: NaiveDate, title: &str, thread_id: &str) -> String {
    format!(
        "{}-{}-{}.pptx",
        date.format("%Y%m%d"),
        slugify(title),
        slugify(thread_id)
    )
}

/// The companion deck's name for a stored presentation
pub fn companion_filename(file_id: &ArtifactId) -> String {
    Path::new(&file_id.0)
        .with_extension("html")
        .to_string_lossy()
        .into_owned()
}

struct Finished {
    file_id: ArtifactId,
    html_file_id: ArtifactId,
    artifact: PresentationArtifact,
    retained_workspace: Option<PathBuf>,
}

struct Transitions {
    request_id: String,
    states: Vec<WorkflowState>,
}

impl Transitions {
    fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            states: vec![WorkflowState::Created],
        }
    }

    fn advance(&mut self, next: WorkflowState) {
        if let Some(current) = self.states.last() {
            tracing::debug!(request = %self.request_id, "[WORKFLOW] {} -> {}", current, next);
        }
        self.states.push(next);
    }
}

pub struct WorkflowCoordinator {
    parser: ContentParser,
    generator: SlideContentGenerator,
    converter: ConversionOrchestrator,
    store: Arc<dyn ArtifactStore>,
    style: StyleConfig,
    config: WorkflowConfig,
}

impl WorkflowCoordinator {
    pub fn new(runtime: &Runtime, config: &DeckConfig) -> Self {
        Self {
            parser: ContentParser::new(config.parsing.clone()),
            generator: SlideContentGenerator::new(
                runtime.provider(),
                runtime.generation_permits(),
                config.generation.clone(),
                config.style.clone(),
            ),
            converter: ConversionOrchestrator::new(
                runtime.toolchain(),
                runtime.conversion_permits(),
                config.conversion.clone(),
            ),
            store: runtime.store(),
            style: config.style.clone(),
            config: config.workflow.clone(),
        }
    }

    pub async fn generate_presentation(&self, input: DeckInput) -> Result<WorkflowOutcome, WorkflowError> {
        self.generate_presentation_with_cancel(input, &CancellationToken::new())
            .await
    }

    /// As [`generate_presentation`](Self::generate_presentation), also
    /// cancelled when `parent` is
    pub async fn generate_presentation_with_cancel(
        &self,
        input: DeckInput,
        parent: &CancellationToken,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let request_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let span = tracing::info_span!("workflow", request = %request_id, thread = %input.thread_id);

        async {
            let started = Instant::now();
            let cancel = parent.child_token();
            let timeout = self.config.request_timeout();

            let timer = tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    tokio::select! {
                        _ = tokio::time::sleep(timeout) => {
                            tracing::warn!("[WORKFLOW] Request timeout of {}s reached, cancelling", timeout.as_secs());
                            cancel.cancel();
                        }
                        _ = cancel.cancelled() => {}
                    }
                }
            });

            let mut transitions = Transitions::new(&request_id);
            tracing::info!(
                "[WORKFLOW] Started: {} turn(s), {} chart(s), {} source(s)",
                input.conversation.len(),
                input.charts.len(),
                input.sources.len()
            );

            let result = self.run(&input, &request_id, &cancel, &mut transitions).await;
            timer.abort();

            match result {
                Ok(finished) => {
                    transitions.advance(WorkflowState::Done);
                    tracing::info!(
                        "[WORKFLOW] Done in {:.2}s: {} + {} ({} slides)",
                        started.elapsed().as_secs_f64(),
                        finished.file_id,
                        finished.html_file_id,
                        finished.artifact.slide_count
                    );
                    Ok(WorkflowOutcome {
                        file_id: finished.file_id,
                        html_file_id: finished.html_file_id,
                        artifact: finished.artifact,
                        transitions: transitions.states,
                        retained_workspace: finished.retained_workspace,
                    })
                }
                Err(err) => {
                    transitions.advance(WorkflowState::Failed(err.kind()));
                    tracing::error!(
                        stage = %err.stage,
                        kind = %err.kind(),
                        "[WORKFLOW] Failed after {:.2}s: {}",
                        started.elapsed().as_secs_f64(),
                        err
                    );
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        input: &DeckInput,
        request_id: &str,
        cancel: &CancellationToken,
        transitions: &mut Transitions,
    ) -> Result<Finished, WorkflowError> {
        // Dropped on every early return, which removes the directory
        let workspace = Workspace::create(
            self.config.workspace_root.as_deref(),
            request_id,
            self.config.keep_workspace,
        )
        .map_err(|e| WorkflowError::new(Stage::Workspace, e))?;

        let parsed = self
            .parser
            .parse(input)
            .map_err(|e| WorkflowError::new(Stage::Parse, e))?;
        transitions.advance(WorkflowState::Parsed);

        let slides = self
            .generator
            .generate(&parsed.slide_specs, cancel)
            .await
            .map_err(|e| WorkflowError::new(Stage::Generate, e))?;
        transitions.advance(WorkflowState::Rendered);

        let manifest = ConversionManifest {
            slides,
            chart_binaries: input
                .charts
                .iter()
                .map(|chart| (chart.id.clone(), chart.image.clone()))
                .collect(),
            output_name: build_filename(
                chrono::Local::now().date_naive(),
                &parsed.title,
                &input.thread_id,
            ),
        };

        let companion = html_deck::render(&manifest, &self.style)
            .map_err(|e| WorkflowError::new(Stage::Convert, e))?;

        let owner_key = OwnerKey::from_user(&input.user_name);
        let artifact = self
            .converter
            .convert(manifest, workspace.path(), &owner_key, cancel)
            .await
            .map_err(|e| WorkflowError::new(Stage::Convert, e))?;
        transitions.advance(WorkflowState::Converted);

        let file_id = self
            .store
            .save(&owner_key, &artifact.suggested_filename, &artifact.bytes)
            .await
            .map_err(|e| WorkflowError::new(Stage::Save, e))?;
        let html_file_id = self
            .store
            .save(&owner_key, &companion_filename(&file_id), companion.as_bytes())
            .await
            .map_err(|e| WorkflowError::new(Stage::Save, e))?;
        transitions.advance(WorkflowState::Saved);

        Ok(Finished {
            file_id,
            html_file_id,
            artifact,
            retained_workspace: workspace.close(),
        })
    }
}
