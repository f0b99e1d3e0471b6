//! ConversionOrchestrator: manifest to packaged presentation
//!
//! Stages the manifest into the request workspace, runs the toolchain under
//! a process-wide subprocess permit, retries a failed or timed-out run with a
//! fresh invocation, and reads the produced file back as the artifact.

pub mod html_deck;
pub mod staging;
pub mod toolchain;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::ConversionConfig;
use crate::error::{truncate_diagnostics, ConversionError};
use crate::model::{ConversionManifest, OwnerKey, PresentationArtifact};

pub use staging::{BuildDescriptor, PlaceholderEntry, SlideEntry, StagedBuild};
pub use toolchain::{SubprocessToolchain, Toolchain, ToolchainInvocation, ToolchainOutcome};

/// Why one toolchain run did not produce output
#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("launch failed: {0}")]
    Launch(std::io::Error),

    #[error("{}", .0.describe())]
    Failed(ToolchainOutcome),

    #[error("no output at {}", .0.display())]
    MissingOutput(std::path::PathBuf),

    #[error("cancelled")]
    Cancelled,
}

impl RunError {
    /// A non-zero exit or a timeout is worth a fresh run
    fn is_retryable(&self) -> bool {
        matches!(self, RunError::Failed(_))
    }
}

pub struct ConversionOrchestrator {
    toolchain: Arc<dyn Toolchain>,
    /// Process-wide cap on live conversion subprocesses
    permits: Arc<Semaphore>,
    config: ConversionConfig,
}

impl ConversionOrchestrator {
    pub fn new(toolchain: Arc<dyn Toolchain>, permits: Arc<Semaphore>, config: ConversionConfig) -> Self {
        Self {
            toolchain,
            permits,
            config,
        }
    }

    /// Consume the manifest and build the artifact inside `workspace`
    pub async fn convert(
        &self,
        manifest: ConversionManifest,
        workspace: &Path,
        owner_key: &OwnerKey,
        cancel: &CancellationToken,
    ) -> Result<PresentationArtifact, ConversionError> {
        let started = Instant::now();
        let staged = staging::stage(&manifest, workspace).await?;

        let invocation = ToolchainInvocation {
            workspace: workspace.to_path_buf(),
            descriptor: staged.descriptor_path.clone(),
            output: staged.output_path.clone(),
            timeout: self.config.timeout(),
        };

        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit.map_err(|_| ConversionError::Cancelled)?,
            _ = cancel.cancelled() => return Err(ConversionError::Cancelled),
        };

        let outcome = self
            .config
            .retry
            .run(
                "conversion",
                || async {
                    // A previous attempt may have left a partial file behind
                    let _ = tokio::fs::remove_file(&invocation.output).await;

                    let outcome = self
                        .toolchain
                        .run(&invocation, cancel)
                        .await
                        .map_err(RunError::Launch)?;

                    match outcome {
                        ToolchainOutcome::Cancelled => Err(RunError::Cancelled),
                        outcome if outcome.succeeded() => {
                            if tokio::fs::try_exists(&invocation.output).await.unwrap_or(false) {
                                Ok(())
                            } else {
                                Err(RunError::MissingOutput(invocation.output.clone()))
                            }
                        }
                        outcome => Err(RunError::Failed(outcome)),
                    }
                },
                |e: &RunError| e.is_retryable(),
            )
            .await;

        if let Err(exhausted) = outcome {
            return Err(match exhausted.error {
                RunError::Launch(e) => ConversionError::Launch(e),
                RunError::Cancelled => ConversionError::Cancelled,
                RunError::MissingOutput(path) => ConversionError::MissingOutput(path),
                RunError::Failed(outcome) => {
                    let diagnostics = truncate_diagnostics(outcome.diagnostics());
                    tracing::error!(
                        attempts = exhausted.attempts,
                        "[CONVERTER] {} failed ({})",
                        self.toolchain.name(),
                        outcome.describe()
                    );
                    tracing::debug!("[CONVERTER] {} diagnostics:\n{}", self.toolchain.name(), diagnostics);
                    ConversionError::ToolchainFailed {
                        attempts: exhausted.attempts,
                        outcome: outcome.describe(),
                        diagnostics,
                    }
                }
            });
        }

        let bytes = tokio::fs::read(&invocation.output)
            .await
            .map_err(ConversionError::ReadOutput)?;

        tracing::info!(
            "[CONVERTER] Built {} ({} bytes, {} slides) in {:.2}s",
            staged.descriptor.output,
            bytes.len(),
            manifest.slides.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(PresentationArtifact {
            bytes,
            suggested_filename: manifest.output_name,
            owner_key: owner_key.clone(),
            slide_count: manifest.slides.len(),
        })
    }
}
