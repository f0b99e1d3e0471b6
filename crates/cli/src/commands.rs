//! Subcommand handlers

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use deck::markup::{clean_model_output, MarkupValidator};
use deck::store::{ArtifactStore, LocalArtifactStore};
use deck::{ArtifactId, DeckConfig, ErrorKind, ErrorResponse, GenerateRequest, GenerateResponse, OwnerKey, Runtime};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::output::OutputHandler;

/// Exit code for input the caller has to fix
const EXIT_CLIENT_ERROR: u8 = 2;
const EXIT_SERVER_ERROR: u8 = 1;

async fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("failed to read request from stdin")?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn emit_error(response: &ErrorResponse) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(ExitCode::from(if response.kind.is_client_error() {
        EXIT_CLIENT_ERROR
    } else {
        EXIT_SERVER_ERROR
    }))
}

/// Run one request end to end and print the response body
pub async fn generate(config: &DeckConfig, request: &Path, cancel: CancellationToken) -> Result<ExitCode> {
    let payload = read_input(request).await?;

    let input = match GenerateRequest::from_json(&payload).and_then(GenerateRequest::into_input) {
        Ok(input) => input,
        Err(e) => {
            tracing::warn!("Rejected request: {}", e);
            return emit_error(&ErrorResponse::from_kind(ErrorKind::Parse));
        }
    };

    let runtime = Runtime::from_config(config)
        .await
        .context("failed to initialise the generative provider")?;
    let coordinator = runtime.coordinator(config);

    match coordinator.generate_presentation_with_cancel(input, &cancel).await {
        Ok(outcome) => {
            if let Some(kept) = &outcome.retained_workspace {
                tracing::info!("Workspace kept at {}", kept.display());
            }
            let response = GenerateResponse::from(&outcome);
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => emit_error(&ErrorResponse::from(&e)),
    }
}

/// Check a slide fragment against the markup contract
pub async fn validate(config: &DeckConfig, fragment: &Path, slide: usize, charts: usize, plain: bool) -> Result<ExitCode> {
    let output = OutputHandler::new(plain);
    let raw = read_input(fragment).await?;
    let fragment_text = clean_model_output(&raw);

    let tokens: Vec<String> = (1..=charts)
        .map(|n| format!("slide-{:02}-chart-{}", slide, n))
        .collect();
    let violations = MarkupValidator::new(&config.style).validate(&fragment_text, &tokens);

    output.print_header(&format!("Markup check: {}", fragment.display()));
    output.print_field("Expected placeholders", &tokens.join(", "));

    if violations.is_empty() {
        output.print_success("Fragment satisfies the markup contract");
        return Ok(ExitCode::SUCCESS);
    }

    output.print_error(&format!("{} violation(s)", violations.len()));
    output.print_violations(&violations);
    Ok(ExitCode::from(EXIT_CLIENT_ERROR))
}

/// Print the effective configuration as TOML, secrets redacted
pub fn show_config(config: &DeckConfig, source: &Path, plain: bool) -> Result<ExitCode> {
    let output = OutputHandler::new(plain);
    let mut shown = config.clone();
    if shown.llm.api_key.is_some() {
        shown.llm.api_key = Some("********".to_string());
    }

    output.print_header("Configuration");
    if source.exists() {
        output.print_field("Loaded from", &source.display().to_string());
    } else {
        output.print_info(&format!("{} not found; defaults and environment only", source.display()));
    }
    println!();
    println!("{}", toml::to_string_pretty(&shown).context("failed to render configuration")?);
    Ok(ExitCode::SUCCESS)
}

/// Resolve a stored deck for its owner
pub async fn lookup(config: &DeckConfig, user: &str, file_id: &str, plain: bool) -> Result<ExitCode> {
    let output = OutputHandler::new(plain);
    let store = LocalArtifactStore::new(config.workflow.output_root.clone());

    match store
        .lookup(&OwnerKey::from_user(user), &ArtifactId(file_id.to_string()))
        .await
    {
        Ok(path) => {
            output.print_success(&path.display().to_string());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            output.print_error(&e.to_string());
            Ok(ExitCode::from(EXIT_CLIENT_ERROR))
        }
    }
}
