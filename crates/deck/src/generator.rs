//! SlideContentGenerator: slide specs to rendered slide documents
//!
//! Title and sources slides come from fixed templates. Content slides are
//! authored by the generative text service under the style contract; each
//! answer is cleaned and validated, and a violation or a transient service
//! failure triggers a regeneration governed by the retry policy.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{stream, TryStreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::brain::{CompletionProvider, ProviderError};
use crate::config::{GenerationConfig, StyleConfig};
use crate::error::GenerationError;
use crate::markup::{clean_model_output, document_shell, escape, MarkupValidator, Violation};
use crate::model::{BodyHints, RenderedSlide, SlideKind, SlideSpec};
use crate::prompt;

/// Why a single generation attempt failed
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("{0}")]
    Service(ProviderError),

    #[error("{} markup violation(s)", .0.len())]
    Markup(Vec<Violation>),

    #[error("generation permits closed")]
    Closed,
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Service(e) => e.is_transient(),
            AttemptError::Markup(_) => true,
            AttemptError::Closed => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptError::Service(e) => e.retry_after(),
            _ => None,
        }
    }
}

pub struct SlideContentGenerator {
    provider: Arc<dyn CompletionProvider>,
    /// Process-wide cap on in-flight generative calls
    permits: Arc<Semaphore>,
    config: GenerationConfig,
    style: StyleConfig,
    validator: MarkupValidator,
}

impl SlideContentGenerator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        permits: Arc<Semaphore>,
        config: GenerationConfig,
        style: StyleConfig,
    ) -> Self {
        let validator = MarkupValidator::new(&style);
        Self {
            provider,
            permits,
            config,
            style,
            validator,
        }
    }

    pub fn validator(&self) -> &MarkupValidator {
        &self.validator
    }

    /// Render every spec; the result is ordered by `spec.index`
    ///
    /// The first slide that exhausts its retries aborts the whole run and
    /// drops the calls still in flight.
    pub async fn generate(
        &self,
        specs: &[SlideSpec],
        cancel: &CancellationToken,
    ) -> Result<Vec<RenderedSlide>, GenerationError> {
        let started = Instant::now();
        let parallel = self.config.parallel_slides.max(1);

        tracing::info!(
            "[GENERATOR] Rendering {} slide(s) with parallelism {}",
            specs.len(),
            parallel
        );

        let renders = specs
            .iter()
            .cloned()
            .map(|spec| Ok::<_, GenerationError>(self.render(spec)));
        let work = stream::iter(renders)
            .try_buffer_unordered(parallel)
            .try_collect::<Vec<RenderedSlide>>();

        let mut slides = tokio::select! {
            result = work => result?,
            _ = cancel.cancelled() => {
                tracing::warn!("[GENERATOR] Cancelled with generation in flight");
                return Err(GenerationError::Cancelled);
            }
        };

        slides.sort_by_key(|slide| slide.spec.index);

        tracing::info!(
            "[GENERATOR] Rendered {} slide(s) in {:.2}s",
            slides.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(slides)
    }

    async fn render(&self, spec: SlideSpec) -> Result<RenderedSlide, GenerationError> {
        let fragment = match (spec.kind, &spec.body_hints) {
            (SlideKind::Title, BodyHints::Subtitle { text }) => {
                self.templated(&spec, title_fragment(&spec.heading, text, &self.style))?
            }
            (SlideKind::Sources, BodyHints::Sources { items }) => {
                self.templated(&spec, sources_fragment(&spec.heading, items, &self.style))?
            }
            (SlideKind::Content, BodyHints::QuestionAnswer { .. }) => self.authored(&spec).await?,
            (kind, _) => {
                return Err(GenerationError::UnsupportedSlide {
                    slide: spec.index,
                    kind: kind.to_string(),
                });
            }
        };

        Ok(RenderedSlide {
            markup: document_shell(&spec.heading, &fragment, &self.style),
            chart_placeholders: spec.expected_placeholders(),
            spec,
        })
    }

    fn templated(&self, spec: &SlideSpec, fragment: String) -> Result<String, GenerationError> {
        let tokens = placeholder_tokens(spec);
        self.validator
            .check(&fragment, &tokens)
            .map_err(|violations| GenerationError::InvalidMarkup {
                slide: spec.index,
                attempts: 1,
                violations,
            })?;
        Ok(fragment)
    }

    async fn authored(&self, spec: &SlideSpec) -> Result<String, GenerationError> {
        let tokens = placeholder_tokens(spec);
        let feedback: Mutex<Vec<Violation>> = Mutex::new(Vec::new());
        let label = format!("slide {}", spec.index);
        let started = Instant::now();

        let outcome = self
            .config
            .retry
            .run_with_hint(
                &label,
                || async {
                    let previous = feedback.lock().map(|v| v.clone()).unwrap_or_default();
                    let request = prompt::content_request(spec, &self.style, &previous);
                    tracing::debug!(slide = spec.index, "[GENERATOR] prompt:\n{}", request.prompt);

                    let raw = {
                        let _permit = self.permits.acquire().await.map_err(|_| AttemptError::Closed)?;
                        self.provider.complete(request).await.map_err(AttemptError::Service)?
                    };

                    let fragment = clean_model_output(&raw);
                    match self.validator.check(&fragment, &tokens) {
                        Ok(()) => Ok(fragment),
                        Err(violations) => {
                            tracing::warn!(
                                slide = spec.index,
                                "[GENERATOR] Markup rejected: {}",
                                violations
                                    .iter()
                                    .map(|v| v.to_string())
                                    .collect::<Vec<_>>()
                                    .join("; ")
                            );
                            if let Ok(mut slot) = feedback.lock() {
                                *slot = violations.clone();
                            }
                            Err(AttemptError::Markup(violations))
                        }
                    }
                },
                |e: &AttemptError| e.is_retryable(),
                |e: &AttemptError| e.retry_after(),
            )
            .await;

        match outcome {
            Ok(fragment) => {
                tracing::info!(
                    slide = spec.index,
                    "[GENERATOR] Slide authored in {:.2}s",
                    started.elapsed().as_secs_f64()
                );
                Ok(fragment)
            }
            Err(exhausted) => {
                let attempts = exhausted.attempts;
                tracing::error!(
                    slide = spec.index,
                    attempts,
                    "[GENERATOR] Giving up on slide: {}",
                    exhausted.error
                );
                Err(match exhausted.error {
                    AttemptError::Service(source) => GenerationError::Service {
                        slide: spec.index,
                        attempts,
                        source,
                    },
                    AttemptError::Markup(violations) => GenerationError::InvalidMarkup {
                        slide: spec.index,
                        attempts,
                        violations,
                    },
                    AttemptError::Closed => {
                        GenerationError::TaskFailed("generation permits closed".to_string())
                    }
                })
            }
        }
    }
}

fn placeholder_tokens(spec: &SlideSpec) -> Vec<String> {
    spec.expected_placeholders()
        .into_iter()
        .map(|p| p.token)
        .collect()
}

fn title_fragment(title: &str, subtitle: &str, style: &StyleConfig) -> String {
    format!(
        r#"<div style="display: flex; flex-direction: column; justify-content: center; align-items: center; width: 100%; margin: 40pt;">
  <h1 style="font-size: 34pt; color: {primary}; text-align: center; margin: 0 0 16pt 0;">{title}</h1>
  <p style="font-size: 16pt; color: {accent}; text-align: center; margin: 0;">{subtitle}</p>
</div>"#,
        primary = style.primary_color,
        accent = style.accent_color,
        title = escape(title),
        subtitle = escape(subtitle),
    )
}

fn sources_fragment(heading: &str, items: &[crate::model::Source], style: &StyleConfig) -> String {
    let entries: String = items
        .iter()
        .map(|source| match source.url.as_deref() {
            Some(url) if url != source.label => format!(
                "    <li>{} <span style=\"color: {};\">({})</span></li>\n",
                escape(&source.label),
                style.accent_color,
                escape(url)
            ),
            _ => format!("    <li>{}</li>\n", escape(&source.label)),
        })
        .collect();

    format!(
        r#"<div style="display: flex; flex-direction: column; width: 100%; margin: 30pt 40pt;">
  <h2 style="font-size: 26pt; color: {primary}; margin: 0 0 14pt 0;">{heading}</h2>
  <ul style="font-size: 12pt; color: {primary}; margin: 0;">
{entries}  </ul>
</div>"#,
        primary = style.primary_color,
        heading = escape(heading),
        entries = entries,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::brain::scripted::ScriptedProvider;
    use crate::brain::CompletionRequest;
    use crate::model::Source;
    use crate::retry::RetryPolicy;

    const CLEAN: &str = "<div><h2>Answer</h2><p>Revenue grew.</p></div>";

    fn config(parallel: usize) -> GenerationConfig {
        GenerationConfig {
            parallel_slides: parallel,
            global_permits: 8,
            retry: RetryPolicy::immediate(3),
        }
    }

    fn generator(provider: Arc<dyn CompletionProvider>, parallel: usize) -> SlideContentGenerator {
        SlideContentGenerator::new(provider, Arc::new(Semaphore::new(8)), config(parallel), StyleConfig::default())
    }

    fn content(index: usize, charts: &[&str]) -> SlideSpec {
        SlideSpec {
            index,
            kind: SlideKind::Content,
            heading: format!("Question {}", index),
            body_hints: BodyHints::QuestionAnswer {
                question: format!("Question {}", index),
                answer: "Answer".to_string(),
            },
            chart_refs: charts.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn title() -> SlideSpec {
        SlideSpec {
            index: 0,
            kind: SlideKind::Title,
            heading: "Deck <title>".to_string(),
            body_hints: BodyHints::Subtitle { text: "alice".to_string() },
            chart_refs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn templates_need_no_service_call() {
        let provider = Arc::new(ScriptedProvider::always(CLEAN));
        let sources = SlideSpec {
            index: 1,
            kind: SlideKind::Sources,
            heading: "Sources".to_string(),
            body_hints: BodyHints::Sources {
                items: vec![
                    Source::new("Report", Some("https://example.com".to_string())),
                    Source::new("Memo", None),
                ],
            },
            chart_refs: Vec::new(),
        };

        let slides = generator(provider.clone(), 2)
            .generate(&[title(), sources], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 0);
        assert!(slides[0].markup.contains("Deck &lt;title&gt;"));
        assert!(slides[1].markup.contains("<li>Memo</li>"));
        assert!(slides[1].markup.contains("https://example.com"));
    }

    #[tokio::test]
    async fn bullet_glyph_triggers_regeneration_with_feedback() {
        let provider = Arc::new(ScriptedProvider::new(|_, n| {
            if n == 0 {
                Ok("<div><p>• Revenue grew</p></div>".to_string())
            } else {
                Ok(CLEAN.to_string())
            }
        }));

        let slides = generator(provider.clone(), 1)
            .generate(&[content(1, &[])], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 2);
        let calls = provider.calls();
        assert!(!calls[0].prompt.contains("previous attempt"));
        assert!(calls[1].prompt.contains("manual bullet"));
        assert!(slides[0].markup.contains("Revenue grew."));
    }

    #[tokio::test]
    async fn code_fenced_documents_are_accepted() {
        let provider = Arc::new(ScriptedProvider::always(
            "```html\n<!DOCTYPE html><html><body><div><p>Fine</p></div></body></html>\n```",
        ));
        let slides = generator(provider, 1)
            .generate(&[content(1, &[])], &CancellationToken::new())
            .await
            .unwrap();
        assert!(slides[0].markup.contains("<div><p>Fine</p></div>"));
    }

    #[tokio::test]
    async fn placeholders_match_chart_refs() {
        let provider = Arc::new(ScriptedProvider::always(
            r#"<div><p>Two charts</p><div id="slide-01-chart-1" class="placeholder"></div><div id="slide-01-chart-2" class="placeholder"></div></div>"#,
        ));
        let slides = generator(provider, 1)
            .generate(&[content(1, &["a", "b"])], &CancellationToken::new())
            .await
            .unwrap();

        let placeholders = &slides[0].chart_placeholders;
        assert_eq!(placeholders.len(), 2);
        assert_eq!(placeholders[0].chart_id, "a");
        assert_eq!(placeholders[1].token, "slide-01-chart-2");
    }

    #[tokio::test]
    async fn persistent_violations_surface_generation_error() {
        let provider = Arc::new(ScriptedProvider::always("<div>bare text</div>"));
        let err = generator(provider.clone(), 1)
            .generate(&[content(1, &[])], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::InvalidMarkup { slide: 1, attempts: 3, .. }));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_service_error_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(|_, _| {
            Err(ProviderError::ApiError {
                status: 400,
                message: "bad request".to_string(),
            })
        }));
        let err = generator(provider.clone(), 1)
            .generate(&[content(1, &[])], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Service { attempts: 1, .. }));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn rate_limits_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(|_, n| {
            if n == 0 {
                Err(ProviderError::RateLimited { retry_after_ms: None })
            } else {
                Ok(CLEAN.to_string())
            }
        }));
        generator(provider.clone(), 1)
            .generate(&[content(1, &[])], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn retry_after_is_waited_out() {
        let provider = Arc::new(ScriptedProvider::new(|_, n| {
            if n == 0 {
                Err(ProviderError::RateLimited {
                    retry_after_ms: Some(120),
                })
            } else {
                Ok(CLEAN.to_string())
            }
        }));
        let started = Instant::now();
        generator(provider.clone(), 1)
            .generate(&[content(1, &[])], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 2);
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn output_order_ignores_completion_order() {
        // Earlier slides answer last
        let provider = Arc::new(ScriptedProvider::with_delays(|request, _| {
            let delay = if request.prompt.contains("Question 1\n") {
                60
            } else if request.prompt.contains("Question 2\n") {
                30
            } else {
                0
            };
            (Duration::from_millis(delay), Ok(CLEAN.to_string()))
        }));

        let specs = vec![content(1, &[]), content(2, &[]), content(3, &[])];
        let slides = generator(provider, 3)
            .generate(&specs, &CancellationToken::new())
            .await
            .unwrap();

        let order: Vec<usize> = slides.iter().map(|s| s.spec.index).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    struct CountingProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CompletionProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(CLEAN.to_string())
        }
    }

    #[tokio::test]
    async fn process_wide_permits_bound_concurrency() {
        let provider = Arc::new(CountingProvider {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let generator = SlideContentGenerator::new(
            provider.clone(),
            Arc::new(Semaphore::new(2)),
            config(6),
            StyleConfig::default(),
        );

        let specs: Vec<SlideSpec> = (1..=6).map(|i| content(i, &[])).collect();
        generator.generate(&specs, &CancellationToken::new()).await.unwrap();

        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_calls() {
        let provider = Arc::new(ScriptedProvider::with_delays(|_, _| {
            (Duration::from_secs(30), Ok(CLEAN.to_string()))
        }));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = generator(provider, 2)
            .generate(&[content(1, &[]), content(2, &[])], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
    }

    #[tokio::test]
    async fn mismatched_hints_are_unsupported() {
        let mut spec = content(1, &[]);
        spec.kind = SlideKind::Title;
        let err = generator(Arc::new(ScriptedProvider::always(CLEAN)), 1)
            .generate(&[spec], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::UnsupportedSlide { slide: 1, .. }));
    }
}
