//! Conversation-to-slide-deck pipeline
//!
//! A request flows through [`parser::ContentParser`] (slide specs),
//! [`generator::SlideContentGenerator`] (validated markup per slide),
//! [`converter::ConversionOrchestrator`] (external toolchain build) and an
//! [`store::ArtifactStore`], coordinated by [`workflow::WorkflowCoordinator`].

pub mod brain;
pub mod config;
pub mod converter;
pub mod error;
pub mod generator;
pub mod markup;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod request;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod text;
pub mod workflow;
pub mod workspace;


pub use config::DeckConfig;
pub use error::{DeckError, ErrorKind, WorkflowError};
pub use model::{ArtifactId, ChartAsset, ConversationTurn, DeckInput, OwnerKey, PresentationArtifact, Source};
pub use request::{ErrorResponse, GenerateRequest, GenerateResponse};
pub use runtime::Runtime;
pub use workflow::{Stage, WorkflowCoordinator, WorkflowOutcome, WorkflowState};
