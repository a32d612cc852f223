//! docent-core — Artifact catalog, recognition client and session state machine.
//!
//! Recognition is delegated to a Gemini vision model; everything here is the
//! mapping around it plus the capture → recognize → resolve flow.

pub mod catalog;
pub mod recognizer;
pub mod session;
pub mod types;

pub use catalog::{Catalog, CatalogError};
pub use recognizer::{GeminiRecognizer, HttpTransport, Recognizer, RecognizerError};
pub use session::{Effect, Event, Notice, Phase, Session, State};
pub use types::{Artifact, ArtifactKind, EncodedImage, ImageMime, Verdict};
