//! Staged rendering pipeline.
//!
//! Data flows one way through the stages:
//!
//! ```text
//! store fragments ──► extract ──► images ──► markup ──► typeset ──► artifact
//!                                                          │
//!                                          diagnostics ◄───┘  (log parsing)
//! ```
//!
//! * [`extract`] — XML fragments to the typed block tree, per section
//! * [`images`] — collect references, fetch/decode, recompress
//! * [`markup`] — block tree to LaTeX source and BibTeX database
//! * [`typeset`] — working directory, engine passes, artifact collection
//! * [`diagnostics`] — engine log parsing and transcript formatting
//!
//! Stages never abort the document for per-item problems; they accumulate
//! [`diagnostics::Diagnostic`]s and carry on. The boundary in
//! [`crate::compile`] decides what counts as a hard failure.

pub mod diagnostics;
pub mod extract;
pub mod images;
pub mod markup;
pub mod typeset;
