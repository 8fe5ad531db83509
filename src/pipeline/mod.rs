//! Pipeline stages for PDF reconstruction.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and an implementation (rendering backend, detector,
//! corrector) can be swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ detect ──▶ normalize ──▶ merge ──▶ correct
//! (URL/path)  (pdfium)  (VLM/OCR)  (Region Model) (Document) (Text only)
//! ```
//!
//! 1. [`input`]     — canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]    — rasterise selected pages; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`detect`]    — ask the detection source(s) for raw regions per page;
//!    [`llm`] holds the vision-model detector, [`encode`] the image payloads
//! 4. [`normalize`] — rescale geometry and confidence into the Region Model
//! 5. [`merge`]     — filter, resolve overlaps, assemble tables, order
//! 6. [`correct`]   — optional text correction; [`postprocess`] holds the
//!    deterministic text hygiene rules used along the way

pub mod correct;
pub mod detect;
pub mod encode;
pub mod input;
pub mod llm;
pub mod merge;
pub mod normalize;
pub mod postprocess;
pub mod render;
