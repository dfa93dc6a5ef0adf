//! Pipeline stages for PDF-to-EPUB conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and a backend (e.g. the text extractor) can be swapped
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ segment ──▶ package
//! (Upload)   (text)     (chapters)   (EPUB bytes)        unpack ◀── (EPUB bytes)
//! ```
//!
//! 1. [`input`]   — turn a path or URL into an [`input::Upload`] and validate it
//! 2. [`extract`] — decode PDF text; runs in `spawn_blocking` because parsing is
//!    CPU-bound and synchronous
//! 3. [`segment`] — split flat text into chapters; never fails
//! 4. [`package`] — write the EPUB container
//! 5. [`unpack`]  — read a container back for inspection

pub mod extract;
pub mod input;
pub mod package;
pub mod segment;
pub mod unpack;
