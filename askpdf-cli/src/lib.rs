//! # askpdf
//!
//! Command-line front end for [`askpdf_rag`]: ingest PDFs (or text files) into
//! a persisted index and ask questions about them.
//!
//! ```bash
//! export GROQ_API_KEY=gsk_...
//! askpdf paper.pdf notes.pdf                  # ingest, then prompt for questions
//! askpdf -q "What is the main result?"        # ask against the saved index
//! askpdf --reset --no-persist other.pdf -k 6  # in-memory, six chunks of context
//! ```

pub mod app;
pub mod cli;

pub use cli::{Cli, EmbedderKind};
