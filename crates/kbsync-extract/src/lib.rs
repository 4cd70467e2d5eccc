//! # kbsync-extract
//!
//! Text extraction for the kbsync pipeline.
//!
//! Plain text passes through, HTML is stripped in-process, and every other
//! supported format is converted by an external worker. Worker output is
//! cached under a content fingerprint so unchanged files are never
//! re-extracted, and a FIFO ticket pool bounds how many workers run at once.

pub mod cache;
pub mod error;
pub mod markup;
pub mod ocr;
pub mod service;
pub mod ticket;
pub mod worker;

pub use cache::{CacheSlots, ExtractionCache, Fingerprint, SlotState};
pub use error::ExtractError;
pub use markup::strip_markup;
pub use ocr::{render_worker_config, OcrPlan, DEFAULT_CONFIG_TEMPLATE};
pub use service::{dotted_extension, ExtractionService, TextStream};
pub use ticket::{Ticket, TicketPool};
pub use worker::{Extractor, ProcessExtractor, WorkerJob};
