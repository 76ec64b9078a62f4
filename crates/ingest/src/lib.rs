//! Inbound message routing and the receipt pipeline.
//!
//! The router consumes every message a line delivers: dedupe, chat/lead/
//! agenda bookkeeping, ad events, and — for media that looks like a
//! payment receipt — the OCR + scoring pipeline that records conversions.

pub mod pipeline;
pub mod router;
pub mod rules;

pub use pipeline::ReceiptPipeline;
pub use router::InboundRouter;
