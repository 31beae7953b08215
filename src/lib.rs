//! # jatsify
//!
//! A library for converting legacy article-body HTML into SPS/JATS XML.
//!
//! Bodies authored in a constrained late-90s HTML dialect (font tags, layout
//! tables, anchor-based cross references) are parsed into a mutable tree and
//! rewritten by an ordered series of passes: structural normalization,
//! heuristic cross-reference annotation driven by a clue table, and asset
//! materialization (figures, tables, footnotes, appendices) with optional
//! external fragment resolution.
//!
//! ## Quick Start
//!
//! ```
//! use jatsify::{PipelineContext, RuleTable, convert_body};
//!
//! let rules = RuleTable::parse("fig|fig\ntab|table-wrap\nf|fn\n").unwrap();
//! let ctx = PipelineContext::new("S0001-00001998000100001", 1);
//! let html = r##"<p>see note<a href="#f1">1</a></p><a name="f1"></a>the note"##;
//!
//! let conversion = convert_body(html, &rules, &ctx, None).unwrap();
//! let xml = conversion.doc.to_xml(conversion.body);
//! assert!(xml.contains(r#"<xref ref-type="fn" rid="f1">"#));
//! ```
//!
//! Reference resolution is best-effort: anchors the heuristics cannot place
//! are logged via `tracing` and left in the output rather than failing the
//! conversion. Installing a subscriber is up to the caller.

pub mod dom;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod rules;

pub use dom::{Document, NodeId};
pub use error::{Error, Result};
pub use pipeline::{Conversion, PassSnapshot, PipelineContext, convert_body};
pub use resolver::FragmentResolver;
pub use rules::{Inferer, RuleTable, generate_id, reftype_for};
