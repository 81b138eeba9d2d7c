// Gateway module for impact - follows the Train Station Pattern
// All external access must go through this gateway

mod analyzer;
mod directives;
mod graph;

pub use analyzer::ImpactAnalyzer;
pub use directives::{Directive, DirectiveKind, DirectiveScanner, RegexDirectiveScanner};
pub use graph::ReferenceGraph;
