use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// How one file refers to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    /// `{% include %}`, `#include "x"`
    Include,
    /// `{% extends %}`
    Extends,
    /// `{% import %}`, `{% from "x" import y %}`
    Import,
    /// Named template loads, `{% load "x" %}` or `render_template("x")`
    Load,
    /// `{{> partial}}`
    Partial,
}

/// A reference found in a file, target exactly as written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub target: String,
    /// 1-based
    pub line: usize,
}

/// Extracts references to other files from file contents
///
/// The regex implementation is a heuristic: references built at runtime
/// (string concatenation, variables) are not seen. A resolver backed by a
/// real parser can be dropped in through this trait.
pub trait DirectiveScanner: Send + Sync {
    fn scan(&self, rel_path: &str, content: &str) -> Vec<Directive>;
}

static TEMPLATE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{%-?\s*(include|extends|import|from)\s+["']([^"']+)["']"#)
        .expect("valid template tag regex")
});

static LOAD_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{%-?\s*load\s+["']([^"']+)["']"#).expect("valid load tag regex")
});

static RENDER_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\b(?:render_template|get_template|select_template|render_to_string|render)\s*\([^)]*?["']([^"'\s]+\.[A-Za-z0-9]+)["']"#,
    )
    .expect("valid render call regex")
});

static C_INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*#\s*include\s+"([^"]+)""#).expect("valid include regex"));

static PARTIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\{>\s*["']?([A-Za-z0-9_./-]+)"#).expect("valid partial regex")
});

/// Line-oriented regex scanner for template, Python render and C include forms
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexDirectiveScanner;

impl DirectiveScanner for RegexDirectiveScanner {
    fn scan(&self, _rel_path: &str, content: &str) -> Vec<Directive> {
        let mut directives = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            let mut push = |kind, target: &str| {
                directives.push(Directive {
                    kind,
                    target: target.to_string(),
                    line: line_no,
                })
            };

            for caps in TEMPLATE_TAG.captures_iter(line) {
                let kind = match &caps[1] {
                    "include" => DirectiveKind::Include,
                    "extends" => DirectiveKind::Extends,
                    _ => DirectiveKind::Import,
                };
                push(kind, &caps[2]);
            }
            for caps in LOAD_TAG.captures_iter(line) {
                push(DirectiveKind::Load, &caps[1]);
            }
            for caps in RENDER_CALL.captures_iter(line) {
                push(DirectiveKind::Load, &caps[1]);
            }
            if let Some(caps) = C_INCLUDE.captures(line) {
                push(DirectiveKind::Include, &caps[1]);
            }
            for caps in PARTIAL.captures_iter(line) {
                push(DirectiveKind::Partial, &caps[1]);
            }
        }

        directives
    }
}
