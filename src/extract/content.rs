//! Main-content extraction
//!
//! Pulls the readable article body out of an HTML page: boilerplate
//! containers are discarded, candidate blocks (paragraphs, blockquotes,
//! preformatted text) are grouped by their parent container, containers
//! are scored by text mass discounted by anchor density, and the winning
//! container's blocks are emitted in document order.
//!
//! The walk is deterministic: the same HTML always yields byte-identical
//! output, which makes re-extraction a safe full overwrite.

use crate::error::{Error, ExtractError, Result};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;

/// Containers whose subtrees never contain article text
const EXCLUDED_CONTAINERS: [&str; 8] = [
    "script", "style", "noscript", "head", "nav", "header", "footer", "aside",
];

/// Block elements considered article-body candidates
const CANDIDATE_BLOCKS: [&str; 3] = ["p", "blockquote", "pre"];

/// Minimum text mass for a container to win outright
const MIN_CONTAINER_CHARS: usize = 80;

/// Containers with more anchor text than this fraction are link farms
const MAX_LINK_DENSITY: f64 = 0.5;

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Extract(ExtractError::Parse(e.to_string())))
}

/// Extract the main article text from an HTML document
///
/// Returns `None` when the document contains no usable text at all.
pub fn extract_text(html: &str) -> Result<Option<String>> {
    let doc = Html::parse_document(html);

    if let Some(text) = extract_by_container(&doc)? {
        return Ok(Some(text));
    }

    // No container won; fall back to every visible text node
    let text = full_text(&doc);
    if text.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

/// Per-container accumulation of candidate-block text
struct ContainerStats {
    text_len: usize,
    anchor_len: usize,
}

/// Score candidate containers and emit the winner's blocks in order
fn extract_by_container(doc: &Html) -> Result<Option<String>> {
    let candidate_sel = selector(&CANDIDATE_BLOCKS.join(", "))?;
    let anchor_sel = selector("a")?;

    // Group candidate blocks by parent container, preserving discovery order
    let mut order = Vec::new();
    let mut stats = HashMap::new();

    for block in doc.select(&candidate_sel) {
        if in_excluded_subtree(&block) || has_candidate_parent(&block) {
            continue;
        }
        let Some(parent) = block.parent() else {
            continue;
        };

        let text_len = block_text(&block).chars().count();
        let anchor_len: usize = block
            .select(&anchor_sel)
            .map(|a| a.text().map(|t| t.chars().count()).sum::<usize>())
            .sum();

        let entry = stats.entry(parent.id()).or_insert_with(|| {
            order.push(parent.id());
            ContainerStats {
                text_len: 0,
                anchor_len: 0,
            }
        });
        entry.text_len += text_len;
        entry.anchor_len += anchor_len;
    }

    // Best container: most text after the anchor-density discount.
    // Ties keep the earliest container so the walk stays deterministic.
    let mut best = None;
    for id in &order {
        let s = &stats[id];
        if s.text_len == 0 {
            continue;
        }
        let density = s.anchor_len as f64 / s.text_len as f64;
        if density > MAX_LINK_DENSITY {
            continue;
        }
        let score = s.text_len as f64 * (1.0 - density);
        if best.map(|(_, b)| score > b).unwrap_or(true) {
            best = Some((*id, score));
        }
    }

    let Some((winner, _)) = best else {
        return Ok(None);
    };
    if stats[&winner].text_len < MIN_CONTAINER_CHARS {
        return Ok(None);
    }

    // Recover the winner's paragraphs and blockquotes in document order
    let mut blocks: Vec<String> = Vec::new();
    for block in doc.select(&candidate_sel) {
        if block.parent().map(|p| p.id()) != Some(winner) {
            continue;
        }
        if has_candidate_parent(&block) {
            continue;
        }
        let text = block_text(&block);
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    if blocks.is_empty() {
        Ok(None)
    } else {
        Ok(Some(blocks.join("\n\n")))
    }
}

/// Whitespace-normalized text of one block
fn block_text(block: &ElementRef) -> String {
    block
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether an ancestor of this block is boilerplate
fn in_excluded_subtree(block: &ElementRef) -> bool {
    block.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|e| EXCLUDED_CONTAINERS.contains(&e.name()))
            .unwrap_or(false)
    })
}

/// Whether the direct parent is itself a candidate block
///
/// A `p` inside a `blockquote` is counted through the blockquote, not on
/// its own, so nested markup is never double-counted.
fn has_candidate_parent(block: &ElementRef) -> bool {
    block
        .parent()
        .and_then(ElementRef::wrap)
        .map(|parent| CANDIDATE_BLOCKS.contains(&parent.value().name()))
        .unwrap_or(false)
}

/// Every visible text node in the document, one line per node
fn full_text(doc: &Html) -> String {
    let mut lines: Vec<String> = Vec::new();

    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let excluded = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| EXCLUDED_CONTAINERS.contains(&e.name()))
                .unwrap_or(false)
        });
        if excluded {
            continue;
        }

        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !normalized.is_empty() {
            lines.push(normalized);
        }
    }

    lines.join("\n")
}
