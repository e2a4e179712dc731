//! Token-budgeted context packing.

use crate::retriever::RetrievalResult;

/// A packed, titled block of retrieved items within a token budget.
#[derive(Debug, Clone, Default)]
pub struct ContextPack {
    /// The rendered block. Empty when nothing fit.
    pub text: String,
    /// Items included, in input order.
    pub items: Vec<RetrievalResult>,
    /// Estimated token count of `text`.
    pub token_count: usize,
    /// Whether anything was dropped or cut to fit.
    pub truncated: bool,
}

/// Rough token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() { 0 } else { text.len().div_ceil(4).max(1) }
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if max_tokens == 0 || text.is_empty() {
        return String::new();
    }
    if text.len() <= max_tokens * 4 {
        return text.to_string();
    }
    // Reserve room for the ellipsis so the estimate stays within budget.
    let max_chars = (max_tokens * 4).saturating_sub(3);
    let mut cut = max_chars;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", text[..cut].trim_end())
}

/// Assemble a titled context pack from ordered results.
///
/// The title goes first; items are appended until the next one would exceed
/// the budget. If even the first item is too large, it is truncated to the
/// remaining budget so the pack is never empty when results exist.
pub fn build_context_pack(
    title: &str,
    results: &[RetrievalResult],
    token_budget: usize,
) -> ContextPack {
    if results.is_empty() || token_budget == 0 {
        return ContextPack::default();
    }

    let header = format!("## {}", title);
    let mut token_count = estimate_tokens(&header);
    let mut lines = vec![header];
    let mut items: Vec<RetrievalResult> = Vec::new();
    let mut truncated = false;

    for result in results {
        let item_text = format!(
            "### {} (score: {:.2})\n{}",
            result.source, result.score, result.content
        )
        .trim()
        .to_string();
        if item_text.is_empty() {
            continue;
        }

        let item_tokens = estimate_tokens(&item_text);
        if token_count + item_tokens > token_budget {
            truncated = true;
            if items.is_empty() {
                let available = token_budget.saturating_sub(token_count);
                let cut = truncate_to_tokens(&item_text, available);
                if !cut.is_empty() {
                    token_count += estimate_tokens(&cut);
                    lines.push(cut);
                    items.push(result.clone());
                }
            }
            break;
        }

        token_count += item_tokens;
        lines.push(item_text);
        items.push(result.clone());
    }

    if items.is_empty() {
        return ContextPack {
            truncated,
            ..Default::default()
        };
    }

    ContextPack {
        text: lines.join("\n\n"),
        items,
        token_count,
        truncated,
    }
}
