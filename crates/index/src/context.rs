//! Plain-text context block built from search hits, ready to hand to a prompt.

use crate::types::SearchHit;

const HEADER: &str = "Related items:";
const NO_MATCHES: &str = "No related items were found.";

/// Render hits as a bulleted list, best first.
pub fn render_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_MATCHES.to_string();
    }

    let lines: Vec<String> = hits
        .iter()
        .map(|hit| {
            format!(
                "- Item: {}. Description: {}.",
                hit.item.name.trim_end_matches('.'),
                hit.item.description.trim_end_matches('.')
            )
        })
        .collect();

    format!("{}\n{}", HEADER, lines.join("\n"))
}
