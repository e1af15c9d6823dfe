/// Unwraps a reply that arrived inside a single Markdown code fence
/// (```` ```markdown ... ``` ````). Anything else is returned trimmed.
pub fn strip_markdown_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let Some((_, body)) = trimmed.split_once('\n') else {
        return trimmed.trim_matches('`').trim().to_string();
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}
