//! Helpers for pulling structured blocks out of model completions.
//!
//! Completions are expected to carry fenced code blocks (```scene,
//! ```json), but models drift; these helpers tolerate missing language
//! tags and bare JSON bodies.

/// Returns the first fenced block tagged with `lang`.
#[must_use]
pub fn fenced_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    fenced_blocks(text, lang).into_iter().next()
}

/// Returns every fenced block tagged with `lang`, in order.
#[must_use]
pub fn fenced_blocks<'a>(text: &'a str, lang: &str) -> Vec<&'a str> {
    let open = format!("```{lang}");
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        // Require the tag to end the line, so "json" does not match "jsonc".
        let Some(after) = after.strip_prefix('\n').or_else(|| {
            after
                .strip_prefix("\r\n")
                .or_else(|| after.strip_prefix(' '))
        }) else {
            rest = &after[..];
            continue;
        };
        match after.find("```") {
            Some(end) => {
                blocks.push(after[..end].trim());
                rest = &after[end + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Returns the first fenced block regardless of language tag.
#[must_use]
pub fn any_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the language tag line, if any.
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Extracts a JSON array from a completion: a fenced ```json block when
/// present, otherwise the whole trimmed text if it parses as an array.
#[must_use]
pub fn json_array(text: &str) -> Option<String> {
    if let Some(block) = fenced_block(text, "json") {
        if block.trim_start().starts_with('[') {
            return Some(block.to_string());
        }
    }
    let trimmed = text.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        return Some(trimmed.to_string());
    }
    None
}

/// Structural lint for generated scene source: non-empty, opens with a
/// `scene` header, braces balanced and never negative.
pub fn lint_scene_source(source: &str) -> Result<(), String> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err("scene source is empty".to_string());
    }
    if !trimmed.starts_with("scene") {
        return Err("scene source does not open with a scene header".to_string());
    }

    let mut depth: i64 = 0;
    for (i, c) in trimmed.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("unbalanced '}}' at byte {i}"));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("{depth} unclosed brace(s)"));
    }
    Ok(())
}

/// Ensures the scene declares a white background, injecting the directive
/// right after the scene header when absent.
#[must_use]
pub fn ensure_background(source: &str) -> String {
    if source.contains("background") {
        return source.to_string();
    }
    match source.find('{') {
        Some(brace) => {
            let mut out = String::with_capacity(source.len() + 20);
            out.push_str(&source[..=brace]);
            out.push_str("\n  background white");
            out.push_str(&source[brace + 1..]);
            out
        }
        None => source.to_string(),
    }
}
