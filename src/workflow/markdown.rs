//! Markdown structure checks for narrative stages

/// Counts of the structural elements a translation must preserve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outline {
    pub headings: usize,
    pub bullets: usize,
}

/// Count ATX headings and list items outside fenced code blocks
pub fn outline(text: &str) -> Outline {
    let mut result = Outline::default();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if is_heading(trimmed) {
            result.headings += 1;
        } else if is_bullet(trimmed) {
            result.bullets += 1;
        }
    }
    result
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

fn is_bullet(line: &str) -> bool {
    if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("+ ") {
        return true;
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && (line[digits..].starts_with(". ") || line[digits..].starts_with(") "))
}

/// Remove a ```markdown fence the model wrapped the whole reply in
pub fn strip_outer_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match body.find('\n') {
        Some(newline) if !body[..newline].contains(' ') => body[newline + 1..].trim(),
        _ => trimmed,
    }
}
