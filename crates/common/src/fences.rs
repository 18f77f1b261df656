//! Pull a runnable script out of generated text.

const FENCE: &str = "```";

/// Return the script contained in `text`.
///
/// The body of the first fenced block wins when one exists; its info string
/// (`bash`, `sh`, ...) is dropped. An unterminated fence runs to the end of the
/// text. Surrounding blank lines are trimmed and a non-empty result always
/// ends in a newline.
pub fn extract_script(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let body = match lines.iter().position(|line| is_fence(line)) {
        Some(open) => {
            let rest = &lines[open + 1..];
            let close = rest.iter().position(|line| is_fence(line)).unwrap_or(rest.len());
            &rest[..close]
        }
        None => &lines[..],
    };

    let first = body.iter().position(|line| !line.trim().is_empty());
    let last = body.iter().rposition(|line| !line.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => {
            let mut script = body[first..=last].join("\n");
            script.push('\n');
            script
        }
        _ => String::new(),
    }
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}
