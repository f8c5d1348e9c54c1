//! Editing top-level variable assignments in shell-sourced files.
//!
//! PKGBUILDs and archiso's `profiledef.sh` are bash scripts whose metadata
//! lives in plain `key=value` / `key=(...)` assignments at column zero.
//! Only those lines are touched; indented lines inside functions never are.

/// Double-quote `value` for bash, escaping `\`, `"`, `$` and backticks.
pub fn double_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Bash array literal of double-quoted words: `("a" "b")`.
pub fn array<S: AsRef<str>>(values: &[S]) -> String {
    let words: Vec<String> = values.iter().map(|v| double_quote(v.as_ref())).collect();
    format!("({})", words.join(" "))
}

/// Line range `[start, end]` of the assignment to `key`, if present.
fn find_assignment(lines: &[&str], key: &str) -> Option<(usize, usize)> {
    let prefix = format!("{}=", key);
    let start = lines.iter().position(|l| l.starts_with(&prefix))?;
    let rhs = &lines[start][prefix.len()..];
    if rhs.starts_with('(') && !rhs.contains(')') {
        // multi-line array
        let end = lines[start + 1..]
            .iter()
            .position(|l| l.contains(')'))
            .map(|off| start + 1 + off)
            .unwrap_or(lines.len() - 1);
        return Some((start, end));
    }
    Some((start, start))
}

/// Replace the assignment to `key` with `key=<raw_value>`.
///
/// `raw_value` is written verbatim, so callers quote with [`double_quote`]
/// or build arrays with [`array`]. When `key` is not assigned yet, the
/// assignment is inserted before the first function definition (or appended).
pub fn set_var(script: &str, key: &str, raw_value: &str) -> String {
    let lines: Vec<&str> = script.lines().collect();
    let assignment = format!("{}={}", key, raw_value);

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 1);
    match find_assignment(&lines, key) {
        Some((start, end)) => {
            out.extend(lines[..start].iter().map(|l| l.to_string()));
            out.push(assignment);
            out.extend(lines[end + 1..].iter().map(|l| l.to_string()));
        }
        None => {
            let insert_at = lines
                .iter()
                .position(|l| is_function_start(l))
                .unwrap_or(lines.len());
            out.extend(lines[..insert_at].iter().map(|l| l.to_string()));
            out.push(assignment);
            if insert_at < lines.len() {
                out.push(String::new());
            }
            out.extend(lines[insert_at..].iter().map(|l| l.to_string()));
        }
    }

    let mut result = out.join("\n");
    if script.ends_with('\n') || script.is_empty() {
        result.push('\n');
    }
    result
}

/// Raw right-hand side of the assignment to `key`, with one level of
/// surrounding quotes removed.
pub fn get_var(script: &str, key: &str) -> Option<String> {
    let lines: Vec<&str> = script.lines().collect();
    let (start, end) = find_assignment(&lines, key)?;
    let prefix_len = key.len() + 1;
    let mut value = lines[start][prefix_len..].to_string();
    for line in &lines[start + 1..=end] {
        value.push('\n');
        value.push_str(line);
    }
    let trimmed = value.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(trimmed);
    Some(unquoted.to_string())
}

fn is_function_start(line: &str) -> bool {
    let line = line.trim_end();
    !line.starts_with(char::is_whitespace)
        && (line.ends_with("() {") || line.ends_with("(){") || line.ends_with("()"))
}
