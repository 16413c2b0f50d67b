//! Translation of user filter expressions into the platform's filter query
//! syntax.
//!
//! Input grammar: clauses `field op value` joined by `&&` (AND) and `||`
//! (OR), with ops `=`, `!=`, `>`, `>=`, `<`, `<=`, `~` (contains), `!~`.
//! Output uses the platform operators (`:`, `!:`, `>:`, `<:`, `~`, `!~`)
//! with `,` for AND and `|` for OR; string values are double-quoted.

// Longest operators first so `!=` wins over `=` and `>=` over `>`.
const OPS: [(&str, &str); 8] = [
    ("!~", "!~"),
    ("!=", "!:"),
    (">=", ">:"),
    ("<=", "<:"),
    ("~", "~"),
    ("=", ":"),
    (">", ">"),
    ("<", "<"),
];

/// Translate a full expression. Empty input yields an empty filter.
pub fn translate(expr: &str) -> Result<String, String> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(String::new());
    }
    let groups: Vec<String> = split_outside_quotes(expr, "||")
        .into_iter()
        .map(translate_conjunction)
        .collect::<Result<_, _>>()?;
    Ok(groups.join("|"))
}

fn translate_conjunction(group: &str) -> Result<String, String> {
    let clauses: Vec<String> = split_outside_quotes(group, "&&")
        .into_iter()
        .map(translate_clause)
        .collect::<Result<_, _>>()?;
    Ok(clauses.join(","))
}

fn split_outside_quotes<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut rest = s;
    while let Some(pos) = find_outside_quotes(rest, sep) {
        parts.push(&s[start..start + pos]);
        start += pos + sep.len();
        rest = &s[start..];
    }
    parts.push(rest);
    parts
}

fn translate_clause(clause: &str) -> Result<String, String> {
    let clause = clause.trim();
    if clause.is_empty() {
        return Err("empty filter clause".into());
    }
    for (op, mapped) in OPS {
        // Skip operator characters inside a quoted value.
        if let Some(pos) = find_outside_quotes(clause, op) {
            let field = clause[..pos].trim();
            let value = clause[pos + op.len()..].trim();
            if field.is_empty() {
                return Err(format!("missing field in clause '{clause}'"));
            }
            if !field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            {
                return Err(format!("invalid field name '{field}'"));
            }
            if value.is_empty() {
                return Err(format!("missing value in clause '{clause}'"));
            }
            return Ok(format!("{}{}{}", field, mapped, render_value(value)));
        }
    }
    Err(format!("no operator found in clause '{clause}'"))
}

fn find_outside_quotes(s: &str, needle: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let nb = needle.as_bytes();
    let mut in_quotes = false;
    let mut i = 0;
    while i + nb.len() <= bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            _ if !in_quotes && bytes[i..].starts_with(nb) => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn render_value(value: &str) -> String {
    let bare = value.trim_matches('"');
    if bare.parse::<f64>().is_ok() || bare == "true" || bare == "false" {
        return bare.to_string();
    }
    format!("\"{}\"", bare.replace('"', "\\\""))
}
