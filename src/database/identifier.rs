/// Strips everything outside the unquoted-identifier character set.
///
/// Table and column names cannot be bound as statement parameters, so any
/// identifier that reaches SQL text goes through here first. The retained
/// set (ASCII letters, digits, `_`, and the schema-qualifying `.`) cannot
/// close an identifier context: no quotes, whitespace, semicolons, or
/// comment sequences survive.
///
/// An identifier that sanitizes to the empty string is invalid input; the
/// caller decides how to reject it.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect()
}
