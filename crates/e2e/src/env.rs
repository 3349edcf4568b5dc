//! `${VAR}` substitution in case values

use crate::error::EnvError;

/// Expand `${NAME}` references from the process environment.
///
/// A `$` not followed by `{` is kept as is. An unset variable or an
/// unterminated `${` is an error.
pub fn expand(input: &str) -> Result<String, EnvError> {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expand `${NAME}` references with a custom lookup
pub fn expand_with<F>(input: &str, lookup: F) -> Result<String, EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| EnvError::Unterminated(input.to_string()))?;

        let name = after[..end].trim();
        let value = lookup(name).ok_or_else(|| EnvError::Unset(name.to_string()))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
