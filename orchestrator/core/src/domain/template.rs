// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Named → positional placeholder rewriting.
//!
//! `:name` placeholders become `$1`, `$2`, ... in first-occurrence order and
//! a repeated name reuses its index. Values are never spliced into the SQL
//! text; they travel alongside it in [`BoundQuery::params`].
//!
//! Not treated as placeholders: `::type` casts, anything inside single-quoted
//! literals or double-quoted identifiers, and `--` line comments.

use crate::domain::parameters::ParamValue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template references undeclared parameter ':{0}'")]
    UndeclaredParameter(String),

    #[error("unterminated quoted section starting at byte {0}")]
    Unterminated(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<ParamValue>,
    /// Parameter name for each positional slot.
    pub names: Vec<String>,
}

enum Piece<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

fn scan(template: &str) -> Result<Vec<Piece<'_>>, TemplateError> {
    let bytes = template.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                let open = i;
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(TemplateError::Unterminated(open)),
                        // doubled quote is an escaped quote
                        Some(&b) if b == quote && bytes.get(i + 1) == Some(&quote) => i += 2,
                        Some(&b) if b == quote => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b':' if bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') => {
                if start < i {
                    pieces.push(Piece::Text(&template[start..i]));
                }
                let name_start = i + 1;
                let mut end = name_start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                pieces.push(Piece::Placeholder(&template[name_start..end]));
                i = end;
                start = end;
            }
            _ => i += 1,
        }
    }

    if start < bytes.len() {
        pieces.push(Piece::Text(&template[start..]));
    }
    Ok(pieces)
}

/// Distinct placeholder names in first-occurrence order.
pub fn placeholders(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut names: Vec<String> = Vec::new();
    for piece in scan(template)? {
        if let Piece::Placeholder(name) = piece {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Rewrite `template` against validated values.
///
/// `values` holds every declared parameter (optional ones resolved to
/// [`ParamValue::Null`]); a placeholder missing from it is undeclared.
pub fn bind_template(template: &str, values: &[(String, ParamValue)]) -> Result<BoundQuery, TemplateError> {
    let mut sql = String::with_capacity(template.len());
    let mut names: Vec<String> = Vec::new();
    let mut params = Vec::new();

    for piece in scan(template)? {
        match piece {
            Piece::Text(text) => sql.push_str(text),
            Piece::Placeholder(name) => {
                let position = match names.iter().position(|n| n == name) {
                    Some(p) => p,
                    None => {
                        let value = values
                            .iter()
                            .find(|(n, _)| n == name)
                            .map(|(_, v)| v.clone())
                            .ok_or_else(|| TemplateError::UndeclaredParameter(name.to_string()))?;
                        names.push(name.to_string());
                        params.push(value);
                        names.len() - 1
                    }
                };
                sql.push('$');
                sql.push_str(&(position + 1).to_string());
            }
        }
    }

    Ok(BoundQuery { sql, params, names })
}
