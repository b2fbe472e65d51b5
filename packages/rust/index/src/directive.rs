//! `option go_package` directive extraction.
//!
//! This is a single-line text scan, not a definition-language parser:
//! - the directive must start at the beginning of a line
//!   (`option go_package = "<value>";`)
//! - only the first directive in a file is considered
//! - the value must be a double-quoted literal
//! - anything from the first `;` of the unquoted value onward is an alias and
//!   is dropped (`"a/b/c;c"` → `a/b/c`)

use std::path::Path;
use std::sync::LazyLock;

use protogen_shared::{ProtogenError, Result};
use regex::bytes::Regex;

/// Matches `option go_package = <literal>;` at the start of any line.
///
/// Runs over raw bytes: only the captured literal has to be UTF-8.
static GO_PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m-u)^option go_package = (.*);").expect("go_package regex")
});

/// Extract the declared package from file content.
///
/// Returns an empty string when no directive is present. `path` is only used
/// for error context.
pub fn declared_package(path: &Path, content: &[u8]) -> Result<String> {
    let Some(caps) = GO_PACKAGE_RE.captures(content) else {
        return Ok(String::new());
    };

    let literal = std::str::from_utf8(&caps[1])
        .map_err(|_| ProtogenError::parse(path, "go_package value is not valid UTF-8"))?;
    let value = unquote(literal).map_err(|msg| ProtogenError::parse(path, msg))?;
    Ok(match value.find(';') {
        Some(p) => value[..p].to_string(),
        None => value,
    })
}

/// Decode a double-quoted string literal with the usual backslash escapes.
fn unquote(literal: &str) -> std::result::Result<String, String> {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| format!("go_package value {literal} is not a quoted string"))?;

    let mut out: Vec<u8> = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Err(format!("unescaped quote in {literal}")),
            '\\' => {
                let esc = chars
                    .next()
                    .ok_or_else(|| format!("dangling escape in {literal}"))?;
                match esc {
                    'a' => out.push(0x07),
                    'b' => out.push(0x08),
                    'f' => out.push(0x0c),
                    'n' => out.push(b'\n'),
                    'r' => out.push(b'\r'),
                    't' => out.push(b'\t'),
                    'v' => out.push(0x0b),
                    '\\' => out.push(b'\\'),
                    '"' => out.push(b'"'),
                    '0'..='7' => {
                        let digits: String = std::iter::once(esc).chain(chars.by_ref().take(2)).collect();
                        let byte = (digits.len() == 3)
                            .then(|| u8::from_str_radix(&digits, 8).ok())
                            .flatten()
                            .ok_or_else(|| format!("invalid octal escape \\{digits} in {literal}"))?;
                        out.push(byte);
                    }
                    'x' => {
                        let byte = hex_escape(&mut chars, 2, literal)?;
                        // two hex digits always fit a byte
                        out.push(byte as u8);
                    }
                    'u' | 'U' => {
                        let width = if esc == 'u' { 4 } else { 8 };
                        let code = hex_escape(&mut chars, width, literal)?;
                        let ch = char::from_u32(code)
                            .ok_or_else(|| format!("invalid code point \\{esc}{code:x} in {literal}"))?;
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    }
                    other => return Err(format!("unknown escape \\{other} in {literal}")),
                }
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    String::from_utf8(out).map_err(|_| format!("{literal} does not decode to UTF-8"))
}

fn hex_escape(
    chars: &mut std::str::Chars<'_>,
    width: usize,
    literal: &str,
) -> std::result::Result<u32, String> {
    let digits: String = chars.by_ref().take(width).collect();
    if digits.len() != width || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("invalid hex escape {digits:?} in {literal}"));
    }
    u32::from_str_radix(&digits, 16).map_err(|e| format!("{e} in {literal}"))
}
