//! Byte-exact `multipart/form-data` encoding and boundary-scanning decoding.
//!
//! Wire layout produced by [`encode`]:
//! ```text
//! --{boundary}\r\n
//! Key: Value\r\n          (one line per header)
//! \r\n
//! {payload}\r\n
//! ...                     (repeated per part)
//! --{boundary}--\r\n
//! ```
//!
//! [`decode`] locates segments by scanning for `--{boundary}\r\n` and cuts the
//! final segment at `\r\n--{boundary}--\r\n`. Payload bytes are never escaped,
//! so a payload that contains the opening delimiter verbatim will be split at
//! that point. Callers must pick a boundary that does not occur in any payload.

use crate::models::error::MultipartError;
use crate::models::multipart::{MultipartPart, PartHeaders};

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Generate a fresh boundary token (upper-case hyphenated UUID v4).
pub fn generate_boundary() -> String {
    uuid::Uuid::new_v4().hyphenated().to_string().to_uppercase()
}

/// Content-Type header value for a form-data body delimited by `boundary`.
pub fn form_data_content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={}", boundary)
}

/// Extract the `boundary` parameter from a Content-Type header value.
///
/// Parameters are `;`-separated, the name is matched case-insensitively and
/// surrounding double quotes are removed. Returns None for missing or empty values.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Exact size of the body [`encode`] will produce.
pub fn encoded_len(boundary: &str, parts: &[MultipartPart]) -> usize {
    let delimiter = 2 + boundary.len() + 2;
    let parts_len: usize = parts
        .iter()
        .map(|part| {
            let headers: usize = part.headers.iter().map(|(k, v)| k.len() + 2 + v.len() + 2).sum();
            delimiter + headers + 2 + part.body.len() + 2
        })
        .sum();
    parts_len + 2 + boundary.len() + 4
}

/// Encode `parts` into a multipart body delimited by `boundary`.
pub fn encode(boundary: &str, parts: &[MultipartPart]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(boundary, parts));
    for part in parts {
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(CRLF);
        for (key, value) in part.headers.iter() {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
        out.extend_from_slice(&part.body);
        out.extend_from_slice(CRLF);
    }
    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"--");
    out.extend_from_slice(CRLF);
    out
}

/// Decode a multipart body delimited by `boundary` into its parts.
///
/// Fails with [`MultipartError::BoundaryNotFound`] when the opening delimiter
/// never occurs, and with [`MultipartError::MissingHeaderTerminator`] when a
/// segment has no blank line separating headers from payload.
pub fn decode(body: &[u8], boundary: &str) -> Result<Vec<MultipartPart>, MultipartError> {
    let opening = format!("--{}\r\n", boundary).into_bytes();
    let closing = format!("\r\n--{}--\r\n", boundary).into_bytes();

    let mut delimiters = Vec::new();
    let mut from = 0;
    while let Some(pos) = find(body, &opening, from) {
        delimiters.push(pos);
        from = pos + opening.len();
    }
    if delimiters.is_empty() {
        return Err(MultipartError::BoundaryNotFound);
    }

    let mut parts = Vec::with_capacity(delimiters.len());
    for (index, &pos) in delimiters.iter().enumerate() {
        let next = delimiters.get(index + 1).copied();
        let mut segment = &body[pos + opening.len()..next.unwrap_or(body.len())];

        if let Some(end) = find(segment, &closing, 0) {
            segment = &segment[..end];
        } else if next.is_some() {
            segment = segment.strip_suffix(CRLF).unwrap_or(segment);
        }

        parts.push(decode_segment(segment, index)?);
    }
    Ok(parts)
}

fn decode_segment(segment: &[u8], index: usize) -> Result<MultipartPart, MultipartError> {
    let (header_block, payload) = if segment.starts_with(CRLF) {
        (&segment[..0], &segment[CRLF.len()..])
    } else {
        let end = find(segment, HEADER_END, 0)
            .ok_or(MultipartError::MissingHeaderTerminator { index })?;
        (&segment[..end], &segment[end + HEADER_END.len()..])
    };

    let mut headers = PartHeaders::new();
    for line in lines(header_block) {
        // Split on the first colon only; values such as URLs keep theirs.
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let key = String::from_utf8_lossy(&line[..colon]).trim().to_string();
        if key.is_empty() {
            continue;
        }
        let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
        headers.insert(key, value);
    }

    Ok(MultipartPart::new(headers, payload))
}

/// Iterate non-empty CRLF-separated lines of a header block.
fn lines(block: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(block);
    std::iter::from_fn(move || loop {
        let current = rest?;
        let line = match find(current, CRLF, 0) {
            Some(pos) => {
                rest = Some(&current[pos + CRLF.len()..]);
                &current[..pos]
            }
            None => {
                rest = None;
                current
            }
        };
        if !line.is_empty() {
            return Some(line);
        }
    })
}

/// Position of the first occurrence of `needle` in `haystack` at or after `from`.
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
