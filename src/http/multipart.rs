//! `multipart/form-data` body splitting.
//!
//! Parts are delimited by `--<boundary>` lines; each part carries its own
//! header block terminated by CRLFCRLF. Content is the byte range between
//! delimiters with the trailing CRLF excluded.

use crate::errors::ErrorKind;
use memchr::memmem;

/// One decoded part of a `multipart/form-data` body.
///
/// `name` always comes from `Content-Disposition`; `filename` only when the
/// client sent a file field.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Extracts the `boundary` parameter from a `Content-Type` header value.
pub(crate) fn boundary_from(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }

        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Splits `body` on `--<boundary>` delimiters.
pub(crate) fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>, ErrorKind> {
    let delim = format!("--{boundary}");
    let delim = delim.as_bytes();

    let mut parts = Vec::new();
    let mut cursor = memmem::find(body, delim).ok_or(ErrorKind::InvalidMultipart)? + delim.len();

    loop {
        // After a delimiter: "--" terminates, CRLF opens the next part.
        match body.get(cursor..cursor + 2) {
            Some(b"--") => return Ok(parts),
            Some(b"\r\n") => cursor += 2,
            _ => return Err(ErrorKind::InvalidMultipart),
        }

        let rest = &body[cursor..];
        let head_len = memmem::find(rest, b"\r\n\r\n").ok_or(ErrorKind::InvalidMultipart)?;
        let head =
            simdutf8::basic::from_utf8(&rest[..head_len]).map_err(|_| ErrorKind::InvalidMultipart)?;

        let content_start = head_len + 4;
        let content_len = memmem::find(&rest[content_start..], delim)
            .ok_or(ErrorKind::InvalidMultipart)?
            // the delimiter is preceded by CRLF, which belongs to the framing
            .checked_sub(2)
            .ok_or(ErrorKind::InvalidMultipart)?;

        parts.push(part_from(
            head,
            rest[content_start..content_start + content_len].to_vec(),
        )?);

        cursor += content_start + content_len + 2 + delim.len();
    }
}

fn part_from(head: &str, data: Vec<u8>) -> Result<Part, ErrorKind> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in head.split("\r\n") {
        let Some((header, value)) = line.split_once(':') else {
            return Err(ErrorKind::InvalidMultipart);
        };
        let value = value.trim();

        if header.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                let Some((key, raw)) = param.trim().split_once('=') else {
                    continue;
                };
                let raw = raw.trim().trim_matches('"').to_string();

                match key.trim() {
                    "name" => name = Some(raw),
                    "filename" => filename = Some(raw),
                    _ => {}
                }
            }
        } else if header.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
    }

    Ok(Part {
        name: name.ok_or(ErrorKind::InvalidMultipart)?,
        filename,
        content_type,
        data,
    })
}
