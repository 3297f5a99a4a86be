//! Token scanners for the textual stream emitted by PostgreSQL logical
//! decoding output plugins.
//!
//! Each scanner takes one token off the front of a byte slice and returns
//! `(remaining, token)`, where `token` is `None` when the input does not
//! begin with a recognizable token. The scanners never allocate and never
//! backtrack: both returned slices borrow from the input, and on failure
//! `remaining` is exactly the input slice.

/// Identifier characters per the PostgreSQL lexical rules: ASCII digits,
/// `$`, `_`, and Unicode letters.
fn is_identifier_char(c: char) -> bool {
    c.is_ascii_digit() || c == '$' || c == '_' || c.is_alphabetic()
}

/// Bytes that may appear in a numeric constant. No structural validation
/// is applied; the server is trusted to emit well-formed numerics.
fn is_numeric_char(b: u8) -> bool {
    b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'+' | b'-')
}

/// Decodes the first character of `src` together with its width in bytes.
/// Invalid or truncated UTF-8 decodes as one replacement character of
/// width one, which never classifies as an identifier character.
fn first_char(src: &[u8]) -> Option<(char, usize)> {
    if src.is_empty() {
        return None;
    }
    let window = &src[..src.len().min(4)];
    let valid = match std::str::from_utf8(window) {
        Ok(s) => s,
        Err(e) => match std::str::from_utf8(&window[..e.valid_up_to()]) {
            Ok(s) if !s.is_empty() => s,
            _ => return Some((char::REPLACEMENT_CHARACTER, 1)),
        },
    };
    valid.chars().next().map(|c| (c, c.len_utf8()))
}

/// Advances past a quoted run whose opening quote sits at `src[open]`. A
/// doubled quote inside the run is an escape and stays part of the run.
/// Returns the index one past the closing quote, or `None` when the
/// closing quote is missing before end of input.
fn scan_quoted(src: &[u8], quote: u8, open: usize) -> Option<usize> {
    let mut i = open + 1;
    loop {
        let n = src[i..].iter().position(|&b| b == quote)?;
        i += n + 1;
        if src.get(i) == Some(&quote) {
            i += 1;
        } else {
            return Some(i);
        }
    }
}

/// True when `src` begins another identifier segment: a double quote or an
/// identifier character.
fn starts_segment(src: &[u8]) -> bool {
    src.first() == Some(&b'"')
        || matches!(first_char(src), Some((c, _)) if is_identifier_char(c))
}

/// Scans one possibly schema-qualified identifier from the front of `src`.
///
/// An identifier is a `.`-separated sequence of segments. Each segment is
/// either a bare run of identifier characters or a double-quoted run in
/// which `""` escapes an embedded quote. The scan stops at the first byte
/// that belongs to neither form; a `.` is consumed only when another
/// segment follows it, so a trailing `.` stays in `remaining`. A quoted
/// segment with no closing quote fails the whole scan.
pub fn scan_identifier(src: &[u8]) -> (&[u8], Option<&[u8]>) {
    let mut i = 0;
    loop {
        if src.get(i) == Some(&b'"') {
            match scan_quoted(src, b'"', i) {
                Some(end) => i = end,
                None => return (src, None),
            }
        } else {
            let start = i;
            while let Some((c, w)) = first_char(&src[i..]) {
                if !is_identifier_char(c) {
                    break;
                }
                i += w;
            }
            if i == start {
                return (src, None);
            }
        }

        if src.get(i) == Some(&b'.') && starts_segment(&src[i + 1..]) {
            i += 1;
            continue;
        }
        return (&src[i..], Some(&src[..i]));
    }
}

/// Scans one scalar constant from the front of `src`: a single-quoted
/// string with `''` escapes, the keyword `null` (ASCII, case-insensitive),
/// or a numeric run.
///
/// String tokens keep their surrounding quotes and escapes verbatim. The
/// `null` form consumes exactly four bytes without checking what follows;
/// callers only invoke the scanner where a complete value is expected.
pub fn scan_constant(src: &[u8]) -> (&[u8], Option<&[u8]>) {
    if src.first() == Some(&b'\'') {
        return match scan_quoted(src, b'\'', 0) {
            Some(end) => (&src[end..], Some(&src[..end])),
            None => (src, None),
        };
    }

    if src.len() >= 4 && src[..4].eq_ignore_ascii_case(b"null") {
        return (&src[4..], Some(&src[..4]));
    }

    let n = src
        .iter()
        .position(|&b| !is_numeric_char(b))
        .unwrap_or(src.len());
    if n == 0 {
        return (src, None);
    }
    (&src[n..], Some(&src[..n]))
}

/// Scans one bracketed type token from the front of `src`: an opening `[`,
/// at least one byte of type text, then the first following `]:`. Type
/// text may itself contain brackets, as in `[integer[]]:`.
pub fn scan_type(src: &[u8]) -> (&[u8], Option<&[u8]>) {
    if src.first() != Some(&b'[') {
        return (src, None);
    }
    let mut i = 2;
    loop {
        let n = match src.get(i..).and_then(|t| t.iter().position(|&b| b == b']')) {
            Some(n) => n,
            None => return (src, None),
        };
        if src.get(i + n + 1) == Some(&b':') {
            let end = i + n + 2;
            return (&src[end..], Some(&src[..end]));
        }
        i += n + 1;
    }
}
