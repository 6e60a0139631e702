//! custom_id codec.
//!
//! Format: `sdg1~<company>~<year>~<chunk_id>`. The company is
//! percent-encoded: every byte outside `[A-Za-z0-9._-]` becomes `%XX` with
//! upper-case hex, so the separator never appears inside a field. Decoding
//! only accepts the exact text [`encode`] would produce, which keeps the
//! mapping one-to-one.

use sdglens_core::{ChunkId, DocumentId, Error, Result};

pub const VERSION_TAG: &str = "sdg1";
const SEPARATOR: char = '~';
const HEX: &[u8; 16] = b"0123456789ABCDEF";

pub fn encode(document: &DocumentId, chunk_id: ChunkId) -> String {
    format!(
        "{tag}{sep}{company}{sep}{year}{sep}{chunk}",
        tag = VERSION_TAG,
        sep = SEPARATOR,
        company = encode_component(&document.company),
        year = document.year,
        chunk = chunk_id,
    )
}

pub fn decode(custom_id: &str) -> Result<(DocumentId, ChunkId)> {
    let bad = || Error::Unattributable(custom_id.to_string());

    let fields: Vec<&str> = custom_id.split(SEPARATOR).collect();
    let [tag, company, year, chunk] = fields.as_slice() else {
        return Err(bad());
    };
    if *tag != VERSION_TAG {
        return Err(bad());
    }

    let name = decode_component(company).ok_or_else(bad)?;
    if encode_component(&name) != *company {
        return Err(bad());
    }
    let year_ok = !year.is_empty()
        && year.bytes().all(|b| b.is_ascii_digit())
        && (*year == "0" || !year.starts_with('0'));
    if !year_ok {
        return Err(bad());
    }
    let year: u16 = year.parse().map_err(|_| bad())?;
    let chunk: ChunkId = chunk.parse().map_err(|_| bad())?;

    Ok((DocumentId::new(name, year), chunk))
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')
}

fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn decode_component(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_value(*bytes.get(i + 1)?)?;
            let lo = hex_value(*bytes.get(i + 2)?)?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
