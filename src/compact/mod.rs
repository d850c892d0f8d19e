//! Reversible compaction of SDP offers, answers and ICE candidates
//!
//! A compacted payload is a one-character type tag (`O` offer, `A` answer,
//! `C` candidate) followed by the encoded body. SDP bodies drop the lines
//! a decoder can regenerate (`v=`, `s=`, `t=`, `a=group:`, `a=mid:`,
//! `a=setup:` and a few fixed attributes), substitute line prefixes and
//! well-known tokens with single characters and join lines with `~`.
//!
//! Clients opt in with `c=1`; the relay only ever encodes; decoding exists
//! for clients written against this crate and for tests.

mod decode;
mod dict;
mod fingerprint;

pub use decode::decompact;

use serde_json::Value;

use dict::{
    candidate_encode, forward, media_encode, ADDRESS_TYPES, ATTRIBUTES, CONNECTION_IPS, FIELDS,
    HASH_FUNCS, WHOLE_LINES,
};

/// Line prefixes removed on encode and rebuilt by the decoder
const DROPPED_PREFIXES: &[&str] = &[
    "v=",
    "s=",
    "t=",
    "a=extmap-allow-mixed",
    "a=sctpmap:",
    "a=msid-semantic:",
    "a=group:",
    "a=mid:",
    "a=setup:",
];

/// Origin trailers the decoder regenerates
const ORIGIN_DEFAULT_FULL: &str = "2 IN IP4 127.0.0.1";
const ORIGIN_DEFAULT_ADDR: &str = "IN IP4 127.0.0.1";

/// Compact a signaling payload
///
/// `data` is either `{type: "candidate", candidate: {candidate: "..."}}` or
/// `{type: "offer"|"answer", sdp: "v=0..."}`. Returns `None` when the
/// payload has no candidate body, no SDP, or SDP not starting with `v=0`;
/// such payloads are forwarded as they are.
pub fn compact(data: &Value) -> Option<String> {
    let kind = data.get("type").and_then(Value::as_str);

    if kind == Some("candidate") {
        let line = data
            .get("candidate")
            .and_then(|c| c.get("candidate"))
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())?;
        return Some(format!("C{}", compact_candidate(line)));
    }

    let sdp = data
        .get("sdp")
        .and_then(Value::as_str)
        .filter(|s| s.starts_with("v=0"))?;
    let tag = if kind == Some("offer") { 'O' } else { 'A' };
    Some(format!("{}{}", tag, compact_sdp(sdp)?))
}

fn compact_candidate(line: &str) -> String {
    let body = line
        .strip_prefix("a=candidate:")
        .or_else(|| line.get(10..))
        .unwrap_or("");
    candidate_encode(body)
}

fn compact_sdp(sdp: &str) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();

    for line in sdp.split("\r\n") {
        if DROPPED_PREFIXES.iter().any(|p| line.starts_with(p)) {
            continue;
        }

        if let Some(code) = forward(WHOLE_LINES, line) {
            lines.push(code.to_string());
        } else if let Some(origin) = line.strip_prefix("o=") {
            lines.push(compact_origin(line, origin));
        } else if line.starts_with("m=") {
            lines.push(media_encode(line));
        } else if line.starts_with("a=candidate:") {
            lines.push(candidate_encode(line));
        } else if let Some(value) = line.strip_prefix("a=fingerprint:") {
            let mut parts = value.split(' ');
            let hash = parts.next().unwrap_or("");
            let hash = forward(HASH_FUNCS, hash).unwrap_or(hash);
            let packed = fingerprint::encode(parts.next().unwrap_or(""))?;
            lines.push(format!("a=fingerprint:{} {}", hash, packed));
        } else if let Some(value) = line.strip_prefix("c=") {
            let mut parts = value.split(' ').skip(1);
            let addr_type = parts.next().unwrap_or("");
            let ip = parts.next().unwrap_or("");
            lines.push(format!(
                "c={} {}",
                forward(ADDRESS_TYPES, addr_type).unwrap_or(addr_type),
                forward(CONNECTION_IPS, ip).unwrap_or(ip)
            ));
        } else {
            lines.push(line.to_string());
        }
    }

    let encoded: Vec<String> = lines.iter().map(|l| substitute_prefixes(l)).collect();
    Some(encoded.join("~"))
}

/// Keep the session id, plus whatever the decoder cannot default
fn compact_origin(line: &str, origin: &str) -> String {
    let fields: Vec<&str> = origin.split(' ').collect();
    let field = |i: usize| fields.get(i).copied().unwrap_or("");

    let mut kept = vec![field(1)];
    if !line.ends_with(ORIGIN_DEFAULT_FULL) {
        kept.push(field(2));
        if !line.ends_with(ORIGIN_DEFAULT_ADDR) {
            kept.push(field(4));
            kept.push(field(5));
        }
    }
    format!("o={}", kept.join(" "))
}

/// Replace the line-type prefix and the first attribute name
fn substitute_prefixes(line: &str) -> String {
    let Some(field) = line.get(..2) else {
        return line.to_string();
    };
    let mut value = line[2..].to_string();

    if field == "a=" {
        if let Some((attr, rest)) = value.split_once(':') {
            if let Some(code) = forward(ATTRIBUTES, &format!("{}:", attr)) {
                value = format!("{}{}", code, rest);
            }
        }
    }

    match forward(FIELDS, field) {
        Some(code) => format!("{}{}", code, value),
        None => format!("{}{}", field, value),
    }
}
