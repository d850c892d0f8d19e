use serde_json::{json, Value};

use super::dict::{
    candidate_decode, media_decode, reverse, ADDRESS_TYPES, ATTRIBUTES, CONNECTION_IPS, FIELDS,
    HASH_FUNCS, WHOLE_LINES,
};
use super::fingerprint;
use super::{ORIGIN_DEFAULT_ADDR, ORIGIN_DEFAULT_FULL};
use crate::error::{Error, Result};

/// Expand a compacted payload back into its JSON shape
///
/// Candidates become `{type: "candidate", candidate: {candidate,
/// sdpMLineIndex: 0, sdpMid: "0"}}`, SDP becomes `{type, sdp}`.
pub fn decompact(compacted: &str) -> Result<Value> {
    let mut chars = compacted.chars();
    let tag = chars
        .next()
        .ok_or_else(|| Error::compact_decode("empty payload"))?;

    match tag {
        'C' => Ok(json!({
            "type": "candidate",
            "candidate": {
                "candidate": candidate_decode(compacted),
                "sdpMLineIndex": 0,
                "sdpMid": "0",
            }
        })),
        'O' | 'A' => {
            let is_offer = tag == 'O';
            Ok(json!({
                "type": if is_offer { "offer" } else { "answer" },
                "sdp": decompact_sdp(chars.as_str(), is_offer)?,
            }))
        }
        other => Err(Error::compact_decode(format!("unknown type tag '{}'", other))),
    }
}

fn split_first(s: &str) -> (&str, &str) {
    match s.chars().next() {
        Some(c) => s.split_at(c.len_utf8()),
        None => ("", ""),
    }
}

/// Restore the line-type prefix and attribute name
fn restore_prefixes(line: &str) -> String {
    let (field, value) = split_first(line);
    let field = reverse(FIELDS, field).unwrap_or(field);

    if field == "a=" {
        let (attr, rest) = split_first(value);
        if let Some(name) = reverse(ATTRIBUTES, attr) {
            return format!("{}{}{}", field, name, rest);
        }
    }
    format!("{}{}", field, value)
}

fn decompact_origin(origin: &str) -> String {
    let mut fields = origin.split(' ').filter(|f| !f.is_empty());
    let mut out = vec!["-".to_string()];

    if let Some(session_id) = fields.next() {
        out.push(session_id.to_string());
    }
    match fields.next() {
        None => out.push(ORIGIN_DEFAULT_FULL.to_string()),
        Some(version) => {
            out.push(version.to_string());
            match fields.next() {
                None => out.push(ORIGIN_DEFAULT_ADDR.to_string()),
                Some(addr_type) => {
                    out.push("IN".to_string());
                    out.push(addr_type.to_string());
                    out.extend(fields.next().map(str::to_string));
                }
            }
        }
    }
    format!("o={}", out.join(" "))
}

fn decompact_sdp(body: &str, is_offer: bool) -> Result<String> {
    let mut sdp: Vec<String> = [
        "v=0",
        "s=-",
        "t=0 0",
        "a=extmap-allow-mixed",
        "a=msid-semantic: WMS",
    ]
    .iter()
    .map(|l| l.to_string())
    .collect();

    let setup = if is_offer { "actpass" } else { "active" };
    let mut media_count = 0usize;

    for raw in body.split('~') {
        let line = restore_prefixes(raw);

        if let Some(origin) = line.strip_prefix("o=") {
            sdp.insert(1, decompact_origin(origin));
        } else if line.starts_with("m=") {
            sdp.push(media_decode(&line));
            sdp.push(format!("a=setup:{}", setup));
            sdp.push(format!("a=mid:{}", media_count));
            media_count += 1;
        } else if line.starts_with("a=candidate:") {
            sdp.push(candidate_decode(&line));
        } else if let Some(value) = line.strip_prefix("a=fingerprint:") {
            let mut parts = value.split(' ');
            let hash = parts.next().unwrap_or("");
            let hash = reverse(HASH_FUNCS, hash).unwrap_or(hash);
            let hex = fingerprint::decode(parts.next().unwrap_or(""))?;
            sdp.push(format!("a=fingerprint:{} {}", hash, hex));
        } else if let Some(value) = line.strip_prefix("c=") {
            let mut parts = value.split(' ');
            let addr_type = parts.next().unwrap_or("");
            let ip = parts.next().unwrap_or("");
            sdp.push(format!(
                "c=IN {} {}",
                reverse(ADDRESS_TYPES, addr_type).unwrap_or(addr_type),
                reverse(CONNECTION_IPS, ip).unwrap_or(ip)
            ));
        } else if let Some(full) = reverse(WHOLE_LINES, &line) {
            sdp.push(full.to_string());
        } else {
            sdp.push(line);
        }
    }

    let bundle: Vec<String> = (0..media_count).map(|i| i.to_string()).collect();
    let at = sdp.len() - 1;
    sdp.insert(at, format!("a=group:BUNDLE {}", bundle.join(" ")));

    Ok(sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompact_candidate() {
        let value = decompact("C1 1 U 2122260223 10.0.0.1 54321 P").unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(
            value["candidate"]["candidate"],
            "candidate:1 1 UDP 2122260223 10.0.0.1 54321 typ host generation 0 network-cost 999"
        );
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
        assert_eq!(value["candidate"]["sdpMid"], "0");
    }

    #[test]
    fn test_decompact_answer_regenerates_boilerplate() {
        let value = decompact("AO42~MP 9 U D~C4 0~B~AS5000").unwrap();
        assert_eq!(value["type"], "answer");
        let sdp = value["sdp"].as_str().unwrap();
        let lines: Vec<&str> = sdp.split("\r\n").collect();
        assert_eq!(
            lines,
            vec![
                "v=0",
                "o=- 42 2 IN IP4 127.0.0.1",
                "s=-",
                "t=0 0",
                "a=extmap-allow-mixed",
                "a=msid-semantic: WMS",
                "m=application 9 UDP/DTLS/SCTP webrtc-datachannel",
                "a=setup:active",
                "a=mid:0",
                "c=IN IP4 0.0.0.0",
                "a=sendrecv",
                "a=group:BUNDLE 0",
                "a=sctp-port:5000",
            ]
        );
    }

    #[test]
    fn test_decompact_origin_variants() {
        assert_eq!(decompact_origin("42"), "o=- 42 2 IN IP4 127.0.0.1");
        assert_eq!(decompact_origin("42 7"), "o=- 42 7 IN IP4 127.0.0.1");
        assert_eq!(decompact_origin("42 0 IP4 0.0.0.0"), "o=- 42 0 IN IP4 0.0.0.0");
    }

    #[test]
    fn test_decompact_bad_input() {
        assert!(decompact("").is_err());
        assert!(decompact("Xabc").is_err());
        assert!(decompact("OAF3 !!!").is_err());
    }
}
