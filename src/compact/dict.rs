//! Substitution tables shared by the encoder and decoder

/// SDP line-type prefixes
pub(crate) const FIELDS: &[(&str, &str)] = &[
    ("v=", "V"),
    ("o=", "O"),
    ("s=", "S"),
    ("c=", "C"),
    ("a=", "A"),
    ("m=", "M"),
    ("t=", "T"),
];

/// Attribute names following `a=`
pub(crate) const ATTRIBUTES: &[(&str, &str)] = &[
    ("ice-ufrag:", "U"),
    ("ice-pwd:", "P"),
    ("fingerprint:", "F"),
    ("candidate:", "C"),
    ("sctp-port:", "S"),
    ("max-message-size:", "M"),
];

/// Fingerprint hash functions, RFC 8122 section 5 order
pub(crate) const HASH_FUNCS: &[(&str, &str)] = &[
    ("sha-1", "1"),
    ("sha-224", "2"),
    ("sha-256", "3"),
    ("sha-384", "4"),
    ("sha-512", "5"),
    ("md5", "6"),
    ("md2", "7"),
    ("token", "8"),
];

/// Transport protocol inside the first four candidate fields
const PROTOCOLS: &[(&str, &str)] = &[("udp", "U"), ("UDP", "U"), ("tcp", "T"), ("TCP", "T")];

/// Decoding always yields the uppercase protocol name
const PROTOCOLS_DECODE: &[(&str, &str)] = &[("U", "UDP"), ("T", "TCP")];

/// Candidate trailer substitutions. Order matters: at each position the
/// first entry that matches wins, so longer phrases precede their prefixes.
const CANDIDATE: &[(&str, &str)] = &[
    ("typ host generation 0 network-cost 999", "P"),
    ("rport 0 generation 0 network-cost 999", "W"),
    ("typ host", "H"),
    ("typ srflx", "S"),
    ("rport", "R"),
    ("raddr", "A"),
    ("0.0.0.0", "V"),
    ("ufrag", "F"),
    ("rport 0 generation 0", "G"),
    ("network-cost", "N"),
    ("network-id", "E"),
    ("tcptype active", "C"),
    ("generation 0", "Q"),
];

/// Whole tokens of a data channel m-line
const MEDIA: &[(&str, &str)] = &[
    ("application", "P"),
    ("UDP/DTLS/SCTP", "U"),
    ("webrtc-datachannel", "D"),
];

pub(crate) const ADDRESS_TYPES: &[(&str, &str)] = &[("IP4", "4"), ("IP6", "6")];

pub(crate) const CONNECTION_IPS: &[(&str, &str)] = &[("0.0.0.0", "0")];

/// Whole-line substitutions for common attribute lines
pub(crate) const WHOLE_LINES: &[(&str, &str)] = &[
    ("a=ice-options:trickle", "I"),
    ("a=ice-options:ice2,trickle", "Z"),
    ("a=sendrecv", "B"),
];

/// Look up `key` in the left column
pub(crate) fn forward<'a>(table: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Look up `key` in the right column
pub(crate) fn reverse<'a>(table: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    table.iter().find(|(_, v)| *v == key).map(|(k, _)| *k)
}

/// Substitute every non-overlapping occurrence of a table key, scanning
/// left to right and trying entries in table order at each position
fn replace_ordered(input: &str, table: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    'scan: while !rest.is_empty() {
        for (from, to) in table {
            if rest.starts_with(from) {
                out.push_str(to);
                rest = &rest[from.len()..];
                continue 'scan;
            }
        }
        let ch = rest.chars().next().map_or(1, char::len_utf8);
        out.push_str(&rest[..ch]);
        rest = &rest[ch..];
    }

    out
}

/// Encode a candidate body. The first four fields (foundation, component,
/// protocol, priority) get protocol substitution, the fifth (the address)
/// is kept verbatim and the rest gets trailer substitution.
pub(crate) fn candidate_encode(line: &str) -> String {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() < 5 {
        return line.to_string();
    }

    let head = replace_ordered(&parts[..4].join(" "), PROTOCOLS);
    let tail = replace_ordered(&parts[5..].join(" "), CANDIDATE);
    format!("{} {} {}", head, parts[4], tail)
}

/// Token-wise inverse of [`candidate_encode`]; a leading `C` stands for
/// `candidate:`
pub(crate) fn candidate_decode(line: &str) -> String {
    let expanded;
    let line = match line.strip_prefix('C') {
        Some(rest) => {
            expanded = format!("candidate:{}", rest);
            expanded.as_str()
        }
        None => line,
    };

    line.split(' ')
        .map(|token| {
            reverse(CANDIDATE, token)
                .or_else(|| forward(PROTOCOLS_DECODE, token))
                .unwrap_or(token)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Substitute whole tokens of an m-line; audio and video lines pass
/// through unchanged
pub(crate) fn media_encode(line: &str) -> String {
    map_media_tokens(line, |token| forward(MEDIA, token))
}

/// Token-wise inverse of [`media_encode`]; expects the `m=` prefix to have
/// been restored already
pub(crate) fn media_decode(line: &str) -> String {
    map_media_tokens(line, |token| reverse(MEDIA, token))
}

fn map_media_tokens(line: &str, lookup: impl Fn(&str) -> Option<&'static str>) -> String {
    let (prefix, rest) = match line.strip_prefix("m=") {
        Some(rest) => ("m=", rest),
        None => ("", line),
    };
    let tokens: Vec<&str> = rest.split(' ').map(|token| lookup(token).unwrap_or(token)).collect();
    format!("{}{}", prefix, tokens.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_candidate_encoding() {
        let body = "1 1 UDP 2122260223 10.0.0.1 54321 typ host generation 0 network-cost 999";
        assert_eq!(candidate_encode(body), "1 1 U 2122260223 10.0.0.1 54321 P");
    }

    #[test]
    fn test_srflx_candidate_encoding() {
        let body = "842163049 1 udp 1677729535 203.0.113.7 61000 typ srflx raddr 0.0.0.0 rport 0 generation 0 network-cost 999";
        assert_eq!(
            candidate_encode(body),
            "842163049 1 U 1677729535 203.0.113.7 61000 S A V W"
        );
    }

    #[test]
    fn test_address_field_is_never_substituted() {
        let body = "1 1 UDP 1 0.0.0.0 9 typ host";
        assert_eq!(candidate_encode(body), "1 1 U 1 0.0.0.0 9 H");
    }

    #[test]
    fn test_short_candidate_untouched() {
        assert_eq!(candidate_encode("1 1 UDP 5"), "1 1 UDP 5");
    }

    #[test]
    fn test_candidate_decode_inverts_tokens() {
        assert_eq!(
            candidate_decode("C1 1 U 2122260223 10.0.0.1 54321 P"),
            "candidate:1 1 UDP 2122260223 10.0.0.1 54321 typ host generation 0 network-cost 999"
        );
        assert_eq!(
            candidate_decode("C2 1 T 1518280447 192.168.1.2 9 H C Q N 10"),
            "candidate:2 1 TCP 1518280447 192.168.1.2 9 typ host tcptype active generation 0 network-cost 10"
        );
    }

    #[test]
    fn test_media_round_trip() {
        let line = "m=application 9 UDP/DTLS/SCTP webrtc-datachannel";
        let encoded = media_encode(line);
        assert_eq!(encoded, "m=P 9 U D");
        assert_eq!(media_decode(&encoded), line);
    }

    #[test]
    fn test_audio_video_lines_untouched() {
        for line in [
            "m=audio 9 UDP/TLS/RTP/SAVPF 111 63 9 0 8 13 110 126",
            "m=video 9 UDP/TLS/RTP/SAVPF 96 97 98 99 100 101",
            "m=application 9 DTLS/SCTP 5000",
        ] {
            let encoded = media_encode(line);
            assert_eq!(encoded, line);
            assert_eq!(media_decode(&encoded), line);
        }
    }

    #[test]
    fn test_media_decode_swaps_whole_tokens_only() {
        assert_eq!(
            media_decode("m=audio 9 UDP/TLS/RTP/SAVPF 111"),
            "m=audio 9 UDP/TLS/RTP/SAVPF 111"
        );
        assert_eq!(media_decode("m=P 9 U D"), "m=application 9 UDP/DTLS/SCTP webrtc-datachannel");
    }

    #[test]
    fn test_table_lookups() {
        assert_eq!(forward(HASH_FUNCS, "sha-256"), Some("3"));
        assert_eq!(reverse(HASH_FUNCS, "3"), Some("sha-256"));
        assert_eq!(forward(HASH_FUNCS, "sha-3"), None);
        assert_eq!(reverse(ADDRESS_TYPES, "6"), Some("IP6"));
    }
}
