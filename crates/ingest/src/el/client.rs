//! Decoding of the execution client identity embedded in a block's extra data.

use alloy_rlp::Header;
use tally_storage::ClientIdentity;

/// Decodes the client that sealed a block from its `extraData`.
///
/// Recognizes the RLP list `[version, name, runtime, os]` written by geth and its forks, where
/// `version` packs `major << 16 | minor << 8 | patch`, and free-form tags such as
/// `reth/v1.3.12/linux` or `Nethermind v1.31.0`. Anything else yields kind
/// [`ClientIdentity::UNKNOWN`] with the data kept verbatim when printable, hex otherwise.
pub fn decode_client(extra: &[u8]) -> ClientIdentity {
    if extra.is_empty() {
        return ClientIdentity::default();
    }
    if let Some(identity) = decode_rlp(extra) {
        return identity;
    }

    let Some(text) = printable(extra) else {
        return ClientIdentity {
            kind: ClientIdentity::UNKNOWN.to_string(),
            version: None,
            raw: format!("0x{}", alloy_primitives::hex::encode(extra)),
        };
    };

    let mut tokens = text.split(['/', ' ']).filter(|t| !t.is_empty());
    let name = tokens.next().filter(|n| n.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    let version = tokens.find_map(parse_version);

    match (name, version) {
        (Some(name), Some(version)) => ClientIdentity {
            kind: name.to_ascii_lowercase(),
            version: Some(version),
            raw: text.to_string(),
        },
        _ => ClientIdentity {
            kind: ClientIdentity::UNKNOWN.to_string(),
            version: None,
            raw: text.to_string(),
        },
    }
}

fn decode_rlp(extra: &[u8]) -> Option<ClientIdentity> {
    let mut buf = extra;
    let header = Header::decode(&mut buf).ok()?;
    if !header.list || header.payload_length != buf.len() {
        return None;
    }

    let packed = Header::decode_bytes(&mut buf, false).ok()?;
    if packed.len() > 4 {
        return None;
    }
    let version = packed.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));

    let mut fields = Vec::new();
    while !buf.is_empty() {
        let field = Header::decode_bytes(&mut buf, false).ok()?;
        fields.push(std::str::from_utf8(field).ok()?);
    }
    let name = fields.first().filter(|n| !n.is_empty())?;
    let version = format!("{}.{}.{}", version >> 16, (version >> 8) & 0xff, version & 0xff);

    let mut raw = vec![name.to_string(), version.clone()];
    raw.extend(fields[1..].iter().map(|f| f.to_string()));

    Some(ClientIdentity { kind: name.to_ascii_lowercase(), version: Some(version), raw: raw.join(" ") })
}

fn printable(extra: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(extra).ok()?.trim_end_matches('\0');
    text.chars().all(|c| !c.is_control()).then_some(text)
}

fn parse_version(token: &str) -> Option<String> {
    let version = token.strip_prefix('v').unwrap_or(token);
    let mut parts = version.split('.');
    let numeric = parts.next().is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    (numeric && parts.next().is_some()).then(|| version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;
    use rstest::rstest;

    #[test]
    fn test_geth_rlp_extra_data() {
        // rlp([0x010e08, "geth", "go1.22.5", "linux"])
        let extra = hex!("d883010e08846765746888676f312e32322e35856c696e7578");
        let identity = decode_client(&extra);
        assert_eq!(identity.kind, "geth");
        assert_eq!(identity.version.as_deref(), Some("1.14.8"));
        assert_eq!(identity.raw, "geth 1.14.8 go1.22.5 linux");
    }

    #[rstest]
    #[case(b"reth/v1.3.12/linux".as_slice(), "reth", Some("1.3.12"))]
    #[case(b"Nethermind v1.31.0".as_slice(), "nethermind", Some("1.31.0"))]
    #[case(b"besu/v25.4.1/linux-x86_64/openjdk-java-21".as_slice(), "besu", Some("25.4.1"))]
    #[case(b"Ethermine".as_slice(), "unknown", None)]
    #[case(b"".as_slice(), "unknown", None)]
    fn test_text_tags(#[case] extra: &[u8], #[case] kind: &str, #[case] version: Option<&str>) {
        let identity = decode_client(extra);
        assert_eq!(identity.kind, kind);
        assert_eq!(identity.version.as_deref(), version);
        assert_eq!(identity.raw, std::str::from_utf8(extra).unwrap());
    }

    #[test]
    fn test_binary_extra_data_is_hex() {
        let identity = decode_client(&[0x00, 0xff, 0x10]);
        assert_eq!(identity.kind, ClientIdentity::UNKNOWN);
        assert_eq!(identity.raw, "0x00ff10");
    }
}
