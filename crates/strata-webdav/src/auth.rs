//! HTTP Digest authentication state for the WebDAV client.
//!
//! A 401 carrying `WWW-Authenticate: Digest …` seeds or refreshes the cached
//! challenge; subsequent requests answer it preemptively, incrementing the
//! nonce count per request. Supports MD5 and MD5-sess, with `auth` and
//! `auth-int` quality of protection.

use md5::{Digest as _, Md5};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestQop {
    Auth,
    AuthInt,
}

impl DigestQop {
    fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::AuthInt => "auth-int",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    pub qop: Option<DigestQop>,
    pub nc: u64,
}

/// Parses a `WWW-Authenticate: Digest …` challenge. `None` when the header
/// is not a digest challenge or lacks required fields.
pub fn parse_challenge(header: &str) -> Option<DigestChallenge> {
    let rest = header.trim().strip_prefix("Digest")?.trim_start();
    let params = parse_auth_params(rest);

    let realm = params.iter().find(|(k, _)| k == "realm")?.1.clone();
    let nonce = params.iter().find(|(k, _)| k == "nonce")?.1.clone();
    let opaque = params
        .iter()
        .find(|(k, _)| k == "opaque")
        .map(|(_, v)| v.clone());

    let algorithm = match params
        .iter()
        .find(|(k, _)| k == "algorithm")
        .map(|(_, v)| v.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("md5") => DigestAlgorithm::Md5,
        Some("md5-sess") => DigestAlgorithm::Md5Sess,
        Some(_) => return None,
    };

    // The server may offer several qop values; `auth` is preferred.
    let qop = params
        .iter()
        .find(|(k, _)| k == "qop")
        .map(|(_, v)| v.clone())
        .and_then(|offered| {
            let mut saw_auth_int = false;
            for value in offered.split(',') {
                match value.trim() {
                    "auth" => return Some(DigestQop::Auth),
                    "auth-int" => saw_auth_int = true,
                    _ => {}
                }
            }
            saw_auth_int.then_some(DigestQop::AuthInt)
        });

    Some(DigestChallenge {
        realm,
        nonce,
        opaque,
        algorithm,
        qop,
        nc: 0,
    })
}

/// Splits `k=v, k2="v 2", …` respecting quoted values.
pub fn parse_auth_params(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        rest = &rest[eq + 1..];

        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let Some(close) = stripped.find('"') else { break };
            value = stripped[..close].to_string();
            rest = &stripped[close + 1..];
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = &rest[end.min(rest.len())..];
        }
        rest = rest.trim_start_matches(',').trim_start();
        if !key.is_empty() {
            out.push((key.to_ascii_lowercase(), value));
        }
    }
    out
}

pub fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    let mut out = String::with_capacity(32);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Fresh client nonce: a hash over the current timestamp.
fn fresh_cnonce() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let seed = format!("{}:{}", now.as_nanos(), uuid::Uuid::new_v4());
    md5_hex(seed.as_bytes())[..16].to_string()
}

/// RFC 2617 response digest for one request.
fn compute_response(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    body: &[u8],
    nc: &str,
    cnonce: &str,
) -> String {
    let mut ha1 = md5_hex(format!("{username}:{}:{password}", challenge.realm).as_bytes());
    if challenge.algorithm == DigestAlgorithm::Md5Sess {
        ha1 = md5_hex(format!("{ha1}:{}:{cnonce}", challenge.nonce).as_bytes());
    }

    let ha2 = match challenge.qop {
        Some(DigestQop::AuthInt) => {
            let body_hash = md5_hex(body);
            md5_hex(format!("{method}:{uri}:{body_hash}").as_bytes())
        }
        _ => md5_hex(format!("{method}:{uri}").as_bytes()),
    };

    match challenge.qop {
        Some(qop) => md5_hex(
            format!(
                "{ha1}:{}:{nc}:{cnonce}:{}:{ha2}",
                challenge.nonce,
                qop.as_str()
            )
            .as_bytes(),
        ),
        None => md5_hex(format!("{ha1}:{}:{ha2}", challenge.nonce).as_bytes()),
    }
}

/// Computes the `Authorization: Digest …` header for one request and
/// advances the nonce count.
pub fn authorization_header(
    challenge: &mut DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    body: &[u8],
) -> String {
    challenge.nc += 1;
    let nc = format!("{:08x}", challenge.nc);
    let cnonce = fresh_cnonce();
    let response = compute_response(
        challenge, username, password, method, uri, body, &nc, &cnonce,
    );

    let algorithm = match challenge.algorithm {
        DigestAlgorithm::Md5 => "MD5",
        DigestAlgorithm::Md5Sess => "MD5-sess",
    };

    let mut header = format!(
        "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", \
         response=\"{response}\", algorithm={algorithm}",
        challenge.realm, challenge.nonce
    );
    if let Some(qop) = challenge.qop {
        header.push_str(&format!(
            ", qop={}, nc={nc}, cnonce=\"{cnonce}\"",
            qop.as_str()
        ));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    header
}

#[cfg(test)]
mod tests {
    use super::{
        DigestAlgorithm, DigestQop, authorization_header, compute_response, md5_hex,
        parse_auth_params, parse_challenge,
    };

    #[test]
    fn parses_a_typical_challenge() {
        let challenge = parse_challenge(
            "Digest realm=\"strata\", qop=\"auth,auth-int\", nonce=\"abc123\", opaque=\"xyz\"",
        )
        .unwrap();
        assert_eq!(challenge.realm, "strata");
        assert_eq!(challenge.nonce, "abc123");
        assert_eq!(challenge.opaque.as_deref(), Some("xyz"));
        assert_eq!(challenge.algorithm, DigestAlgorithm::Md5);
        assert_eq!(challenge.qop, Some(DigestQop::Auth));
    }

    #[test]
    fn auth_int_is_used_when_auth_is_not_offered() {
        let challenge =
            parse_challenge("Digest realm=\"r\", nonce=\"n\", qop=\"auth-int\"").unwrap();
        assert_eq!(challenge.qop, Some(DigestQop::AuthInt));
    }

    #[test]
    fn non_digest_headers_are_rejected() {
        assert!(parse_challenge("Basic realm=\"r\"").is_none());
        assert!(parse_challenge("Digest nonce=\"n\"").is_none());
    }

    #[test]
    fn param_parsing_handles_quotes_and_commas() {
        let params = parse_auth_params("realm=\"a, b\", nonce=xyz, qop=\"auth\"");
        assert_eq!(
            params,
            vec![
                ("realm".to_string(), "a, b".to_string()),
                ("nonce".to_string(), "xyz".to_string()),
                ("qop".to_string(), "auth".to_string()),
            ]
        );
    }

    #[test]
    fn rfc2617_worked_example() {
        // RFC 2617 §3.5, with its fixed cnonce and nc.
        let challenge = parse_challenge(
            "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        )
        .unwrap();
        let response = compute_response(
            &challenge,
            "Mufasa",
            "Circle Of Life",
            "GET",
            "/dir/index.html",
            b"",
            "00000001",
            "0a4f113b",
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn nonce_count_increments_per_request() {
        let mut challenge =
            parse_challenge("Digest realm=\"r\", nonce=\"n\", qop=\"auth\"").unwrap();
        let first = authorization_header(&mut challenge, "u", "p", "GET", "/", b"");
        assert!(first.contains("nc=00000001"), "{first}");
        let second = authorization_header(&mut challenge, "u", "p", "GET", "/", b"");
        assert!(second.contains("nc=00000002"), "{second}");
    }

    #[test]
    fn md5_hex_matches_known_vector() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
