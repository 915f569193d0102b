//! Basic/Digest authentication for the WebDAV front-end.
//!
//! Nonces live in a per-server table with a 30-minute TTL; a request that
//! presents an expired nonce gets a fresh challenge with `stale=true` so
//! clients re-hash without re-prompting the user. Expired entries are
//! removed on access.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method};
use base64::Engine as _;

use strata_webdav::auth::{md5_hex, parse_auth_params};

pub const REALM: &str = "strata";
pub const NONCE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct DavAuthConfig {
    pub username: String,
    pub password: String,
    pub allow_basic: bool,
    pub allow_digest: bool,
}

pub struct NonceTable {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

#[derive(Debug, PartialEq, Eq)]
enum NonceStatus {
    Valid,
    Stale,
    Unknown,
}

impl NonceTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn issue(&self) -> String {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        entries.retain(|_, issued| now.duration_since(*issued) <= self.ttl);
        entries.insert(nonce.clone(), now);
        nonce
    }

    fn status(&self, nonce: &str) -> NonceStatus {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match entries.get(nonce) {
            None => NonceStatus::Unknown,
            Some(issued) => {
                if Instant::now().duration_since(*issued) > self.ttl {
                    entries.remove(nonce);
                    NonceStatus::Stale
                } else {
                    NonceStatus::Valid
                }
            }
        }
    }

}

pub struct DavAuth {
    pub config: DavAuthConfig,
    pub nonces: NonceTable,
}

impl DavAuth {
    pub fn new(config: DavAuthConfig) -> Self {
        Self {
            config,
            nonces: NonceTable::new(NONCE_TTL),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized,
    /// Re-challenge; `stale` marks an expired-but-well-formed digest nonce.
    Challenge { stale: bool },
}

pub fn check(auth: &DavAuth, method: &Method, headers: &HeaderMap) -> AuthOutcome {
    let Some(header) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
    else {
        return AuthOutcome::Challenge { stale: false };
    };

    if auth.config.allow_basic
        && let Some(encoded) = header.strip_prefix("Basic ")
    {
        return check_basic(&auth.config, encoded);
    }

    if auth.config.allow_digest
        && let Some(params) = header.strip_prefix("Digest ")
    {
        return check_digest(auth, method, params);
    }

    AuthOutcome::Challenge { stale: false }
}

fn check_basic(config: &DavAuthConfig, encoded: &str) -> AuthOutcome {
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return AuthOutcome::Challenge { stale: false };
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return AuthOutcome::Challenge { stale: false };
    };
    let Some((username, password)) = decoded.split_once(':') else {
        return AuthOutcome::Challenge { stale: false };
    };
    if username == config.username && password == config.password {
        AuthOutcome::Authorized
    } else {
        AuthOutcome::Challenge { stale: false }
    }
}

fn check_digest(auth: &DavAuth, method: &Method, raw_params: &str) -> AuthOutcome {
    let params = parse_auth_params(raw_params);
    let get = |key: &str| params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

    let (Some(username), Some(nonce), Some(uri), Some(response)) =
        (get("username"), get("nonce"), get("uri"), get("response"))
    else {
        return AuthOutcome::Challenge { stale: false };
    };
    if username != auth.config.username || get("realm") != Some(REALM) {
        return AuthOutcome::Challenge { stale: false };
    }

    match auth.nonces.status(nonce) {
        NonceStatus::Valid => {}
        NonceStatus::Stale => return AuthOutcome::Challenge { stale: true },
        NonceStatus::Unknown => return AuthOutcome::Challenge { stale: false },
    }

    let ha1 = md5_hex(
        format!("{}:{REALM}:{}", auth.config.username, auth.config.password).as_bytes(),
    );
    let ha2 = md5_hex(format!("{}:{uri}", method.as_str()).as_bytes());
    let expected = match get("qop") {
        Some("auth") => {
            let (Some(nc), Some(cnonce)) = (get("nc"), get("cnonce")) else {
                return AuthOutcome::Challenge { stale: false };
            };
            md5_hex(format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}").as_bytes())
        }
        None => md5_hex(format!("{ha1}:{nonce}:{ha2}").as_bytes()),
        Some(_) => return AuthOutcome::Challenge { stale: false },
    };

    if expected.eq_ignore_ascii_case(response) {
        AuthOutcome::Authorized
    } else {
        AuthOutcome::Challenge { stale: false }
    }
}

/// `WWW-Authenticate` header values for a 401, one per enabled scheme.
pub fn challenge_headers(auth: &DavAuth, stale: bool) -> Vec<String> {
    let mut headers = Vec::new();
    if auth.config.allow_basic {
        headers.push(format!("Basic realm=\"{REALM}\""));
    }
    if auth.config.allow_digest {
        let nonce = auth.nonces.issue();
        let mut value =
            format!("Digest realm=\"{REALM}\", qop=\"auth\", nonce=\"{nonce}\", algorithm=MD5");
        if stale {
            value.push_str(", stale=true");
        }
        headers.push(value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, Method};
    use base64::Engine as _;
    use strata_webdav::auth::md5_hex;

    use super::{AuthOutcome, DavAuth, DavAuthConfig, REALM, check, challenge_headers};

    fn auth() -> DavAuth {
        DavAuth::new(DavAuthConfig {
            username: "alice".to_string(),
            password: "secret".to_string(),
            allow_basic: true,
            allow_digest: true,
        })
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn missing_credentials_are_challenged() {
        let outcome = check(&auth(), &Method::GET, &HeaderMap::new());
        assert_eq!(outcome, AuthOutcome::Challenge { stale: false });
    }

    #[test]
    fn basic_round_trip() {
        let auth = auth();
        let good = base64::engine::general_purpose::STANDARD.encode("alice:secret");
        let outcome = check(&auth, &Method::GET, &headers_with(&format!("Basic {good}")));
        assert_eq!(outcome, AuthOutcome::Authorized);

        let bad = base64::engine::general_purpose::STANDARD.encode("alice:wrong");
        let outcome = check(&auth, &Method::GET, &headers_with(&format!("Basic {bad}")));
        assert_eq!(outcome, AuthOutcome::Challenge { stale: false });
    }

    #[test]
    fn digest_round_trip() {
        let auth = auth();
        let nonce = auth.nonces.issue();

        let ha1 = md5_hex(format!("alice:{REALM}:secret").as_bytes());
        let ha2 = md5_hex(b"GET:/f");
        let response = md5_hex(format!("{ha1}:{nonce}:00000001:abcd:auth:{ha2}").as_bytes());
        let header = format!(
            "Digest username=\"alice\", realm=\"{REALM}\", nonce=\"{nonce}\", uri=\"/f\", \
             qop=auth, nc=00000001, cnonce=\"abcd\", response=\"{response}\""
        );

        let outcome = check(&auth, &Method::GET, &headers_with(&header));
        assert_eq!(outcome, AuthOutcome::Authorized);
    }

    #[test]
    fn expired_nonce_is_stale() {
        let auth = super::DavAuth {
            config: auth().config,
            nonces: super::NonceTable::new(std::time::Duration::ZERO),
        };
        let nonce = auth.nonces.issue();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let header = format!(
            "Digest username=\"alice\", realm=\"{REALM}\", nonce=\"{nonce}\", uri=\"/f\", \
             qop=auth, nc=00000001, cnonce=\"abcd\", response=\"ffff\""
        );
        let outcome = check(&auth, &Method::GET, &headers_with(&header));
        assert_eq!(outcome, AuthOutcome::Challenge { stale: true });

        // The expired entry was removed on access; presenting it again is
        // now an unknown nonce.
        let outcome = check(&auth, &Method::GET, &headers_with(&header));
        assert_eq!(outcome, AuthOutcome::Challenge { stale: false });
    }

    #[test]
    fn challenges_cover_enabled_schemes() {
        let auth = auth();
        let headers = challenge_headers(&auth, false);
        assert_eq!(headers.len(), 2);
        assert!(headers[0].starts_with("Basic "));
        assert!(headers[1].starts_with("Digest "));
        assert!(!headers[1].contains("stale"));

        let stale = challenge_headers(&auth, true);
        assert!(stale[1].contains("stale=true"));
    }
}
