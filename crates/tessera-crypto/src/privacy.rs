//! One-way hashing of personal identifiers.
//!
//! Raw user ids, IP addresses and user agents never enter the audit ledger.
//! Each is reduced to the coarsest form that still serves compliance queries
//! and then hashed with a deployment secret (keyed BLAKE3), so the digests are
//! stable within a deployment but cannot be reversed or brute-forced without
//! the secret.

use std::net::IpAddr;

use tessera_types::Digest;

const KEY_CONTEXT: &str = "tessera 2024-01 privacy hasher v1";

/// Keyed one-way hasher for personal identifiers.
#[derive(Clone)]
pub struct PrivacyHasher {
    key: [u8; 32],
}

impl PrivacyHasher {
    /// Derive the hashing key from a deployment secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret),
        }
    }

    pub fn hash_user_id(&self, user_id: &str) -> Digest {
        self.keyed(b"user", user_id.as_bytes())
    }

    pub fn hash_session_id(&self, session_id: &str) -> Digest {
        self.keyed(b"session", session_id.as_bytes())
    }

    /// Hash the network prefix of `ip`. Returns `None` when `ip` does not
    /// parse as an address.
    pub fn hash_ip(&self, ip: &str) -> Option<Digest> {
        truncate_ip(ip).map(|prefix| self.keyed(b"ip", prefix.as_bytes()))
    }

    pub fn hash_user_agent(&self, user_agent: &str) -> Digest {
        self.keyed(b"ua", reduce_user_agent(user_agent).as_bytes())
    }

    fn keyed(&self, kind: &[u8], value: &[u8]) -> Digest {
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(kind);
        hasher.update(b":");
        hasher.update(value);
        Digest::from_hash(*hasher.finalize().as_bytes())
    }
}

impl std::fmt::Debug for PrivacyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivacyHasher").finish_non_exhaustive()
    }
}

/// Truncate an address to its network prefix: /24 for IPv4, /48 for IPv6.
///
/// IPv4-mapped IPv6 addresses are treated as IPv4.
pub fn truncate_ip(raw: &str) -> Option<String> {
    let addr: IpAddr = raw.trim().parse().ok()?;
    let addr = match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    };
    match addr {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            Some(format!("{a}.{b}.{c}.0/24"))
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            Some(format!("{:x}:{:x}:{:x}::/48", s[0], s[1], s[2]))
        }
    }
}

// Order matters: Edge and Opera carry a `Chrome/` token, Chrome carries `Safari/`.
const BROWSER_MARKERS: &[(&str, &str)] = &[
    ("Edg/", "edge"),
    ("EdgA/", "edge"),
    ("OPR/", "opera"),
    ("SamsungBrowser/", "samsung"),
    ("FxiOS/", "firefox"),
    ("Firefox/", "firefox"),
    ("CriOS/", "chrome"),
    ("Chrome/", "chrome"),
];

/// Reduce a user-agent string to `family/major`.
///
/// Unknown agents fall back to their first `product/version` token, and to
/// `"unknown"` when even that is missing.
pub fn reduce_user_agent(raw: &str) -> String {
    for (marker, family) in BROWSER_MARKERS {
        if let Some(major) = major_after(raw, marker) {
            return format!("{family}/{major}");
        }
    }
    if raw.contains("Safari/") {
        if let Some(major) = major_after(raw, "Version/") {
            return format!("safari/{major}");
        }
    }

    let first = raw.split_whitespace().next().unwrap_or_default();
    match first.split_once('/') {
        Some((product, version)) if !product.is_empty() => {
            let major: String = version.chars().take_while(char::is_ascii_digit).collect();
            if major.is_empty() {
                product.to_ascii_lowercase()
            } else {
                format!("{}/{major}", product.to_ascii_lowercase())
            }
        }
        _ => "unknown".to_string(),
    }
}

fn major_after(raw: &str, marker: &str) -> Option<String> {
    let start = raw.find(marker)? + marker.len();
    let major: String = raw[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    (!major.is_empty()).then_some(major)
}
