//! Per-session browsing fingerprints
//!
//! Each simulated user keeps one fake public source IP, one browser-like
//! header set + user agent, and one API-client-like header set + user agent
//! for its whole lifetime, drawn uniformly at session start. Which of the two
//! sets a request uses is decided by the path group's traffic type.

use crate::sitemap::TrafficType;
use rand::seq::SliceRandom;
use rand::Rng;

static USER_AGENTS_WEB: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:102.0) Gecko/20100101 Firefox/102.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) AppleWebKit/606.1.15 (KHTML, like Gecko) Version/15.6 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/115.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36 Edg/116.0.1938.69",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0",
    "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (iPad; CPU OS 15_5 like Mac OS X) AppleWebKit/606.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/605.1.15",
];

static USER_AGENTS_API: &[&str] = &[
    "PostmanRuntime/7.29.0",
    "Python-requests/2.27.1",
    "curl/7.79.1",
    "Go-http-client/1.1",
    "Wget/1.20.3 (linux-gnu)",
    "Apache-HttpClient/4.5.13 (Java/11.0.15)",
    "axios/0.21.1 Node.js/v14.17.0",
    "HTTPie/2.5.0",
    "okhttp/4.9.1",
    "aws-sdk-js-2.1395.0",
    "ruby rest-client/2.1.0",
    "Insomnia/2023.5.8",
];

static HEADER_SETS_WEB: &[&[(&str, &str)]] = &[
    &[
        ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("Connection", "keep-alive"),
        ("Upgrade-Insecure-Requests", "1"),
        ("DNT", "1"),
    ],
    &[
        ("Accept", "application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        ("Accept-Language", "en-GB,en;q=0.5"),
        ("Connection", "keep-alive"),
        ("Sec-Fetch-Site", "none"),
        ("Sec-Fetch-Mode", "navigate"),
    ],
    &[
        ("Accept", "text/html,application/xhtml+xml"),
        ("Accept-Language", "fr-FR,fr;q=0.5"),
        ("Connection", "keep-alive"),
        ("Cache-Control", "no-cache"),
    ],
    &[
        ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9"),
        ("Accept-Language", "de-DE,de;q=0.5"),
        ("Connection", "keep-alive"),
        ("Pragma", "no-cache"),
        ("Sec-Fetch-User", "?1"),
    ],
    &[
        ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("Accept-Language", "ja-JP,ja;q=0.5"),
        ("Connection", "keep-alive"),
        ("Upgrade-Insecure-Requests", "1"),
    ],
    &[
        ("Accept", "application/json"),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("Connection", "keep-alive"),
        ("X-Requested-With", "XMLHttpRequest"),
    ],
    &[
        ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        ("Accept-Language", "ko-KR,ko;q=0.5"),
        ("Connection", "keep-alive"),
        ("Sec-Fetch-Dest", "document"),
    ],
];

static HEADER_SETS_API: &[&[(&str, &str)]] = &[
    &[
        ("Accept", "application/json"),
        ("Connection", "keep-alive"),
        ("Accept-Encoding", "gzip, deflate, br"),
        ("Cache-Control", "no-cache"),
    ],
    &[
        ("Accept", "application/xml"),
        ("Connection", "keep-alive"),
        ("Accept-Encoding", "gzip, deflate"),
        ("X-Requested-With", "XMLHttpRequest"),
    ],
    &[
        ("Accept", "*/*"),
        ("Connection", "keep-alive"),
        ("Accept-Encoding", "gzip, deflate"),
        ("X-Forwarded-Proto", "https"),
    ],
    &[
        ("Accept", "application/json, text/plain, */*"),
        ("Connection", "keep-alive"),
        ("Accept-Encoding", "gzip, deflate, br"),
    ],
    &[
        ("Accept", "application/vnd.api+json"),
        ("Connection", "keep-alive"),
        ("X-API-Version", "2.0"),
        ("Accept-Encoding", "gzip, deflate, br"),
    ],
    &[
        ("Accept", "application/ld+json"),
        ("Connection", "keep-alive"),
        ("Content-Type", "application/json"),
        ("Accept-Encoding", "gzip, deflate"),
    ],
    &[
        ("Accept", "application/octet-stream"),
        ("Connection", "keep-alive"),
        ("Accept-Encoding", "gzip, deflate, br"),
    ],
];

/// One simulated user's sticky fingerprint
#[derive(Debug, Clone)]
pub struct SessionProfile {
    /// Fake public IPv4 carried in the configured forwarded-for header
    pub source_ip: String,
    web_headers: &'static [(&'static str, &'static str)],
    web_user_agent: &'static str,
    api_headers: &'static [(&'static str, &'static str)],
    api_user_agent: &'static str,
}

impl SessionProfile {
    /// Draw a fresh fingerprint, uniformly over the built-in tables
    pub fn sample() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            source_ip: random_public_ip(),
            // The tables are non-empty constants, so choose cannot fail.
            web_headers: HEADER_SETS_WEB.choose(&mut rng).copied().unwrap_or(&[]),
            web_user_agent: USER_AGENTS_WEB.choose(&mut rng).copied().unwrap_or(""),
            api_headers: HEADER_SETS_API.choose(&mut rng).copied().unwrap_or(&[]),
            api_user_agent: USER_AGENTS_API.choose(&mut rng).copied().unwrap_or(""),
        }
    }

    /// Header set + User-Agent for the given traffic type
    pub fn headers_for(&self, traffic_type: TrafficType) -> Vec<(String, String)> {
        let (set, agent) = match traffic_type {
            TrafficType::Web => (self.web_headers, self.web_user_agent),
            TrafficType::Api => (self.api_headers, self.api_user_agent),
        };
        let mut headers: Vec<(String, String)> = set
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        headers.push(("User-Agent".into(), agent.to_string()));
        headers
    }
}

/// Generate a random IPv4 address outside the private/reserved ranges
pub fn random_public_ip() -> String {
    let mut rng = rand::thread_rng();
    loop {
        let a: u8 = rng.gen_range(1..=223);
        let b: u8 = rng.gen_range(0..=255);
        let reserved = match a {
            10 | 127 => true,
            172 => (16..=31).contains(&b),
            192 => b == 168,
            100 => (64..=127).contains(&b),
            169 => b == 254,
            _ => false,
        };
        if reserved {
            continue;
        }
        let c: u8 = rng.gen_range(0..=255);
        let d: u8 = rng.gen_range(1..=254);
        return format!("{a}.{b}.{c}.{d}");
    }
}
