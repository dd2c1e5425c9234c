use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Parse a dotted-quad IPv4 string into a host-order u32. Returns 0 on
/// anything unparseable (0 is treated as "no client IP" throughout).
pub fn parse_ipv4(s: &str) -> u32 {
    s.trim()
        .parse::<std::net::Ipv4Addr>()
        .map(u32::from)
        .unwrap_or(0)
}

/// Host-order u32 back to dotted-quad form for log records.
pub fn format_ipv4(ip: u32) -> String {
    std::net::Ipv4Addr::from(ip).to_string()
}

/// One-pass decode for query/form data: `+` becomes a space, then a single
/// round of percent-decoding. Invalid escapes fall back to the input as-is.
pub fn decode_url_component(s: &str) -> String {
    let plus = s.replace('+', " ");
    match urlencoding::decode(&plus) {
        Ok(Cow::Borrowed(_)) => plus,
        Ok(Cow::Owned(decoded)) => decoded,
        Err(_) => plus,
    }
}

/// Split a raw query string into (name, value) slices without decoding.
/// A key without `=` yields an empty value.
pub fn split_query(query: &str) -> impl Iterator<Item = (&str, &str)> {
    query.split('&').filter(|p| !p.is_empty()).map(|pair| {
        match pair.split_once('=') {
            Some((name, value)) => (name, value),
            None => (pair, ""),
        }
    })
}
