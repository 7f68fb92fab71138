//! Reading the server's rate limit hints off response headers.

use std::time::Duration;
use std::time::SystemTime;

use http::HeaderMap;
use http::StatusCode;
use http::header::RETRY_AFTER;
use http::header::SERVER;

use pace_limit::Observation;

pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Substring of the `Server` header that marks a CDN edge throttle.
const EDGE_VENDOR: &str = "cloudflare";

/// Decide what a response tells the pacer.
///
/// An edge `429` wins over budget headers, which the edge never sends anyway.
pub fn observation(status: StatusCode, headers: &HeaderMap, edge_pause: Duration) -> Observation {
    if status == StatusCode::TOO_MANY_REQUESTS && is_edge(headers) {
        return Observation::EdgeThrottle { pause: edge_pause };
    }

    match (
        header_u64(headers, X_RATELIMIT_REMAINING),
        header_u64(headers, X_RATELIMIT_LIMIT),
    ) {
        (Some(remaining), Some(limit)) => Observation::Budget {
            remaining,
            limit,
            reset_at: header_u64(headers, X_RATELIMIT_RESET)
                .and_then(|secs| SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs))),
        },
        _ => Observation::Unchanged,
    }
}

/// `Retry-After` in whole seconds. The HTTP-date form is not supported.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, RETRY_AFTER).map(Duration::from_secs)
}

fn is_edge(headers: &HeaderMap) -> bool {
    headers
        .get_all(SERVER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains(EDGE_VENDOR))
}

fn header_u64(headers: &HeaderMap, name: impl http::header::AsHeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    const PAUSE: Duration = Duration::from_secs(10);

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn edge_throttle_is_case_insensitive() {
        for server in ["cloudflare", "CloudFlare", "cloudflare-nginx"] {
            let map = headers(&[("server", server)]);
            assert_eq!(
                observation(StatusCode::TOO_MANY_REQUESTS, &map, PAUSE),
                Observation::EdgeThrottle { pause: PAUSE }
            );
        }
    }

    #[test]
    fn origin_429_is_not_an_edge_throttle() {
        let map = headers(&[("server", "nginx")]);
        assert_eq!(
            observation(StatusCode::TOO_MANY_REQUESTS, &map, PAUSE),
            Observation::Unchanged
        );

        let map = headers(&[("server", "cloudflare")]);
        assert_eq!(
            observation(StatusCode::SERVICE_UNAVAILABLE, &map, PAUSE),
            Observation::Unchanged
        );
    }

    #[test]
    fn budget_headers_are_parsed() {
        let map = headers(&[
            ("x-ratelimit-remaining", "3"),
            ("x-ratelimit-limit", "50"),
            ("x-ratelimit-reset", "1700000060"),
        ]);
        assert_eq!(
            observation(StatusCode::OK, &map, PAUSE),
            Observation::Budget {
                remaining: 3,
                limit: 50,
                reset_at: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_060)),
            }
        );
    }

    #[test]
    fn budget_needs_both_numeric_headers() {
        let map = headers(&[("x-ratelimit-remaining", "3")]);
        assert_eq!(observation(StatusCode::OK, &map, PAUSE), Observation::Unchanged);

        let map = headers(&[("x-ratelimit-remaining", "3"), ("x-ratelimit-limit", "lots")]);
        assert_eq!(observation(StatusCode::OK, &map, PAUSE), Observation::Unchanged);
    }

    #[test]
    fn unparseable_reset_is_ignored() {
        let map = headers(&[
            ("x-ratelimit-remaining", "1"),
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-reset", "soon"),
        ]);
        assert_eq!(
            observation(StatusCode::OK, &map, PAUSE),
            Observation::Budget {
                remaining: 1,
                limit: 5,
                reset_at: None,
            }
        );
    }

    #[test]
    fn retry_after_accepts_only_seconds() {
        assert_eq!(
            retry_after(&headers(&[("retry-after", "7")])),
            Some(Duration::from_secs(7))
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "0")])),
            Some(Duration::ZERO)
        );
        assert_eq!(retry_after(&headers(&[("retry-after", "-1")])), None);
        assert_eq!(
            retry_after(&headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")])),
            None
        );
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }
}
