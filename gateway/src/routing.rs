use http::Uri;
use url::Url;

/// Shard used when an authorization record carries no assignment.
pub const DEFAULT_SHARD: &str = "shard-0";

/// Maps a shard id of the form `shard-<index>` onto the configured endpoint
/// list. Pure and total: anything unparseable or out of range yields `None`
/// and the caller responds with a terminal status, never a panic.
pub fn route<'a>(assigned_shard: Option<&str>, endpoints: &'a [Url]) -> Option<&'a Url> {
    let shard = assigned_shard.unwrap_or(DEFAULT_SHARD);
    endpoints.get(shard_index(shard)?)
}

// The index must be all ASCII digits; `usize::from_str` alone would also
// accept a leading `+`.
fn shard_index(shard: &str) -> Option<usize> {
    let index = shard.strip_prefix("shard-")?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}

/// Rebases a request URI onto a shard endpoint, preserving path and query.
pub fn target_url(endpoint: &Url, uri: &Uri) -> Url {
    let mut url = endpoint.clone();
    match uri.path_and_query() {
        Some(pq) => match pq.as_str().split_once('?') {
            Some((path, query)) => {
                url.set_path(path);
                url.set_query(Some(query));
            }
            None => url.set_path(pq.as_str()),
        },
        None => url.set_path("/"),
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Vec<Url> {
        vec![
            Url::parse("http://h0:9").unwrap(),
            Url::parse("http://h1:9").unwrap(),
        ]
    }

    #[test]
    fn test_assigned_shard_selects_endpoint() {
        let endpoints = endpoints();
        assert_eq!(
            route(Some("shard-1"), &endpoints),
            Some(&Url::parse("http://h1:9").unwrap())
        );
        assert_eq!(
            route(Some("shard-0"), &endpoints),
            Some(&Url::parse("http://h0:9").unwrap())
        );
    }

    #[test]
    fn test_missing_assignment_defaults_to_first_endpoint() {
        let endpoints = endpoints();
        assert_eq!(
            route(None, &endpoints),
            Some(&Url::parse("http://h0:9").unwrap())
        );
    }

    #[test]
    fn test_out_of_range_index() {
        assert_eq!(route(Some("shard-2"), &endpoints()), None);
        assert_eq!(route(None, &[]), None);
    }

    #[test]
    fn test_malformed_shard_ids() {
        let endpoints = endpoints();
        for shard in ["", "shard-", "shard-x", "shard-+1", "shard- 1", "other-1", "SHARD-1"] {
            assert_eq!(route(Some(shard), &endpoints), None, "shard id {shard:?}");
        }
    }

    #[test]
    fn test_leading_zeros_parse() {
        assert_eq!(
            route(Some("shard-01"), &endpoints()),
            Some(&Url::parse("http://h1:9").unwrap())
        );
    }

    #[test]
    fn test_huge_index_does_not_panic() {
        assert_eq!(route(Some("shard-99999999999999999999"), &endpoints()), None);
    }

    #[test]
    fn test_target_url_preserves_path_and_query() {
        let endpoint = Url::parse("http://shard-a:4318").unwrap();
        let uri: Uri = "/v1/traces?debug=1".parse().unwrap();
        assert_eq!(
            target_url(&endpoint, &uri).as_str(),
            "http://shard-a:4318/v1/traces?debug=1"
        );

        let uri: Uri = "/v1/logs".parse().unwrap();
        assert_eq!(
            target_url(&endpoint, &uri).as_str(),
            "http://shard-a:4318/v1/logs"
        );
    }
}
