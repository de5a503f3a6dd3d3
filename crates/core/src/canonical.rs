use url::Url;

/// Query parameters stripped during canonicalization (§3 invariants).
const TRACKING_PARAMS: &[&str] = &["ref", "fbclid", "gclid", "sessionid", "session_id"];

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Canonicalize a URL per §3: strip tracking query parameters, lowercase
/// scheme+host, force scheme to `https`. Idempotent: `canon(canon(u)) ==
/// canon(u)` (§8 property 1).
pub fn canonicalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;

    let _ = url.set_scheme("https");

    if let Some(host) = url.host_str() {
        let lowered = host.to_lowercase();
        let _ = url.set_host(Some(&lowered));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(&k.to_lowercase()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&kept);
    }

    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tracking_params_and_forces_https() {
        let got = canonicalize(
            "HTTP://Example.COM/jobs/42?utm_source=x&ref=y&fbclid=z&id=42",
        )
        .unwrap();
        assert_eq!(got, "https://example.com/jobs/42?id=42");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonicalize("http://Example.com/a?utm_campaign=q&id=1").unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(canonicalize("not a url").is_none());
    }
}
