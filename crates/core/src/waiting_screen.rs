/// Detects interstitial pages that stand between the fetcher and a real
/// job listing: bot-check challenges, rate-limit responses, and the
/// near-empty shells that client-rendered job boards serve before their
/// JS bundle populates the listing (§4.4). These need a retry after a
/// backoff, not an immediate parse attempt.
pub fn is_waiting_screen(body_text: &str, html_size: usize) -> bool {
    let body_lower = body_text.to_lowercase();

    // A near-empty response is usually a JS-shell placeholder or a
    // redirect stub, not a real listing page.
    if html_size < 500 && (body_lower.contains("loading") || body_lower.contains("redirect")) {
        return true;
    }

    let interstitial_keywords = vec![
        "just a moment",
        "checking your browser",
        "verify you are human",
        "verifying you are human",
        "enable javascript to view",
        "enable javascript and cookies",
        "rate limit exceeded",
        "too many requests",
        "please slow down",
        "access to this page has been denied",
        "complete the security check",
        "temporarily unavailable",
    ];

    for keyword in interstitial_keywords {
        if body_lower.contains(keyword) {
            return true;
        }
    }

    // Countdown-style redirect stubs ("redirecting in 5 4 3 2 1")
    if body_lower.contains("5")
        && body_lower.contains("4")
        && body_lower.contains("3")
        && body_lower.contains("redirecting")
    {
        return true;
    }

    if html_size < 1000 && body_lower.contains("redirect") {
        return true;
    }

    false
}

/// Estimates how long to back off before retrying, based on which
/// interstitial was detected (§4.4). Rate limits get the longest backoff;
/// bot checks and JS-shell placeholders clear quickly.
pub fn estimate_wait_time(body_text: &str) -> u64 {
    let body_lower = body_text.to_lowercase();

    if body_lower.contains("rate limit") || body_lower.contains("too many requests") {
        return 120;
    }

    if body_lower.contains("redirecting in") || body_lower.contains("wait") {
        for i in 1..=60 {
            if body_lower.contains(&i.to_string()) {
                return (i + 10) as u64;
            }
        }
    }

    if body_lower.contains("checking your browser") || body_lower.contains("just a moment") {
        return 15;
    }

    if body_lower.contains("verify you are human") || body_lower.contains("security check") {
        return 60;
    }

    30
}
