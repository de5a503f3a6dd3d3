use sha2::{Digest, Sha256};

fn fold(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable content hash over the normalized tuple described in §3:
/// `(title, company, location, sorted(technologies), salary_min,
/// salary_max, description)`, all lowercased/whitespace-collapsed where
/// applicable. Permuting `technologies`, rewhitespacing, or recasing
/// `title`/`company` never changes the result (§8 property 2).
pub fn source_fingerprint(
    title: &str,
    company: &str,
    location: &str,
    technologies: &[String],
    salary_min: Option<u64>,
    salary_max: Option<u64>,
    description: &str,
) -> String {
    let mut techs: Vec<String> = technologies.iter().map(|t| fold(t)).collect();
    techs.sort();
    techs.dedup();

    let mut hasher = Sha256::new();
    hasher.update(fold(title).as_bytes());
    hasher.update(b"\0");
    hasher.update(fold(company).as_bytes());
    hasher.update(b"\0");
    hasher.update(fold(location).as_bytes());
    hasher.update(b"\0");
    hasher.update(techs.join(",").as_bytes());
    hasher.update(b"\0");
    hasher.update(format!("{:?}", salary_min).as_bytes());
    hasher.update(b"\0");
    hasher.update(format!("{:?}", salary_max).as_bytes());
    hasher.update(b"\0");
    hasher.update(fold(description).as_bytes());

    hex::encode(hasher.finalize())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Content-addressed cache key: hash of canonical URL + page number (§3).
pub fn cache_key(canonical_url: &str, page: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hasher.update(b"\0");
    hasher.update(page.to_le_bytes());
    hex::encode(hasher.finalize())
}
