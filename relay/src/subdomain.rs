//! Subdomain extraction, sanitization, and generation.

use rand::Rng;

const ADJECTIVES: [&str; 12] = [
    "quick", "lazy", "happy", "bright", "dark", "cool", "warm", "fast", "calm", "bold", "wild",
    "tiny",
];
const NOUNS: [&str; 12] = [
    "fox", "dog", "cat", "bird", "bear", "wolf", "hawk", "owl", "river", "cloud", "star", "moon",
];

/// Maximum length of a subdomain label, per RFC 1035 label limits.
pub const MAX_LABEL_LEN: usize = 63;

/// How many times `generate` may retry against a collision check before
/// falling back to appending extra entropy.
const GENERATE_RETRIES: usize = 8;

/// Extracts the subdomain label from a `Host` header value, given the
/// configured root domain. Returns `None` if the host does not resolve to
/// exactly one subdomain level under `root_domain`.
pub fn extract(host: &str, root_domain: &str) -> Option<String> {
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    let host = host.to_ascii_lowercase();
    let root_domain = root_domain.to_ascii_lowercase();

    let suffix = format!(".{root_domain}");
    let prefix = host.strip_suffix(&suffix)?;

    if prefix.is_empty() || prefix.contains('.') {
        return None;
    }
    Some(prefix.to_string())
}

/// Normalizes a client-requested label into a valid subdomain label.
/// Returns an empty string if nothing usable survives sanitization; callers
/// treat that as "no requested label" and fall back to `generate`.
pub fn sanitize(label: &str) -> String {
    let lowered = label.to_ascii_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_dash = false;

    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }

    let trimmed = out.trim_matches('-');
    truncate_at_char_boundary(trimmed, MAX_LABEL_LEN).to_string()
}

fn truncate_at_char_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].trim_end_matches('-')
}

/// Generates a random `{adjective}-{noun}-{4 hex chars}` label, retrying
/// against `is_taken` a bounded number of times before widening the
/// candidate with extra entropy.
pub fn generate(mut is_taken: impl FnMut(&str) -> bool) -> String {
    let mut rng = rand::thread_rng();

    for _ in 0..GENERATE_RETRIES {
        let candidate = random_label(&mut rng);
        if !is_taken(&candidate) {
            return candidate;
        }
    }

    // Collisions this persistent are vanishingly unlikely; widen the
    // suffix rather than loop forever.
    loop {
        let candidate = format!("{}-{:08x}", random_label(&mut rng), rng.gen::<u32>());
        if !is_taken(&candidate) {
            return candidate;
        }
    }
}

fn random_label(rng: &mut impl Rng) -> String {
    let adj = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let suffix: u16 = rng.gen_range(0..0x10000);
    format!("{adj}-{noun}-{suffix:04x}")
}
