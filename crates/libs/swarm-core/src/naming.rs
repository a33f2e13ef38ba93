//! Project slugging and memorable agent-name generation.
//!
//! The slug of a project is a pure function of its human key: a sanitized
//! prefix plus a short SHA-1 suffix, so the same key maps to the same slug
//! forever while distinct keys with identical prefixes stay distinct.

use rand::Rng;
use sha1::{Digest, Sha1};

/// Maximum length of the sanitized portion of a slug.
const SLUG_PREFIX_LEN: usize = 40;

/// Hex digits of the SHA-1 suffix appended to every slug.
const SLUG_HASH_LEN: usize = 10;

/// Maximum length of a caller-supplied agent name hint after sanitizing.
const NAME_HINT_LEN: usize = 40;

const ADJECTIVES: &[&str] = &[
    "Amber", "Auburn", "Bold", "Brave", "Bright", "Brisk", "Calm", "Clever",
    "Copper", "Coral", "Crimson", "Deft", "Eager", "Fleet", "Gentle", "Golden",
    "Hazel", "Indigo", "Ivory", "Jade", "Keen", "Lively", "Lucid", "Mellow",
    "Nimble", "Olive", "Onyx", "Opal", "Patient", "Plucky", "Quiet", "Rapid",
    "Russet", "Sable", "Scarlet", "Silver", "Sly", "Steady", "Swift", "Tidy",
    "Umber", "Vivid", "Wise", "Witty",
];

const NOUNS: &[&str] = &[
    "Badger", "Bison", "Crane", "Curlew", "Dingo", "Falcon", "Ferret", "Finch",
    "Gibbon", "Heron", "Ibis", "Jackal", "Kestrel", "Lark", "Lemur", "Lynx",
    "Macaw", "Marten", "Merlin", "Mole", "Newt", "Ocelot", "Osprey", "Otter",
    "Owl", "Pika", "Plover", "Puffin", "Quail", "Raven", "Robin", "Shrike",
    "Stoat", "Swift", "Tapir", "Tern", "Thrush", "Vole", "Walrus", "Weasel",
    "Wombat", "Wren", "Yak", "Zebu",
];

/// Derive the stable slug for a project human key.
///
/// `slug(k) = sanitize(k)[..40] + "-" + hex(sha1(k))[..10]`
pub fn slug(human_key: &str) -> String {
    let sanitized = sanitize_key(human_key);
    let prefix: String = sanitized.chars().take(SLUG_PREFIX_LEN).collect();
    let prefix = prefix.trim_matches('-').to_string();
    let prefix = if prefix.is_empty() { "project".to_string() } else { prefix };
    format!("{}-{}", prefix, short_sha1(human_key, SLUG_HASH_LEN))
}

/// Map every character outside `[A-Za-z0-9._-]` to `-` and collapse runs.
fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut last_dash = false;
    for c in key.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            out.push(c);
            last_dash = c == '-';
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out
}

fn short_sha1(text: &str, n: usize) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..n.min(digest.len())].to_string()
}

/// Sanitize a caller-supplied name hint down to alphanumerics (max 40 chars).
/// Returns `None` when nothing usable remains.
pub fn sanitize_name_hint(hint: &str) -> Option<String> {
    let cleaned: String = hint
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(NAME_HINT_LEN)
        .collect();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Generate a memorable `AdjectiveNoun` agent name.
///
/// `taken` is the case-insensitive set of names already registered in the
/// project; on collision a monotonically increasing numeric suffix is tried.
pub fn generate_agent_name<F>(mut is_taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    let mut rng = rand::thread_rng();
    // A handful of fresh rolls before falling back to suffixing: with 44x44
    // combinations the first roll almost always lands.
    for _ in 0..16 {
        let candidate = format!(
            "{}{}",
            ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())],
            NOUNS[rng.gen_range(0..NOUNS.len())]
        );
        if !is_taken(&candidate) {
            return candidate;
        }
    }

    let base = format!(
        "{}{}",
        ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())],
        NOUNS[rng.gen_range(0..NOUNS.len())]
    );
    let mut suffix = 2u32;
    loop {
        let candidate = format!("{}{}", base, suffix);
        if !is_taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
