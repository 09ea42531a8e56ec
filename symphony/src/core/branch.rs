//! Publish branch naming: `feature/<slug>-<8 hex>`.

use rand::RngCore;

const BRANCH_NAMESPACE: &str = "feature/";
const MAX_SLUG_LEN: usize = 40;

/// Lowercase, keep `[a-z0-9-]`, collapse every other run into a single `-`.
///
/// Falls back to `"change"` when nothing usable remains.
pub fn slugify(prefix: &str) -> String {
    let mut slug = String::with_capacity(prefix.len());
    for ch in prefix.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "change".to_string()
    } else {
        slug.to_string()
    }
}

/// Build a branch name from a prefix and a 32-bit suffix.
pub fn branch_name(prefix: &str, suffix: u32) -> String {
    format!("{BRANCH_NAMESPACE}{}-{suffix:08x}", slugify(prefix))
}

/// Fresh branch name with a random suffix drawn from `rng`.
pub fn generate_branch_name<R: RngCore + ?Sized>(prefix: &str, rng: &mut R) -> String {
    branch_name(prefix, rng.next_u32())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::collections::HashSet;

    #[test]
    fn slugify_normalizes_prefix() {
        assert_eq!(slugify("ai-symphony"), "ai-symphony");
        assert_eq!(slugify("AI Symphony!"), "ai-symphony");
        assert_eq!(slugify("  --weird__name--  "), "weird-name");
        assert_eq!(slugify("???"), "change");
    }

    #[test]
    fn slugify_truncates_long_prefixes() {
        let slug = slugify(&"a".repeat(100));
        assert_eq!(slug.len(), MAX_SLUG_LEN);
    }

    #[test]
    fn suffix_is_zero_padded_hex() {
        assert_eq!(branch_name("ai-symphony", 0xab), "feature/ai-symphony-000000ab");
        assert_eq!(
            branch_name("ai-symphony", u32::MAX),
            "feature/ai-symphony-ffffffff"
        );
    }

    #[test]
    fn generated_names_match_convention_and_are_unique() {
        let pattern = Regex::new(r"^feature/ai-symphony-[0-9a-f]{8}$").expect("regex");
        let mut rng = rand::thread_rng();
        let names: HashSet<String> = (0..1000)
            .map(|_| generate_branch_name("ai-symphony", &mut rng))
            .inspect(|name| assert!(pattern.is_match(name), "bad branch name {name}"))
            .collect();
        assert_eq!(names.len(), 1000);
    }
}
