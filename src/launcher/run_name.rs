//! Stable artifact directory names derived from scenario titles

use sha2::{Digest, Sha256};

/// Longest slug kept before the hash suffix
const MAX_SLUG_LEN: usize = 48;

/// Derive a filesystem-safe run name from a scenario's display text
///
/// The title is lowercased and every run of characters other than ASCII
/// letters and digits collapses to a single `_`. The slug alone can
/// collide ("rt pool" and "rt-pool"), so the first 8 hex digits of the
/// title's SHA-256 are appended. The same title always maps to the same
/// name, so reruns of a scenario reuse its artifact directory.
pub fn run_name_for(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_sep = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('_');

    let suffix = title_digest(title);
    if slug.is_empty() {
        suffix
    } else {
        format!("{}_{}", slug, suffix)
    }
}

/// First 8 hex digits of the title's SHA-256
pub fn title_digest(title: &str) -> String {
    let digest = Sha256::digest(title.as_bytes());
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_title() {
        let name = run_name_for("One pod running in isolated cpu pool, and RT policy!");
        assert!(name.starts_with("one_pod_running_in_isolated_cpu_pool_and_rt_poli"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn test_is_deterministic() {
        let title = "performance-isolated-cpu-pool-rt-scheduling-policy One pod in shared pool";
        assert_eq!(run_name_for(title), run_name_for(title));
    }

    #[test]
    fn test_titles_differing_only_in_punctuation_do_not_collide() {
        let a = run_name_for("rt pool");
        let b = run_name_for("rt-pool");
        let c = run_name_for("RT pool");
        assert!(a.starts_with("rt_pool_"));
        assert!(b.starts_with("rt_pool_"));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_digest_is_run_name_suffix() {
        let title = "Scenario title";
        assert!(run_name_for(title).ends_with(&title_digest(title)));
    }

    #[test]
    fn test_punctuation_only_title_still_named() {
        let name = run_name_for("!!!");
        assert_eq!(name.len(), 8);
    }
}
