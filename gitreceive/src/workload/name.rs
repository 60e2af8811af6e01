//! Builder pod names. Pod names can not exceed 63 bytes, so the application name is truncated
//! to leave room for the prefix, the short revision and the random suffix.

pub const MAX_POD_NAME_LEN: usize = 63;

pub const SHORT_REVISION_LEN: usize = 8;

const SUFFIX_LEN: usize = 8;

const SLUG_PREFIX: &str = "slugbuild-";
const SLUG_MAX_APP_LEN: usize = 35;

const IMAGE_PREFIX: &str = "dockerbuild-";
const IMAGE_MAX_APP_LEN: usize = 33;

/// Returns the longest prefix of `value` that fits in `max` bytes without splitting a character.
fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// The abbreviated revision used in pod names, image tags and object keys.
pub fn short_revision(revision: &str) -> &str {
    truncate(revision, SHORT_REVISION_LEN)
}

/// A fresh random lowercase hex string, never cached so that retries of the same build get distinct
/// names.
fn random_suffix() -> String {
    let suffix = format!("{:08x}", rand::random::<u32>());
    debug_assert_eq!(suffix.len(), SUFFIX_LEN);
    suffix
}

fn pod_name(prefix: &str, max_app_len: usize, app: &str, revision: &str) -> String {
    format!(
        "{prefix}{app}-{revision}-{suffix}",
        app = truncate(app, max_app_len),
        revision = short_revision(revision),
        suffix = random_suffix(),
    )
}

pub fn slug_pod_name(app: &str, revision: &str) -> String {
    pod_name(SLUG_PREFIX, SLUG_MAX_APP_LEN, app, revision)
}

pub fn image_pod_name(app: &str, revision: &str) -> String {
    pod_name(IMAGE_PREFIX, IMAGE_MAX_APP_LEN, app, revision)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_APP: &str = "this-name-has-more-than-24-characters-in-length";

    #[test]
    fn image_pod_name_keeps_short_app_names() {
        let name = image_pod_name("demo", "12345678");
        assert!(name.starts_with("dockerbuild-demo-12345678-"), "{name}");
        assert_eq!(name.len(), "dockerbuild-demo-12345678-".len() + SUFFIX_LEN);
    }

    #[test]
    fn image_pod_name_truncates_long_app_names() {
        let name = image_pod_name(LONG_APP, "12345678");
        assert!(
            name.starts_with("dockerbuild-this-name-has-more-than-24-charac-12345678-"),
            "{name}"
        );
        assert!(name.len() <= MAX_POD_NAME_LEN, "{} > 63", name.len());
    }

    #[test]
    fn slug_pod_name_truncates_long_app_names() {
        let name = slug_pod_name("demo", "12345678");
        assert!(name.starts_with("slugbuild-demo-12345678-"), "{name}");

        let name = slug_pod_name(LONG_APP, "12345678");
        assert!(
            name.starts_with("slugbuild-this-name-has-more-than-24-characte-12345678-"),
            "{name}"
        );
        assert!(name.len() <= MAX_POD_NAME_LEN, "{} > 63", name.len());
    }

    #[test]
    fn full_revisions_are_shortened() {
        let revision = "0123456789abcdef0123456789abcdef01234567";
        for app_len in 0..80 {
            let app = "a".repeat(app_len);
            for name in [slug_pod_name(&app, revision), image_pod_name(&app, revision)] {
                assert!(name.len() <= MAX_POD_NAME_LEN, "{name} is too long");
                assert!(name.contains("-01234567-"), "{name}");
            }
        }
    }

    #[test]
    fn multibyte_app_names_are_cut_on_character_boundaries() {
        let app = "é".repeat(40);
        let name = slug_pod_name(&app, "deadbeef");
        assert!(name.len() <= MAX_POD_NAME_LEN, "{} > 63: {name}", name.len());
        assert!(
            name.starts_with(&format!("slugbuild-{}-deadbeef-", "é".repeat(17))),
            "{name}"
        );

        let name = image_pod_name(&format!("a{app}"), "deadbeef");
        assert!(name.len() <= MAX_POD_NAME_LEN, "{} > 63: {name}", name.len());
        assert!(
            name.starts_with(&format!("dockerbuild-a{}-deadbeef-", "é".repeat(16))),
            "{name}"
        );

        assert_eq!(truncate("日本語", 4), "日");
        assert_eq!(truncate("demo", 35), "demo");
    }

    #[test]
    fn names_are_unique_per_call() {
        let first = slug_pod_name("demo", "deadbeef");
        let second = slug_pod_name("demo", "deadbeef");
        assert_ne!(first, second);
        assert_eq!(first[..first.len() - SUFFIX_LEN], second[..second.len() - SUFFIX_LEN]);

        let first = image_pod_name("demo", "deadbeef");
        let second = image_pod_name("demo", "deadbeef");
        assert_ne!(first, second);
        assert_eq!(first[..first.len() - SUFFIX_LEN], second[..second.len() - SUFFIX_LEN]);
    }

    #[test]
    fn suffix_is_lowercase_hex() {
        let name = slug_pod_name("demo", "deadbeef");
        let suffix = &name[name.len() - SUFFIX_LEN..];
        assert!(suffix
            .bytes()
            .all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f')));
    }
}
