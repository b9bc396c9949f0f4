//! Checks for the pieces of an image reference, following the grammar the
//! registry and the build tool accept.

use regex::Regex;
use std::sync::LazyLock;

const MAX_TAG_LEN: usize = 128;

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("tag pattern is valid")
});

static PATH_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*$").expect("path pattern is valid")
});

pub fn is_valid_tag(tag: &str) -> bool {
    tag.len() <= MAX_TAG_LEN && TAG.is_match(tag)
}

/// One `/`-separated part of a repository name, e.g. `acme` or `api`.
pub fn is_valid_path_component(component: &str) -> bool {
    PATH_COMPONENT.is_match(component)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags() {
        assert!(is_valid_tag("2.1.0-0123456789ab"));
        assert!(is_valid_tag("latest"));
        assert!(is_valid_tag("_v1"));
        assert!(!is_valid_tag("1.0.0+build.1"));
        assert!(!is_valid_tag(".hidden"));
        assert!(!is_valid_tag("-rc"));
        assert!(!is_valid_tag(""));
        assert!(!is_valid_tag(&"a".repeat(129)));
    }

    #[test]
    fn path_components() {
        assert!(is_valid_path_component("service-3"));
        assert!(is_valid_path_component("my_api.v2"));
        assert!(is_valid_path_component("a__b"));
        assert!(!is_valid_path_component("Api"));
        assert!(!is_valid_path_component("api-"));
        assert!(!is_valid_path_component("a___b"));
        assert!(!is_valid_path_component("my api"));
        assert!(!is_valid_path_component(""));
    }
}
