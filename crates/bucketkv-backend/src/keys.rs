//! Mapping between storage keys and logical configuration keys.
//!
//! A storage key is `root_path + logical_key + ".json"` by convention.
//! Mapping back is a permissive string transform:
//! - strip the first `.json`, wherever it occurs
//! - then strip the first occurrence of the root path, wherever it occurs
//!
//! Neither part has to be present. The order matters: a root path that
//! itself contains `.json` is only stripped if it survives the suffix step.

/// Suffix used for stored configuration objects.
pub const JSON_SUFFIX: &str = ".json";

/// Map a storage key to its logical key.
///
/// # Examples
///
/// ```
/// use bucketkv_backend::keys::to_logical;
///
/// assert_eq!(to_logical("cfg/service/db.json", "cfg/"), "service/db");
/// assert_eq!(to_logical("service/db.json", "cfg/"), "service/db");
/// assert_eq!(to_logical("cfg/service/db", "cfg/"), "service/db");
/// ```
pub fn to_logical(storage_key: &str, root_path: &str) -> String {
    let key = storage_key.replacen(JSON_SUFFIX, "", 1);
    if root_path.is_empty() {
        return key;
    }
    key.replacen(root_path, "", 1)
}

/// Map a logical key to the storage key it is stored under by convention.
pub fn to_storage(logical_key: &str, root_path: &str) -> String {
    format!("{root_path}{logical_key}{JSON_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_root_and_suffix() {
        assert_eq!(to_logical("cfg/a.json", "cfg/"), "a");
        assert_eq!(to_logical("cfg/service/db/host.json", "cfg/"), "service/db/host");
    }

    #[test]
    fn missing_parts_pass_through() {
        assert_eq!(to_logical("a.json", "cfg/"), "a");
        assert_eq!(to_logical("cfg/a", "cfg/"), "a");
        assert_eq!(to_logical("other/a", "cfg/"), "other/a");
    }

    #[test]
    fn only_first_occurrences_are_stripped() {
        assert_eq!(to_logical("a.json.json", ""), "a.json");
        assert_eq!(to_logical("cfg/cfg/a.json", "cfg/"), "cfg/a");
    }

    #[test]
    fn root_is_stripped_wherever_it_first_occurs() {
        assert_eq!(to_logical("x/cfg/a.json", "cfg/"), "x/a");
    }

    #[test]
    fn suffix_is_stripped_before_root() {
        // The suffix step consumes the ".json" inside the root path, so the
        // root no longer matches.
        assert_eq!(to_logical("a.json/b.json", "a.json/"), "a/b.json");
    }

    #[test]
    fn empty_root_strips_only_suffix() {
        assert_eq!(to_logical("cfg/a.json", ""), "cfg/a");
    }

    #[test]
    fn to_storage_builds_convention() {
        assert_eq!(to_storage("service/db", "cfg/"), "cfg/service/db.json");
        assert_eq!(to_storage("a", ""), "a.json");
    }

    proptest! {
        #[test]
        fn suffixed_key_maps_back(key in "[a-z0-9_/-]{0,24}", root in "[a-z]{1,8}/") {
            prop_assume!(!key.contains(&root));
            prop_assert_eq!(to_logical(&format!("{key}.json"), &root), key);
        }

        #[test]
        fn storage_key_maps_back(key in "[a-z0-9_/-]{0,24}", root in "[a-z]{1,8}/") {
            prop_assert_eq!(to_logical(&to_storage(&key, &root), &root), key);
        }
    }
}
