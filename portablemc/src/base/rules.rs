//! Evaluation of the allow/disallow rules that gate libraries and argument
//! fragments on the host platform and on the selected feature set.

use std::collections::HashSet;

use super::serde::{Rule, RuleAction, OsPredicate};


/// Evaluate an ordered rule list: starting from a disallowed default, the action of
/// the last rule whose predicates all match becomes the verdict.
pub(crate) fn allowed(rules: &[Rule], features: &HashSet<String>) -> bool {

    let mut verdict = false;

    for rule in rules {
        if let Some(action) = applies(rule, features) {
            verdict = action == RuleAction::Allow;
        }
    }

    verdict

}

/// Return the action of a rule when all of its predicates match, none otherwise.
fn applies(rule: &Rule, features: &HashSet<String>) -> Option<RuleAction> {

    if !host_matches(&rule.os) {
        return None;
    }

    let features_match = rule.features.iter()
        .all(|(name, expected)| features.contains(name) == *expected);

    features_match.then_some(rule.action)

}

/// Check the OS predicate against the host facts, an absent field (on either side)
/// always matches.
fn host_matches(predicate: &OsPredicate) -> bool {

    if let (Some(expected), Some(name)) = (&predicate.name, host::name()) {
        if expected != name {
            return false;
        }
    }

    if let (Some(expected), Some(arch)) = (&predicate.arch, host::arch()) {
        if expected != arch {
            return false;
        }
    }

    if let (Some(pattern), Some(version)) = (&predicate.version, host::version()) {
        if !pattern.is_match(version) {
            return false;
        }
    }

    true

}

/// Host platform facts, in the naming convention of the rules.
pub(crate) mod host {

    use std::sync::LazyLock;
    use std::env::consts;

    /// The host OS under its rule name, none when the rules don't know this OS.
    /// Resolved at compile time from the build target.
    pub(crate) fn name() -> Option<&'static str> {
        match consts::OS {
            "linux" => Some("linux"),
            "macos" => Some("osx"),
            "windows" => Some("windows"),
            "freebsd" | "openbsd" | "netbsd" => Some(consts::OS),
            _ => None,
        }
    }

    /// The host architecture under its rule name.
    pub(crate) fn arch() -> Option<&'static str> {
        match consts::ARCH {
            "x86" => Some("x86"),
            "x86_64" => Some("x86_64"),
            "arm" => Some("arm32"),
            "aarch64" => Some("arm64"),
            _ => None,
        }
    }

    /// The architecture bit-ness, substituted for `${arch}` in native classifier
    /// templates.
    pub(crate) fn bits() -> Option<&'static str> {
        match consts::ARCH {
            "x86" | "arm" => Some("32"),
            "x86_64" | "aarch64" => Some("64"),
            _ => None,
        }
    }

    /// The host OS version string, probed once.
    pub(crate) fn version() -> Option<&'static str> {

        static VERSION: LazyLock<Option<String>> = LazyLock::new(|| {
            match os_info::get().version() {
                os_info::Version::Unknown => None,
                version => Some(version.to_string()),
            }
        });

        VERSION.as_deref()

    }

}

#[cfg(test)]
mod tests {

    use std::collections::HashSet;

    use super::super::serde::Rule;
    use super::allowed;

    fn rules(json: &str) -> Vec<Rule> {
        serde_json::from_str(json).unwrap()
    }

    fn features(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_is_disallow() {
        assert!(!allowed(&rules("[]"), &features(&[])));
        assert!(allowed(&rules(r#"[{"action": "allow"}]"#), &features(&[])));
    }

    #[test]
    fn last_matching_rule_wins() {

        let both = rules(r#"[
            {"action": "allow"},
            {"action": "disallow"}
        ]"#);
        assert!(!allowed(&both, &features(&[])));

        let gated_disallow = rules(r#"[
            {"action": "allow"},
            {"action": "disallow", "os": {"name": "not-a-real-os"}}
        ]"#);
        assert!(allowed(&gated_disallow, &features(&[])));

    }

    #[test]
    fn feature_predicates() {

        let wants_demo = rules(r#"[{"action": "allow", "features": {"is_demo_user": true}}]"#);
        assert!(!allowed(&wants_demo, &features(&[])));
        assert!(allowed(&wants_demo, &features(&["is_demo_user"])));

        let wants_no_demo = rules(r#"[{"action": "allow", "features": {"is_demo_user": false}}]"#);
        assert!(allowed(&wants_no_demo, &features(&[])));
        assert!(!allowed(&wants_no_demo, &features(&["is_demo_user"])));

        // Every named feature must match for the rule to apply.
        let wants_both = rules(r#"[{"action": "allow", "features": {
            "is_demo_user": true,
            "has_custom_resolution": true
        }}]"#);
        assert!(!allowed(&wants_both, &features(&["is_demo_user"])));
        assert!(allowed(&wants_both, &features(&["is_demo_user", "has_custom_resolution"])));

    }

    #[test]
    fn unmatched_os_falls_back_to_default() {
        let foreign = rules(r#"[{"action": "allow", "os": {"name": "not-a-real-os"}}]"#);
        assert!(!allowed(&foreign, &features(&[])));
    }

}
