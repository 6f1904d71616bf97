//! key path helpers

/// true if the string contains template delimiters
pub(crate) fn has_template(source: &str) -> bool {
    source.contains("{{") || source.contains("{%")
}

/// `vars` + `stage` -> `vars.stage`
pub(crate) fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// `list` + 2 -> `list[2]`
pub(crate) fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

/// Parent of a key path, `None` for a root key
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    let cut = path.rfind(['.', '['])?;
    Some(&path[..cut])
}

/// true if `path` is `ancestor` or below it
pub(crate) fn is_below(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }

    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
}

/// `vars.stage` -> `vars`
pub(crate) fn root_name(chain: &str) -> &str {
    chain.split_once('.').map_or(chain, |(root, _)| root)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn roots_of_access_chains() {
        assert_eq!(root_name("vars.stage"), "vars");
        assert_eq!(root_name("locals"), "locals");
        assert!(has_template("{% if x %}"));
        assert!(!has_template("{ not: a template }"));
    }

    #[test]
    fn paths() {
        assert_eq!(child_path("", "vars"), "vars");
        assert_eq!(child_path("vars", "x"), "vars.x");
        assert_eq!(index_path("list", 1), "list[1]");
        assert_eq!(parent_path("vars.list[1]"), Some("vars.list"));
        assert_eq!(parent_path("vars"), None);
        assert!(is_below("vars.x", "vars"));
        assert!(!is_below("variables", "vars"));
        assert!(is_below("vars", ""));
    }
}
