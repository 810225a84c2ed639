//! Placeholder scanning and substitution for macro templates
//!
//! Templates are jump codes with `${name}` placeholders:
//!
//! ```text
//! "@create_agent:role=${role},goal=${goal}"
//!        │ expand(role=dev, goal=ship it)
//!        ▼
//! "@create_agent:role=dev,goal=ship it"
//! ```
//!
//! Placeholders without a value are left verbatim.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use jump_types::Params;
use regex::{Captures, Regex};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").expect("placeholder pattern compiles"));

/// Union of placeholder names across all templates, sorted
pub fn infer_parameters<S: AsRef<str>>(templates: &[S]) -> Vec<String> {
    let names: BTreeSet<String> = templates
        .iter()
        .flat_map(|t| {
            PLACEHOLDER_RE
                .captures_iter(t.as_ref())
                .map(|c| c[1].to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    names.into_iter().collect()
}

/// Replace every `${k}` whose key is in `values`
pub fn substitute(template: &str, values: &Params) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| match values.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Declared parameters absent from `values`, in declared order
pub fn missing_parameters(declared: &[String], values: &Params) -> Vec<String> {
    declared
        .iter()
        .filter(|p| !values.contains_key(p))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_infer_parameters_union() {
        let templates = [
            "@create_agent:role=${role},goal=${goal}",
            "@assign:agent=${role},task=${task}",
            "@status",
        ];
        assert_eq!(infer_parameters(&templates), vec!["goal", "role", "task"]);
    }

    #[test]
    fn test_substitute_leaves_unknown_placeholders() {
        let values = Params::new().with("r", "dev").with("n", 3i64);
        assert_eq!(
            substitute("@x:role=${r},count=${n},other=${zzz}", &values),
            "@x:role=dev,count=3,other=${zzz}"
        );
    }

    #[test]
    fn test_substitute_repeated_placeholder() {
        let values = Params::new().with("a", "q");
        assert_eq!(substitute("${a}-${a}", &values), "q-q");
    }

    #[test]
    fn test_missing_parameters() {
        let declared = vec!["r".to_string(), "g".to_string()];
        let values = Params::new().with("g", "x");
        assert_eq!(missing_parameters(&declared, &values), vec!["r"]);
    }
}
