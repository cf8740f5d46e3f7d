use serde_json::Value;
use std::collections::BTreeMap;

/// Tags stamped on every resource the tool manages.
///
/// `Name` falls back to the stack name when no resource-specific name is
/// given, which keeps console listings readable.
pub fn common_tags(
    stack_name: &str,
    git_repository_url: &str,
    name: Option<&str>,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("git-repository-url".to_string(), git_repository_url.to_string());
    tags.insert("managed-by".to_string(), "orgctl".to_string());
    tags.insert("stack-name".to_string(), stack_name.to_string());
    tags.insert(
        "Name".to_string(),
        name.unwrap_or(stack_name).to_string(),
    );
    tags
}

/// Common tags as a JSON input value.
pub fn tags_value(stack_name: &str, git_repository_url: &str, name: Option<&str>) -> Value {
    let tags = common_tags(stack_name, git_repository_url, name);
    Value::Object(
        tags.into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_tags_keys() {
        let tags = common_tags("prod", "https://github.com/ejfine/aws-organization", None);
        assert_eq!(tags["managed-by"], "orgctl");
        assert_eq!(tags["stack-name"], "prod");
        assert_eq!(tags["Name"], "prod");
        assert_eq!(
            tags["git-repository-url"],
            "https://github.com/ejfine/aws-organization"
        );
    }

    #[test]
    fn test_explicit_name_overrides_stack_fallback() {
        let tags = common_tags("prod", "https://example.com/repo", Some("central-infra-state"));
        assert_eq!(tags["Name"], "central-infra-state");
        assert_eq!(tags["stack-name"], "prod");
    }
}
