use std::fmt;

/// Catalog-safe identifier derived from a free-form service name.
///
/// Always matches `^[a-z0-9_]*$`. Construct it with [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentifier(String);

/// Lower-case, map `-` to `_`, and drop every character outside `[a-z0-9_]`.
///
/// Pure and idempotent. An all-stripped input yields an empty identifier;
/// rejecting it is left to the catalog layer.
pub fn normalize(raw: &str) -> ServiceIdentifier {
    let id = raw
        .chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_lowercase() })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    ServiceIdentifier(id)
}

impl ServiceIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `<id>_db`
    pub fn database_name(&self) -> String {
        format!("{}_db", self.0)
    }

    /// The role shares the identifier verbatim.
    pub fn role_name(&self) -> String {
        self.0.clone()
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("RedTail-Advisor", "redtail_advisor")]
    #[case("orion", "orion")]
    #[case("My Service 2", "myservice2")]
    #[case("a.b/c", "abc")]
    #[case("already_ok_9", "already_ok_9")]
    #[case("--", "__")]
    #[case("Ünïcode-Name", "ncode_name")]
    fn normalizes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize(raw).as_str(), expected);
    }

    #[test]
    fn all_stripped_is_empty() {
        assert!(normalize("!!! ???").is_empty());
        assert!(normalize("").is_empty());
    }

    #[test]
    fn derived_names() {
        let id = normalize("RedTail-Advisor");
        assert_eq!(id.database_name(), "redtail_advisor_db");
        assert_eq!(id.role_name(), "redtail_advisor");
        assert_eq!(id.to_string(), "redtail_advisor");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn output_is_catalog_safe(raw in any::<String>()) {
                let id = normalize(&raw);
                prop_assert!(id
                    .as_str()
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
            }

            #[test]
            fn idempotent(raw in any::<String>()) {
                let once = normalize(&raw);
                let twice = normalize(once.as_str());
                prop_assert_eq!(once, twice);
            }
        }
    }
}
