use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Expression {
    pub key: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub values: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A Kubernetes label selector.
///
/// An empty selector matches everything.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_labels: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_expressions: Option<Expressions>,
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    /// Returns true when the selector has no requirements.
    pub fn is_empty(&self) -> bool {
        self.match_labels.as_ref().map_or(true, |m| m.is_empty())
            && self.match_expressions.as_ref().map_or(true, |e| e.is_empty())
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter().flatten() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        if let Some(match_labels) = self.match_labels.as_ref() {
            for (k, v) in match_labels.iter() {
                if labels.0.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
    }
}

/// Formats the selector in the API server's `labelSelector` query syntax.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut terms = Vec::new();
        for (k, v) in self.match_labels.iter().flatten() {
            terms.push(format!("{k}={v}"));
        }
        for Expression {
            key,
            operator,
            values,
        } in self.match_expressions.iter().flatten()
        {
            let values = values.iter().cloned().collect::<Vec<_>>().join(",");
            terms.push(match operator {
                Operator::In => format!("{key} in ({values})"),
                Operator::NotIn => format!("{key} notin ({values})"),
                Operator::Exists => key.clone(),
                Operator::DoesNotExist => format!("!{key}"),
            });
        }
        f.write_str(&terms.join(","))
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === Labels ===

impl Labels {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map_or(false, |v| self.values.contains(v)),
            Operator::NotIn => labels
                .get(&self.key)
                .map_or(true, |v| !self.values.contains(v)),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    fn expr(key: &str, operator: Operator, values: &[&str]) -> Expression {
        Expression {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::In, &["bar"]))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "expression match",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::NotIn, &["bar"]))),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "excluded value",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::NotIn, &["bar"]))),
                Labels::default(),
                true,
                "missing key is not in the excluded set",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::Exists, &[]))),
                Labels::from_iter(Some(("foo", "qux"))),
                true,
                "key exists",
            ),
            (
                Selector::from_iter(Some(expr("foo", Operator::DoesNotExist, &[]))),
                Labels::from_iter(Some(("foo", "qux"))),
                false,
                "key must not exist",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn formats_query() {
        let selector = Selector {
            match_labels: Some(Map::from_iter([("env".to_string(), "prod".to_string())])),
            match_expressions: Some(vec![
                expr("tier", Operator::In, &["a", "b"]),
                expr("legacy", Operator::DoesNotExist, &[]),
            ]),
        };
        assert_eq!(selector.to_string(), "env=prod,tier in (a,b),!legacy");
        assert!(Selector::default().is_empty());
        assert!(!selector.is_empty());
    }

    #[test]
    fn parses_label_selector_json() {
        let selector: Selector = serde_json::from_value(serde_json::json!({
            "matchExpressions": [{"key": "team", "operator": "Exists"}]
        }))
        .expect("selector must parse");
        assert!(selector.matches(&Labels::from_iter(Some(("team", "a")))));
        assert!(!selector.matches(&Labels::default()));
    }
}
