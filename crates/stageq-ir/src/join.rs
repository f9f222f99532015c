//! Join specifications and join-key inference
//!
//! The executor and the text renderer both plan joins through
//! [`plan_join`], so the rendered text always names the keys the executor
//! actually used.

use serde::{Deserialize, Serialize};

use crate::path::FieldPath;
use crate::schema::{RelationSchema, SchemaProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    /// Explicit cartesian product
    #[serde(alias = "cartesian")]
    Cross,
}

impl JoinKind {
    pub fn sql_keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Cross => "CROSS",
        }
    }
}

/// Fully planned join between two relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub left_relation: String,
    pub left_key: Option<FieldPath>,
    pub right_relation: String,
    pub right_key: Option<FieldPath>,
    pub kind: JoinKind,
}

impl JoinSpec {
    /// No usable key pair: every left row pairs with every right row.
    pub fn is_cartesian(&self) -> bool {
        self.kind == JoinKind::Cross || self.left_key.is_none() || self.right_key.is_none()
    }
}

/// Where a planned join's keys came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOrigin {
    /// User-authored keys
    Explicit,
    /// Keys guessed from the `<relation>_id` naming convention
    Inferred,
    /// Neither given nor inferable
    CartesianFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJoin {
    pub spec: JoinSpec,
    pub origin: JoinOrigin,
}

/// `orders` -> `order`, `categories` -> `category`.
pub fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    match name.strip_suffix('s') {
        Some(stem) if !stem.is_empty() && !stem.ends_with('s') => stem.to_string(),
        _ => name.to_string(),
    }
}

/// Foreign-key column on `other` pointing at `owner.id`, if any.
fn foreign_key_column(owner: &str, other: &RelationSchema) -> Option<String> {
    let candidates = [format!("{}_id", singularize(owner)), format!("{owner}_id")];
    candidates.into_iter().find(|c| other.has_column(c))
}

/// Guess `A.id = B.<a>_id` (or the symmetric form) from relation field sets.
pub fn infer_join_keys(left: &RelationSchema, right: &RelationSchema) -> Option<(FieldPath, FieldPath)> {
    if left.has_column("id") {
        if let Some(fk) = foreign_key_column(&left.name, right) {
            return Some((
                FieldPath::qualified(&left.name, "id"),
                FieldPath::qualified(&right.name, fk),
            ));
        }
    }
    if right.has_column("id") {
        if let Some(fk) = foreign_key_column(&right.name, left) {
            return Some((
                FieldPath::qualified(&left.name, fk),
                FieldPath::qualified(&right.name, "id"),
            ));
        }
    }
    None
}

/// Plan a join step between the current relation and `right_relation`.
///
/// Both keys given: explicit. Otherwise infer from the providers' field
/// sets, falling back to a cartesian product.
pub fn plan_join(
    current_relation: &str,
    right_relation: &str,
    left_key: Option<&FieldPath>,
    right_key: Option<&FieldPath>,
    kind: JoinKind,
    schemas: &dyn SchemaProvider,
) -> PlannedJoin {
    let explicit = match (left_key, right_key) {
        (Some(l), Some(r)) if kind != JoinKind::Cross => Some((l.clone(), r.clone())),
        _ => None,
    };
    if let Some((l, r)) = explicit {
        return PlannedJoin {
            spec: JoinSpec {
                left_relation: current_relation.to_string(),
                left_key: Some(l),
                right_relation: right_relation.to_string(),
                right_key: Some(r),
                kind,
            },
            origin: JoinOrigin::Explicit,
        };
    }

    let inferred = if kind == JoinKind::Cross {
        None
    } else {
        match (
            schemas.relation_schema(current_relation),
            schemas.relation_schema(right_relation),
        ) {
            (Some(left), Some(right)) => infer_join_keys(&left, &right),
            _ => None,
        }
    };

    let origin = match (&inferred, kind) {
        (_, JoinKind::Cross) => JoinOrigin::Explicit,
        (Some(_), _) => JoinOrigin::Inferred,
        (None, _) => JoinOrigin::CartesianFallback,
    };
    let (left_key, right_key) = match inferred {
        Some((l, r)) => (Some(l), Some(r)),
        None => (None, None),
    };

    PlannedJoin {
        spec: JoinSpec {
            left_relation: current_relation.to_string(),
            left_key,
            right_relation: right_relation.to_string(),
            right_key,
            kind,
        },
        origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchemaProvider;

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("orders"), "order");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("status"), "statu");
        assert_eq!(singularize("address"), "address");
        assert_eq!(singularize("staff"), "staff");
    }

    #[test]
    fn test_infer_forward() {
        let schemas = StaticSchemaProvider::new()
            .with_columns("users", &["id", "name"])
            .with_columns("orders", &["id", "user_id", "amount"]);
        let planned = plan_join("users", "orders", None, None, JoinKind::Inner, &schemas);

        assert_eq!(planned.origin, JoinOrigin::Inferred);
        assert_eq!(planned.spec.left_key.unwrap().to_string(), "users.id");
        assert_eq!(planned.spec.right_key.unwrap().to_string(), "orders.user_id");
    }

    #[test]
    fn test_infer_reverse() {
        let schemas = StaticSchemaProvider::new()
            .with_columns("orders", &["id", "user_id"])
            .with_columns("users", &["id", "name"]);
        let planned = plan_join("orders", "users", None, None, JoinKind::Left, &schemas);

        assert_eq!(planned.origin, JoinOrigin::Inferred);
        assert_eq!(planned.spec.left_key.unwrap().to_string(), "orders.user_id");
        assert_eq!(planned.spec.right_key.unwrap().to_string(), "users.id");
        assert_eq!(planned.spec.kind, JoinKind::Left);
    }

    #[test]
    fn test_unsingular_fk_name() {
        let schemas = StaticSchemaProvider::new()
            .with_columns("staff", &["id"])
            .with_columns("shifts", &["staff_id"]);
        let planned = plan_join("staff", "shifts", None, None, JoinKind::Inner, &schemas);
        assert_eq!(planned.spec.right_key.unwrap().to_string(), "shifts.staff_id");
    }

    #[test]
    fn test_fallback_cartesian() {
        let schemas = StaticSchemaProvider::new()
            .with_columns("a", &["x"])
            .with_columns("b", &["y"]);
        let planned = plan_join("a", "b", None, None, JoinKind::Inner, &schemas);
        assert_eq!(planned.origin, JoinOrigin::CartesianFallback);
        assert!(planned.spec.is_cartesian());
    }

    #[test]
    fn test_explicit_keys_win() {
        let schemas = StaticSchemaProvider::new();
        let l = FieldPath::parse("orders.user");
        let r = FieldPath::parse("users.id");
        let planned = plan_join("orders", "users", Some(&l), Some(&r), JoinKind::Inner, &schemas);
        assert_eq!(planned.origin, JoinOrigin::Explicit);
        assert!(!planned.spec.is_cartesian());
    }
}
