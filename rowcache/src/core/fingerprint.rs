//! Fingerprint derivation for cache keys
//!
//! Every structural element is folded into a running accumulator with
//! `hash = hash * 397 ^ component`. Text is hashed character by character
//! (FNV-1a over code points) and the final accumulator goes through a
//! 64-bit avalanche so keys that differ late in the walk still spread
//! across the whole key space.
//!
//! Keys are deterministic within a process. They are not a security
//! boundary and are not guaranteed stable across releases.

use super::error::{CacheError, Result};
use super::expression::{ConstantValue, Expression};
use super::types::{FingerprintKey, ResultShapeKind};
use tracing::debug;

const SEED: u64 = 5381;
const FACTOR: u64 = 397;
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Marker mixed in before the optional selector so `(f, None)` and
/// `(f, Some(s))` never share a prefix walk
const SELECTOR_MARKER: u64 = 0x5E1E_C702;

/// Derives fingerprint keys for one cache signature
#[derive(Debug, Clone, Copy)]
pub struct KeyDeriver {
    include_literal_values: bool,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self {
            include_literal_values: true,
        }
    }
}

impl KeyDeriver {
    /// Create a deriver.
    ///
    /// With `include_literal_values` off, constructed values (date literals
    /// and the like) contribute only their type name.
    pub fn new(include_literal_values: bool) -> Self {
        Self {
            include_literal_values,
        }
    }

    pub fn include_literal_values(&self) -> bool {
        self.include_literal_values
    }

    /// Key for a fetch issued from SQL or stored-procedure text
    pub fn derive_query_key(
        &self,
        shape_kind: ResultShapeKind,
        query_text: &str,
        parameters: Option<&serde_json::Value>,
    ) -> Result<FingerprintKey> {
        let mut hasher = Fingerprinter::new(self.include_literal_values);
        hasher.mix(shape_kind.code());
        hasher.mix_str(query_text);
        hasher.mix_parameters(parameters)?;
        let key = hasher.finish();
        debug!("Derived query key {} for kind={:?}", key, shape_kind);
        Ok(key)
    }

    /// Key for a fetch issued from a filter and optional selector expression
    pub fn derive_expression_key(
        &self,
        shape_kind: ResultShapeKind,
        filter: &Expression,
        selector: Option<&Expression>,
        parameters: Option<&serde_json::Value>,
    ) -> Result<FingerprintKey> {
        let mut hasher = Fingerprinter::new(self.include_literal_values);
        hasher.mix(shape_kind.code());
        hasher.mix_expression(filter)?;
        if let Some(selector) = selector {
            hasher.mix(SELECTOR_MARKER);
            hasher.mix_expression(selector)?;
        }
        hasher.mix_parameters(parameters)?;
        let key = hasher.finish();
        debug!("Derived expression key {} for kind={:?}", key, shape_kind);
        Ok(key)
    }
}

/// Running accumulator used by [`KeyDeriver`]
struct Fingerprinter {
    hash: u64,
    include_literal_values: bool,
}

impl Fingerprinter {
    fn new(include_literal_values: bool) -> Self {
        Self {
            hash: SEED,
            include_literal_values,
        }
    }

    fn mix(&mut self, component: u64) {
        self.hash = self.hash.wrapping_mul(FACTOR) ^ component;
    }

    fn mix_str(&mut self, text: &str) {
        let mut rolling = FNV_OFFSET;
        let mut length = 0u64;
        for ch in text.chars() {
            rolling ^= u64::from(u32::from(ch));
            rolling = rolling.wrapping_mul(FNV_PRIME);
            length += 1;
        }
        self.mix(length);
        self.mix(rolling);
    }

    fn mix_parameters(&mut self, parameters: Option<&serde_json::Value>) -> Result<()> {
        let Some(parameters) = parameters else {
            return Ok(());
        };
        // serde_json keeps object keys sorted, so the compact form is canonical
        let compact = serde_json::to_string(parameters)
            .map_err(|e| CacheError::Serialization(format!("Failed to serialize parameters: {}", e)))?;
        self.mix_str(&compact);
        Ok(())
    }

    fn mix_constant(&mut self, value: &ConstantValue) {
        match value {
            ConstantValue::Null => self.mix(0),
            ConstantValue::Bool(b) => self.mix(u64::from(*b) + 1),
            ConstantValue::Int(i) => self.mix(*i as u64),
            ConstantValue::Float(f) => self.mix(f.to_bits()),
            ConstantValue::Text(s) => self.mix_str(s),
            ConstantValue::Timestamp(ts) => {
                self.mix(ts.timestamp() as u64);
                self.mix(u64::from(ts.timestamp_subsec_nanos()));
            }
        }
        self.mix_str(value.type_name());
    }

    fn mix_expression(&mut self, expression: &Expression) -> Result<()> {
        self.mix(expression.kind_code());

        match expression {
            Expression::Unary { operand, .. } => self.mix_expression(operand),
            Expression::Binary { left, right, .. } => {
                self.mix_expression(left)?;
                self.mix_expression(right)
            }
            Expression::Constant(value) => {
                self.mix_constant(value);
                Ok(())
            }
            Expression::MemberAccess { member, target } => {
                self.mix_str(member);
                match target {
                    Some(target) => self.mix_expression(target),
                    None => Ok(()),
                }
            }
            Expression::Call {
                method,
                target,
                arguments,
            } => {
                self.mix_str(method);
                if let Some(target) = target {
                    self.mix_expression(target)?;
                }
                self.mix(arguments.len() as u64);
                for argument in arguments {
                    self.mix_expression(argument)?;
                }
                Ok(())
            }
            Expression::Lambda { body, parameters } => {
                self.mix_expression(body)?;
                for name in parameters {
                    self.mix_str(name);
                }
                Ok(())
            }
            Expression::Parameter { name } => {
                self.mix_str(name);
                Ok(())
            }
            Expression::Construct {
                type_name,
                arguments,
                value,
            } => {
                match value {
                    Some(value) if self.include_literal_values => self.mix_constant(value),
                    _ => self.mix_str(type_name),
                }
                // Without a folded value the arguments are the only discriminator
                if value.is_none() || !self.include_literal_values {
                    for argument in arguments {
                        self.mix_expression(argument)?;
                    }
                }
                Ok(())
            }
            Expression::Extension { kind } => Err(CacheError::UnsupportedExpression(kind.clone())),
        }
    }

    fn finish(&self) -> FingerprintKey {
        // splitmix64 finalizer
        let mut z = self.hash;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        FingerprintKey::new(z as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expression::BinaryOp;
    use chrono::TimeZone;
    use serde_json::json;

    fn id_equals(value: i64) -> Expression {
        Expression::lambda(
            Expression::binary(
                BinaryOp::Equal,
                Expression::member(Expression::parameter("p"), "Id"),
                Expression::constant(ConstantValue::Int(value)),
            ),
            &["p"],
        )
    }

    fn created_after(year: i32, include_args: bool) -> Expression {
        let date = chrono::Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap();
        let arguments = if include_args {
            vec![Expression::constant(ConstantValue::Int(i64::from(year)))]
        } else {
            Vec::new()
        };
        Expression::binary(
            BinaryOp::GreaterThan,
            Expression::member(Expression::parameter("p"), "CreatedAt"),
            Expression::Construct {
                type_name: "DateTime".to_string(),
                arguments,
                value: Some(ConstantValue::Timestamp(date)),
            },
        )
    }

    #[test]
    fn test_query_key_is_deterministic() {
        let deriver = KeyDeriver::default();
        let params = json!({"id": 42, "name": "alice"});
        let a = deriver
            .derive_query_key(ResultShapeKind::FetchListByQuery, "SELECT * FROM T", Some(&params))
            .unwrap();
        let b = deriver
            .derive_query_key(ResultShapeKind::FetchListByQuery, "SELECT * FROM T", Some(&params))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_key_discriminates_every_input() {
        let deriver = KeyDeriver::default();
        let params = json!({"id": 1});
        let base = deriver
            .derive_query_key(ResultShapeKind::FetchListByQuery, "SELECT * FROM T", Some(&params))
            .unwrap();

        let other_kind = deriver
            .derive_query_key(ResultShapeKind::FetchOneByQuery, "SELECT * FROM T", Some(&params))
            .unwrap();
        let other_text = deriver
            .derive_query_key(ResultShapeKind::FetchListByQuery, "SELECT * FROM U", Some(&params))
            .unwrap();
        let other_params = deriver
            .derive_query_key(
                ResultShapeKind::FetchListByQuery,
                "SELECT * FROM T",
                Some(&json!({"id": 2})),
            )
            .unwrap();
        let no_params = deriver
            .derive_query_key(ResultShapeKind::FetchListByQuery, "SELECT * FROM T", None)
            .unwrap();

        assert_ne!(base, other_kind);
        assert_ne!(base, other_text);
        assert_ne!(base, other_params);
        assert_ne!(base, no_params);
    }

    #[test]
    fn test_parameter_key_order_does_not_matter() {
        let deriver = KeyDeriver::default();
        let a: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(
            deriver
                .derive_query_key(ResultShapeKind::Execute, "proc_update", Some(&a))
                .unwrap(),
            deriver
                .derive_query_key(ResultShapeKind::Execute, "proc_update", Some(&b))
                .unwrap()
        );
    }

    #[test]
    fn test_expression_key_walks_constants() {
        let deriver = KeyDeriver::default();
        let one = deriver
            .derive_expression_key(ResultShapeKind::FetchOneByExpression, &id_equals(1), None, None)
            .unwrap();
        let one_again = deriver
            .derive_expression_key(ResultShapeKind::FetchOneByExpression, &id_equals(1), None, None)
            .unwrap();
        let two = deriver
            .derive_expression_key(ResultShapeKind::FetchOneByExpression, &id_equals(2), None, None)
            .unwrap();
        assert_eq!(one, one_again);
        assert_ne!(one, two);
    }

    #[test]
    fn test_selector_changes_key() {
        let deriver = KeyDeriver::default();
        let selector = Expression::lambda(
            Expression::member(Expression::parameter("p"), "Name"),
            &["p"],
        );
        let without = deriver
            .derive_expression_key(ResultShapeKind::FetchListByExpression, &id_equals(1), None, None)
            .unwrap();
        let with = deriver
            .derive_expression_key(
                ResultShapeKind::FetchListByExpression,
                &id_equals(1),
                Some(&selector),
                None,
            )
            .unwrap();
        assert_ne!(without, with);
    }

    #[test]
    fn test_literal_values_flag() {
        let with_values = KeyDeriver::new(true);
        let type_only = KeyDeriver::new(false);
        let kind = ResultShapeKind::FetchListByExpression;

        let a = with_values
            .derive_expression_key(kind, &created_after(2020, false), None, None)
            .unwrap();
        let b = with_values
            .derive_expression_key(kind, &created_after(2021, false), None, None)
            .unwrap();
        assert_ne!(a, b);

        let a = type_only
            .derive_expression_key(kind, &created_after(2020, false), None, None)
            .unwrap();
        let b = type_only
            .derive_expression_key(kind, &created_after(2021, false), None, None)
            .unwrap();
        assert_eq!(a, b);

        // Constructor arguments still discriminate when values are excluded
        let a = type_only
            .derive_expression_key(kind, &created_after(2020, true), None, None)
            .unwrap();
        let b = type_only
            .derive_expression_key(kind, &created_after(2021, true), None, None)
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unsupported_node_is_an_error() {
        let deriver = KeyDeriver::default();
        let filter = Expression::binary(
            BinaryOp::AndAlso,
            id_equals(1),
            Expression::Extension {
                kind: "FullTextMatch".to_string(),
            },
        );
        let err = deriver
            .derive_expression_key(ResultShapeKind::FetchListByExpression, &filter, None, None)
            .unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedExpression(kind) if kind == "FullTextMatch"));
    }

    #[test]
    fn test_text_split_points_differ() {
        let deriver = KeyDeriver::default();
        let call = |args: [&str; 2]| {
            Expression::call(
                None,
                "Concat",
                args.iter()
                    .map(|s| Expression::constant(ConstantValue::Text((*s).to_string())))
                    .collect(),
            )
        };
        let a = deriver
            .derive_expression_key(ResultShapeKind::FetchOneByExpression, &call(["ab", "c"]), None, None)
            .unwrap();
        let b = deriver
            .derive_expression_key(ResultShapeKind::FetchOneByExpression, &call(["a", "bc"]), None, None)
            .unwrap();
        assert_ne!(a, b);
    }
}
