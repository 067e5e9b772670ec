//! Cache key derivation.

use serde_json::Value;

use crate::hash::hash_payload;
use crate::policy::CacheOptions;
use crate::store::SqlParam;

/// Build the cache key for a query invocation.
///
/// The hashed payload is the query text concatenated with the canonical JSON
/// serialization of its bind parameters (an empty parameter list serializes
/// as `[]`), so identical `(sql, params, hash, key_prefix)` always derive the
/// identical key. A literal key in the options is used verbatim, skipping
/// both prefix and hashing.
pub fn derive_key(sql: &str, params: &[SqlParam], options: &CacheOptions) -> String {
    if let Some(literal) = options.literal_key.as_ref() {
        return literal.clone();
    }
    let payload = format!("{sql}{}", serialize_params(params));
    format!(
        "{}{}",
        options.key_prefix,
        hash_payload(&payload, options.hash)
    )
}

fn serialize_params(params: &[SqlParam]) -> String {
    Value::Array(params.iter().map(SqlParam::to_json).collect()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;

    fn full_options() -> CacheOptions {
        CacheOptions {
            hash: HashKind::Full,
            ..CacheOptions::default()
        }
    }

    #[test]
    fn identical_inputs_derive_identical_keys() {
        let options = CacheOptions::default();
        let params = [SqlParam::from(7_i64), SqlParam::from("ada")];
        assert_eq!(
            derive_key("select * from users where id = $1 and name = $2", &params, &options),
            derive_key("select * from users where id = $1 and name = $2", &params, &options),
        );
    }

    #[test]
    fn empty_params_serialize_as_empty_array() {
        assert_eq!(
            derive_key("select 1+2", &[], &full_options()),
            "sql.select 1+2[]"
        );
    }

    #[test]
    fn params_change_the_key() {
        let options = CacheOptions::default();
        let with = derive_key("select * from t where id = $1", &[SqlParam::from(1_i64)], &options);
        let without = derive_key("select * from t where id = $1", &[SqlParam::from(2_i64)], &options);
        assert_ne!(with, without);
    }

    #[test]
    fn full_strategy_is_injective_for_distinct_pairs() {
        let options = full_options();
        let pairs: [(&str, Vec<SqlParam>); 4] = [
            ("select 1", vec![]),
            ("select 1 ", vec![]),
            ("select 1", vec![SqlParam::Null]),
            ("select $1", vec![SqlParam::from("1")]),
        ];
        let keys: Vec<String> = pairs
            .iter()
            .map(|(sql, params)| derive_key(sql, params, &options))
            .collect();
        for (i, left) in keys.iter().enumerate() {
            for right in keys.iter().skip(i + 1) {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn prefix_namespaces_the_key() {
        let options = CacheOptions {
            key_prefix: "reports.".to_string(),
            hash: HashKind::Full,
            ..CacheOptions::default()
        };
        assert_eq!(derive_key("select 1", &[], &options), "reports.select 1[]");
    }

    #[test]
    fn literal_key_bypasses_prefix_and_hashing() {
        let options = CacheOptions {
            literal_key: Some("session:42".to_string()),
            ..CacheOptions::default()
        };
        assert_eq!(
            derive_key("select * from sessions where id = $1", &[SqlParam::from(42_i64)], &options),
            "session:42"
        );
    }

    #[test]
    fn param_values_serialize_canonically() {
        let params = [
            SqlParam::Null,
            SqlParam::from(true),
            SqlParam::from(3_i64),
            SqlParam::from("x"),
        ];
        assert_eq!(
            derive_key("q", &params, &full_options()),
            "sql.q[null,true,3,\"x\"]"
        );
    }
}
