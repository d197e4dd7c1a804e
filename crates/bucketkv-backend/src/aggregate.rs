//! Read path: prefix listing, whole-object fetch, and tree merging.
//!
//! `get` lists every object under a prefix, decodes each body as a JSON
//! object and merges them into one tree keyed by logical key. A `null` body
//! is kept as a `null` entry. Under [`AggregationPolicy::Tolerant`] any other
//! body that is not a JSON object is skipped; fetch and listing failures
//! always abort.

use bucketkv_store::ObjectClient;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::AggregationPolicy;
use crate::error::{BackendError, BackendResult};
use crate::keys::to_logical;
use crate::types::KvPair;

/// Logical key -> decoded object.
pub type MergedTree = Map<String, Value>;

/// Read one object in full.
pub async fn fetch_value(client: &dyn ObjectClient, bucket: &str, key: &str) -> BackendResult<Bytes> {
    let reader = client.get_object(bucket, key).await?;
    Ok(reader.read_all().await?)
}

/// List every object under `prefix` (recursively) with its body.
///
/// The first listing or fetch error aborts the whole call.
pub async fn list_pairs(
    client: &dyn ObjectClient,
    bucket: &str,
    prefix: &str,
) -> BackendResult<Vec<KvPair>> {
    let mut objects = client.list_objects(bucket, prefix, true);
    let mut pairs = Vec::new();
    while let Some(info) = objects.next().await {
        let info = info?;
        if info.is_prefix {
            continue;
        }
        let value = fetch_value(client, bucket, &info.key).await?;
        pairs.push(KvPair::new(info.key, value));
    }
    debug!(bucket, prefix, count = pairs.len(), "listed pairs");
    Ok(pairs)
}

/// Merge pairs into one tree. Pairs are applied in order, so a later pair
/// whose key maps to the same logical key replaces the earlier one.
pub fn merge_pairs(
    pairs: &[KvPair],
    root_path: &str,
    policy: AggregationPolicy,
) -> BackendResult<MergedTree> {
    let mut tree = MergedTree::new();
    for pair in pairs {
        let value: Option<Map<String, Value>> = match serde_json::from_slice(&pair.value) {
            Ok(value) => value,
            Err(source) => match policy {
                AggregationPolicy::Tolerant => {
                    warn!(key = %pair.key, error = %source, "skipping object that is not a JSON object");
                    continue;
                }
                AggregationPolicy::Strict => {
                    return Err(BackendError::Decode {
                        key: pair.key.clone(),
                        source,
                    })
                }
            },
        };
        let value = value.map_or(Value::Null, Value::Object);
        tree.insert(to_logical(&pair.key, root_path), value);
    }
    Ok(tree)
}

/// Encode a merged tree as JSON.
pub fn encode_tree(tree: &MergedTree) -> BackendResult<Bytes> {
    serde_json::to_vec(tree)
        .map(Bytes::from)
        .map_err(BackendError::Serialization)
}

/// List, merge and encode everything under `prefix`.
pub async fn aggregate(
    client: &dyn ObjectClient,
    bucket: &str,
    root_path: &str,
    prefix: &str,
    policy: AggregationPolicy,
) -> BackendResult<Bytes> {
    let pairs = list_pairs(client, bucket, prefix).await?;
    let tree = merge_pairs(&pairs, root_path, policy)?;
    debug!(bucket, prefix, entries = tree.len(), "aggregated tree");
    encode_tree(&tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketkv_store::{InMemoryObjectClient, StoreError};
    use serde_json::json;

    const BUCKET: &str = "configs";

    fn pair(key: &str, body: &str) -> KvPair {
        KvPair::new(key, body.as_bytes().to_vec())
    }

    async fn seeded(objects: &[(&str, &str)]) -> InMemoryObjectClient {
        let client = InMemoryObjectClient::new();
        client.create_bucket(BUCKET);
        for (key, body) in objects {
            client
                .put_object(BUCKET, key, Bytes::from(body.to_string()))
                .await
                .unwrap();
        }
        client
    }

    // -----------------------------------------------------------------------
    // merge_pairs
    // -----------------------------------------------------------------------

    #[test]
    fn merges_by_logical_key() {
        let pairs = vec![pair("cfg/a.json", r#"{"x":1}"#), pair("cfg/b.json", r#"{"y":2}"#)];
        let tree = merge_pairs(&pairs, "cfg/", AggregationPolicy::Tolerant).unwrap();
        assert_eq!(
            Value::Object(tree),
            json!({"a": {"x": 1}, "b": {"y": 2}})
        );
    }

    #[test]
    fn later_pair_wins() {
        let pairs = vec![pair("cfg/a", r#"{"v":"first"}"#), pair("cfg/a.json", r#"{"v":"second"}"#)];
        let tree = merge_pairs(&pairs, "cfg/", AggregationPolicy::Tolerant).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree["a"], json!({"v": "second"}));
    }

    #[test]
    fn tolerant_skips_malformed_and_non_objects() {
        let pairs = vec![
            pair("cfg/bad.json", "{not json"),
            pair("cfg/list.json", "[1,2,3]"),
            pair("cfg/num.json", "42"),
            pair("cfg/ok.json", r#"{"k":true}"#),
        ];
        let tree = merge_pairs(&pairs, "cfg/", AggregationPolicy::Tolerant).unwrap();
        assert_eq!(Value::Object(tree), json!({"ok": {"k": true}}));
    }

    #[test]
    fn null_body_is_kept_as_null() {
        let pairs = vec![pair("cfg/gone.json", "null"), pair("cfg/ok.json", "{}")];
        for policy in [AggregationPolicy::Tolerant, AggregationPolicy::Strict] {
            let tree = merge_pairs(&pairs, "cfg/", policy).unwrap();
            assert_eq!(Value::Object(tree), json!({"gone": null, "ok": {}}));
        }
    }

    #[test]
    fn strict_reports_first_malformed_key() {
        let pairs = vec![pair("cfg/ok.json", "{}"), pair("cfg/bad.json", "nope")];
        match merge_pairs(&pairs, "cfg/", AggregationPolicy::Strict) {
            Err(BackendError::Decode { key, .. }) => assert_eq!(key, "cfg/bad.json"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn empty_tree_encodes_as_empty_object() {
        let bytes = encode_tree(&MergedTree::new()).unwrap();
        assert_eq!(&bytes[..], b"{}");
    }

    // -----------------------------------------------------------------------
    // list_pairs / aggregate
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn list_pairs_returns_raw_bodies_in_key_order() {
        let client = seeded(&[("cfg/b.json", "raw-b"), ("cfg/a.json", "raw-a"), ("x/c", "c")]).await;
        let pairs = list_pairs(&client, BUCKET, "cfg/").await.unwrap();
        assert_eq!(
            pairs,
            vec![pair("cfg/a.json", "raw-a"), pair("cfg/b.json", "raw-b")]
        );
    }

    #[tokio::test]
    async fn list_pairs_aborts_on_size_mismatch() {
        let client = seeded(&[("cfg/a.json", "{}")]).await;
        client
            .put_object_with_size(BUCKET, "cfg/b.json", Bytes::from_static(b"{}"), 10)
            .unwrap();
        let err = list_pairs(&client, BUCKET, "cfg/").await.unwrap_err();
        assert!(err.is_size_mismatch());
    }

    #[tokio::test]
    async fn list_pairs_propagates_listing_error() {
        let client = InMemoryObjectClient::new();
        let err = list_pairs(&client, "missing", "").await.unwrap_err();
        assert!(matches!(err, BackendError::Store(StoreError::NoSuchBucket(_))));
    }

    #[tokio::test]
    async fn aggregate_whole_bucket() {
        let client = seeded(&[("cfg/a.json", r#"{"x":1}"#), ("cfg/b.json", r#"{"y":2}"#)]).await;
        let bytes = aggregate(&client, BUCKET, "cfg/", "", AggregationPolicy::Tolerant)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"a": {"x": 1}, "b": {"y": 2}}));
    }
}
