//! RFC 6902 diffs between two versions of an object.

use json_patch::{Patch, PatchOperation, TestOperation};
use jsonptr::PointerBuf;
use kube::Resource;
use serde::Serialize;
use serde_json::Value;

/// Operations turning `original` into `modified`.
pub fn create_patch<T: Serialize>(original: &T, modified: &T) -> Result<Patch, serde_json::Error> {
    let original = serde_json::to_value(original)?;
    let modified = serde_json::to_value(modified)?;
    Ok(json_patch::diff(&original, &modified))
}

/// Like [`create_patch`], but the patch is rejected by the API server if the object
/// changed since `original` was read. `None` when there is nothing to change.
pub fn guarded_patch<K>(original: &K, modified: &K) -> Result<Option<Patch>, serde_json::Error>
where
    K: Resource + Serialize,
{
    let Patch(ops) = create_patch(original, modified)?;
    if ops.is_empty() {
        return Ok(None);
    }
    let mut guarded = Vec::with_capacity(ops.len() + 1);
    if let Some(rv) = original.meta().resource_version.as_deref() {
        guarded.push(PatchOperation::Test(TestOperation {
            path: PointerBuf::from_tokens(["metadata", "resourceVersion"]),
            value: Value::String(rv.to_string()),
        }));
    }
    guarded.extend(ops);
    Ok(Some(Patch(guarded)))
}
