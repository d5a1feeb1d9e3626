//! Decoded, queryable form of a descriptor set.

use std::collections::{BTreeMap, HashMap};

use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use serde::Serialize;

use crate::error::StencilError;

/// An immutable index of the message types in one descriptor set.
///
/// A refresh builds a new tree; an existing tree is never modified, so a
/// lookup holding an `Arc<TypeTree>` is unaffected by later refreshes.
#[derive(Clone)]
pub struct TypeTree {
    pool: DescriptorPool,
    /// lookup key → fully-qualified proto name
    keys: HashMap<String, String>,
}

impl TypeTree {
    /// Decode serialized `FileDescriptorSet` bytes and resolve every
    /// cross-file reference.
    pub fn decode(bytes: &[u8]) -> Result<Self, StencilError> {
        let set = prost_types::FileDescriptorSet::decode(bytes).map_err(|e| {
            StencilError::DecodeFailed(format!("invalid file descriptor set: {e}"))
        })?;
        let pool = DescriptorPool::from_file_descriptor_set(set)
            .map_err(|e| StencilError::SchemaInvalid(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    /// Index an already-built pool.
    pub fn from_pool(pool: DescriptorPool) -> Self {
        let mut keys = HashMap::new();
        for message in pool.all_messages() {
            let full_name = message.full_name().to_string();
            if let Some(class_name) = java_class_name(&message) {
                keys.entry(class_name).or_insert_with(|| full_name.clone());
            }
            keys.insert(full_name.clone(), full_name);
        }
        Self { pool, keys }
    }

    /// Look up a message type by fully-qualified proto name or Java class name.
    pub fn get_type(&self, name: &str) -> Result<MessageDescriptor, StencilError> {
        self.keys
            .get(name)
            .and_then(|full_name| self.pool.get_message_by_name(full_name))
            .ok_or_else(|| StencilError::TypeNotFound(name.to_string()))
    }

    /// Returns `true` if `name` resolves in this tree.
    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }

    /// Every lookup key, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.keys.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Decode a wire-format message of type `name`.
    pub fn parse(&self, name: &str, data: &[u8]) -> Result<DynamicMessage, StencilError> {
        let desc = self.get_type(name)?;
        DynamicMessage::decode(desc, data).map_err(|e| {
            StencilError::DecodeFailed(format!("cannot parse {name}: {e}"))
        })
    }

    /// Build a message of type `name` from the JSON form of `data` and encode
    /// it to wire format.
    pub fn serialize<T: Serialize + ?Sized>(
        &self,
        name: &str,
        data: &T,
    ) -> Result<Vec<u8>, StencilError> {
        let desc = self.get_type(name)?;
        let value = serde_json::to_value(data)?;
        let message = DynamicMessage::deserialize(desc, value).map_err(|e| {
            StencilError::DecodeFailed(format!("data does not match {name}: {e}"))
        })?;
        Ok(message.encode_to_vec())
    }

    /// Number of message types (not lookup keys).
    pub fn len(&self) -> usize {
        self.pool.all_messages().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

impl std::fmt::Debug for TypeTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let files: BTreeMap<_, _> = self
            .pool
            .files()
            .map(|file| (file.name().to_string(), file.package_name().to_string()))
            .collect();
        f.debug_struct("TypeTree")
            .field("files", &files)
            .field("keys", &self.keys.len())
            .finish()
    }
}

/// Class name a Java client would use: the proto package prefix swapped for
/// the file's `java_package`.
fn java_class_name(message: &MessageDescriptor) -> Option<String> {
    let file = message.parent_file();
    let java_package = file
        .file_descriptor_proto()
        .options
        .as_ref()
        .map(|o| o.java_package())
        .filter(|p| !p.is_empty())?;
    let full_name = message.full_name();
    let package = file.package_name();
    if package.is_empty() {
        return Some(format!("{java_package}.{full_name}"));
    }
    let rest = full_name.strip_prefix(package)?;
    Some(format!("{java_package}{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{descriptor_set, descriptor_set_with_java_package};

    #[test]
    fn resolves_nested_type() {
        let tree = TypeTree::decode(&descriptor_set(true)).unwrap();
        let three = tree.get_type("test.Two.Three").unwrap();
        let data = three.get_field_by_name("data").unwrap();
        assert_eq!(data.number(), 1);
        let ts = three.get_field_by_name("timestamp").unwrap();
        assert_eq!(ts.number(), 3);
        assert_eq!(
            ts.kind().as_message().unwrap().full_name(),
            "google.protobuf.Timestamp"
        );
    }

    #[test]
    fn missing_type_is_not_found() {
        let tree = TypeTree::decode(&descriptor_set(true)).unwrap();
        let err = tree.get_type("test.Two.Three.Five").unwrap_err();
        assert_eq!(err.to_string(), "no such type: test.Two.Three.Five");
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = TypeTree::decode(b"invalid").unwrap_err();
        assert!(matches!(err, StencilError::DecodeFailed(_)), "{err:?}");
    }

    #[test]
    fn missing_import_is_schema_invalid() {
        let err = TypeTree::decode(&descriptor_set(false)).unwrap_err();
        match err {
            StencilError::SchemaInvalid(msg) => assert!(!msg.is_empty()),
            other => panic!("expected SchemaInvalid, got {other:?}"),
        }
    }

    #[test]
    fn java_class_names_resolve_to_the_same_type() {
        let tree = TypeTree::decode(&descriptor_set_with_java_package("com.example.test")).unwrap();
        let by_proto = tree.get_type("test.One").unwrap();
        let by_java = tree.get_type("com.example.test.One").unwrap();
        assert_eq!(by_proto.full_name(), by_java.full_name());
        assert!(tree.contains("com.example.test.Two.Three"));
    }

    #[test]
    fn type_names_are_sorted_and_complete() {
        let tree = TypeTree::decode(&descriptor_set(true)).unwrap();
        let names = tree.type_names();
        assert_eq!(
            names,
            vec![
                "google.protobuf.Timestamp".to_string(),
                "test.One".to_string(),
                "test.Two".to_string(),
                "test.Two.Three".to_string(),
            ]
        );
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn serialize_then_parse() {
        let tree = TypeTree::decode(&descriptor_set(true)).unwrap();
        let bytes = tree
            .serialize("test.One", &serde_json::json!({ "data": "hello" }))
            .unwrap();
        let msg = tree.parse("test.One", &bytes).unwrap();
        let field = msg.get_field_by_name("data").unwrap();
        assert_eq!(field.as_str(), Some("hello"));
    }

    #[test]
    fn serialize_rejects_unknown_fields() {
        let tree = TypeTree::decode(&descriptor_set(true)).unwrap();
        let err = tree
            .serialize("test.One", &serde_json::json!({ "nope": 1 }))
            .unwrap_err();
        assert!(matches!(err, StencilError::DecodeFailed(_)), "{err:?}");
    }
}
