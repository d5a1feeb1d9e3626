//! Fixtures shared by the unit tests: descriptor sets built in code and a
//! scripted in-memory fetcher.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet, FileOptions,
};

use crate::error::StencilError;
use crate::transport::{FetchOptions, FetchResponse, Fetcher};

fn field(name: &str, number: i32, ty: Type, type_name: Option<&str>) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(Into::into),
        json_name: Some(name.into()),
        ..Default::default()
    }
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.into()),
        field: fields,
        ..Default::default()
    }
}

fn timestamp_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("google/protobuf/timestamp.proto".into()),
        package: Some("google.protobuf".into()),
        message_type: vec![message(
            "Timestamp",
            vec![
                field("seconds", 1, Type::Int64, None),
                field("nanos", 2, Type::Int32, None),
            ],
        )],
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

/// `test.proto`: `One { data }`, `Two { Three { data, timestamp } }`, plus
/// one extra top-level message per entry in `extra`.
fn test_file(java_package: Option<&str>, extra: &[&str]) -> FileDescriptorProto {
    test_file_with_one(java_package, extra, &[])
}

fn test_file_with_one(
    java_package: Option<&str>,
    extra: &[&str],
    one_extra: &[(&str, i32)],
) -> FileDescriptorProto {
    let mut two = message("Two", vec![]);
    two.nested_type.push(message(
        "Three",
        vec![
            field("data", 1, Type::String, None),
            field("timestamp", 3, Type::Message, Some(".google.protobuf.Timestamp")),
        ],
    ));
    let mut one_fields = vec![field("data", 1, Type::String, None)];
    one_fields.extend(
        one_extra
            .iter()
            .map(|(name, number)| field(name, *number, Type::Int64, None)),
    );
    let mut messages = vec![message("One", one_fields), two];
    messages.extend(
        extra
            .iter()
            .map(|name| message(name, vec![field("id", 1, Type::Int64, None)])),
    );
    FileDescriptorProto {
        name: Some("test.proto".into()),
        package: Some("test".into()),
        dependency: vec!["google/protobuf/timestamp.proto".into()],
        message_type: messages,
        options: java_package.map(|p| FileOptions {
            java_package: Some(p.into()),
            ..Default::default()
        }),
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

fn encode(files: Vec<FileDescriptorProto>) -> Vec<u8> {
    FileDescriptorSet { file: files }.encode_to_vec()
}

/// The fixture set; without imports it references a type it does not carry.
pub fn descriptor_set(include_imports: bool) -> Vec<u8> {
    let mut files = Vec::new();
    if include_imports {
        files.push(timestamp_file());
    }
    files.push(test_file(None, &[]));
    encode(files)
}

pub fn descriptor_set_with_java_package(java_package: &str) -> Vec<u8> {
    encode(vec![timestamp_file(), test_file(Some(java_package), &[])])
}

/// The fixture set with additional `test.<name>` messages.
pub fn descriptor_set_with(extra: &[&str]) -> Vec<u8> {
    encode(vec![timestamp_file(), test_file(None, extra)])
}

/// The fixture set with additional int64 fields on `test.One`.
pub fn descriptor_set_with_one_fields(fields: &[(&str, i32)]) -> Vec<u8> {
    encode(vec![timestamp_file(), test_file_with_one(None, &[], fields)])
}

/// Serves scripted responses per URL and records every request.
///
/// Queued responses are served in order; the last one repeats once the queue
/// is down to a single entry. An unknown URL answers 404.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, VecDeque<Result<FetchResponse, String>>>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, body: impl Into<bytes::Bytes>) -> &Self {
        self.push(url, Ok(FetchResponse::new(status, body)))
    }

    pub fn fail(&self, url: &str, message: &str) -> &Self {
        self.push(url, Err(message.to_string()))
    }

    fn push(&self, url: &str, entry: Result<FetchResponse, String>) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(entry);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        _options: &FetchOptions,
    ) -> Result<FetchResponse, StencilError> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut routes = self.routes.lock().unwrap();
        let entry = match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match entry {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(StencilError::Http(msg)),
            None => Ok(FetchResponse::new(404, "not found")),
        }
    }
}
