//! Process-wide protobuf type registry.
//!
//! Every descriptor set loaded by the gateway contributes its files, messages
//! and enums here, so that services loaded later can import files shipped by
//! earlier ones and dynamic codecs can resolve cross-service type names.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::RwLock;
use prost_reflect::{DescriptorPool, EnumDescriptor, MessageDescriptor};
use prost_types::FileDescriptorProto;

static GLOBAL: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::new);

/// The registry shared by the whole process.
pub fn global() -> &'static TypeRegistry {
    &GLOBAL
}

/// A message or enum known to the registry.
#[derive(Debug, Clone)]
pub enum RegisteredType {
    Message(MessageDescriptor),
    Enum(EnumDescriptor),
}

impl RegisteredType {
    pub fn full_name(&self) -> &str {
        match self {
            RegisteredType::Message(m) => m.full_name(),
            RegisteredType::Enum(e) => e.full_name(),
        }
    }
}

/// Name-indexed store of types and the files that declared them.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, RegisteredType>>,
    files: RwLock<HashMap<String, FileDescriptorProto>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a type unless its full name is already known.
    ///
    /// Returns `true` when the type was new. Registering a known name again
    /// is a no-op.
    pub fn register_if_absent(&self, ty: RegisteredType) -> bool {
        let mut types = self.types.write();
        if types.contains_key(ty.full_name()) {
            return false;
        }
        types.insert(ty.full_name().to_owned(), ty);
        true
    }

    /// Register every file, message and enum of a pool. Returns how many types were new.
    pub fn register_pool(&self, pool: &DescriptorPool) -> usize {
        {
            let mut files = self.files.write();
            for file in pool.files() {
                files
                    .entry(file.name().to_owned())
                    .or_insert_with(|| file.file_descriptor_proto().clone());
            }
        }

        let messages = pool.all_messages().map(RegisteredType::Message);
        let enums = pool.all_enums().map(RegisteredType::Enum);
        messages
            .chain(enums)
            .filter(|ty| self.register_if_absent(ty.clone()))
            .count()
    }

    pub fn message(&self, full_name: &str) -> Option<MessageDescriptor> {
        match self.types.read().get(full_name.trim_start_matches('.')) {
            Some(RegisteredType::Message(m)) => Some(m.clone()),
            _ => None,
        }
    }

    pub fn enumeration(&self, full_name: &str) -> Option<EnumDescriptor> {
        match self.types.read().get(full_name.trim_start_matches('.')) {
            Some(RegisteredType::Enum(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// A previously registered file, used to satisfy imports.
    pub fn file(&self, name: &str) -> Option<FileDescriptorProto> {
        self.files.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
