//! Dynamic descriptor registry.
//!
//! # Data Flow
//! ```text
//! raw FileDescriptorSet bytes
//!     → ServiceDescriptor::load (decode, resolve imports, build pool)
//!     → types.rs (register every file/message/enum globally, once)
//!     → binding.rs (gateway schema JSON → Vec<HttpBinding>)
//!     → routing::RouteTable + load_balancer::BalancerRegistry
//! ```
//!
//! # Design Decisions
//! - A `ServiceDescriptor` is immutable; re-registration replaces it wholesale
//! - Imports missing from a set are satisfied from files registered earlier
//! - Binding extraction is all-or-nothing

pub mod binding;
pub mod schema;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use dashmap::DashMap;
use prost::Message;
use prost_reflect::{DescriptorPool, FieldDescriptor, MessageDescriptor, MethodDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use thiserror::Error;

pub use binding::{extract_bindings, HttpBinding, SchemaError, StreamShape};
pub use schema::{GatewaySchema, RuleSpec};

/// Errors raised while loading a descriptor set.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("malformed file descriptor set: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("`{file}` imports `{import}`, which is neither in the set nor previously registered")]
    UnresolvedImport { file: String, import: String },

    #[error("invalid descriptor set: {0}")]
    Build(#[from] prost_reflect::DescriptorError),
}

/// An in-memory parse of one service's `FileDescriptorSet`.
#[derive(Debug)]
pub struct ServiceDescriptor {
    pool: DescriptorPool,
    raw: Bytes,
    services: Vec<String>,
    cache: DashMap<String, MessageDescriptor>,
}

impl ServiceDescriptor {
    /// Parse a serialized `FileDescriptorSet`.
    pub fn load(raw: impl Into<Bytes>) -> Result<Self, DescriptorError> {
        let raw = raw.into();
        let set = FileDescriptorSet::decode(raw.clone())?;
        let own_files: HashSet<String> = set.file.iter().map(|f| f.name().to_owned()).collect();

        let files = topological(resolve_imports(set.file)?);
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_protos(files)?;

        let new_types = types::global().register_pool(&pool);
        let services: Vec<String> = pool
            .services()
            .filter(|s| own_files.contains(s.parent_file().name()))
            .map(|s| s.full_name().to_owned())
            .collect();

        tracing::debug!(
            services = ?services,
            new_types,
            bytes = raw.len(),
            "Descriptor set loaded"
        );

        Ok(Self {
            pool,
            raw,
            services,
            cache: DashMap::new(),
        })
    }

    /// The bytes this descriptor was loaded from.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Fully-qualified names of the services declared by this set.
    pub fn service_names(&self) -> &[String] {
        &self.services
    }

    /// Every `/pkg.Service/Method` key this descriptor owns.
    pub fn method_keys(&self) -> Vec<String> {
        self.services
            .iter()
            .filter_map(|name| self.pool.get_service_by_name(name))
            .flat_map(|service| {
                service
                    .methods()
                    .map(|m| format!("/{}/{}", service.full_name(), m.name()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Find a method by service name (short or fully qualified) and method name.
    pub fn find_method(&self, service: &str, method: &str) -> Option<MethodDescriptor> {
        let service = service.trim_start_matches('.');
        self.services
            .iter()
            .filter_map(|name| self.pool.get_service_by_name(name))
            .find(|s| s.full_name() == service || s.name() == service)
            .and_then(|s| s.methods().find(|m| m.name() == method))
    }

    /// Resolve a message type by package and name.
    ///
    /// The first lookup of a name scans this descriptor and then the global
    /// registry; hits are cached by fully-qualified name.
    pub fn resolve_type(&self, pkg: &str, name: &str) -> Option<MessageDescriptor> {
        let name = name.trim_start_matches('.');
        let mut candidates = vec![qualify(pkg, name)];
        if candidates[0] != name {
            candidates.push(name.to_owned());
        }

        for full_name in candidates {
            if let Some(hit) = self.cache.get(&full_name) {
                return Some(hit.clone());
            }
            let found = self
                .pool
                .all_messages()
                .find(|m| m.full_name() == full_name)
                .or_else(|| types::global().message(&full_name));
            if let Some(found) = found {
                self.cache.insert(full_name, found.clone());
                return Some(found);
            }
        }
        None
    }
}

fn qualify(pkg: &str, name: &str) -> String {
    if pkg.is_empty() || name.starts_with(&format!("{pkg}.")) {
        name.to_owned()
    } else {
        format!("{pkg}.{name}")
    }
}

/// Look up a field by proto name, falling back to its JSON name.
pub fn lookup_field(message: &MessageDescriptor, name: &str) -> Option<FieldDescriptor> {
    message
        .get_field_by_name(name)
        .or_else(|| message.get_field_by_json_name(name))
}

/// Resolve a dotted field path such as `book.author.name`.
pub fn field_path(message: &MessageDescriptor, path: &str) -> Option<Vec<FieldDescriptor>> {
    let mut current = message.clone();
    let mut fields = Vec::new();
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let field = lookup_field(&current, segment)?;
        if segments.peek().is_some() {
            current = match field.kind() {
                prost_reflect::Kind::Message(m) if !field.is_list() && !field.is_map() => m,
                _ => return None,
            };
        }
        fields.push(field);
    }
    Some(fields)
}

/// Add files the set imports but does not contain, taken from the global registry.
fn resolve_imports(
    files: Vec<FileDescriptorProto>,
) -> Result<Vec<FileDescriptorProto>, DescriptorError> {
    let mut known: HashSet<String> = files.iter().map(|f| f.name().to_owned()).collect();
    let mut pending: VecDeque<(String, String)> = files
        .iter()
        .flat_map(|f| f.dependency.iter().map(|d| (f.name().to_owned(), d.clone())))
        .collect();

    let mut resolved = files;
    while let Some((file, import)) = pending.pop_front() {
        if known.contains(&import) {
            continue;
        }
        let found = types::global()
            .file(&import)
            .ok_or_else(|| DescriptorError::UnresolvedImport {
                file,
                import: import.clone(),
            })?;
        pending.extend(found.dependency.iter().map(|d| (import.clone(), d.clone())));
        known.insert(import);
        resolved.push(found);
    }
    Ok(resolved)
}

/// Order files so that every file follows its dependencies.
fn topological(files: Vec<FileDescriptorProto>) -> Vec<FileDescriptorProto> {
    let mut by_name: HashMap<String, FileDescriptorProto> = files
        .into_iter()
        .map(|f| (f.name().to_owned(), f))
        .collect();
    let mut names: Vec<String> = by_name.keys().cloned().collect();
    names.sort();

    let mut ordered = Vec::with_capacity(by_name.len());
    let mut visited = HashSet::new();
    for name in names {
        visit(&name, &mut by_name, &mut visited, &mut ordered);
    }
    ordered
}

fn visit(
    name: &str,
    by_name: &mut HashMap<String, FileDescriptorProto>,
    visited: &mut HashSet<String>,
    ordered: &mut Vec<FileDescriptorProto>,
) {
    if !visited.insert(name.to_owned()) {
        return;
    }
    let Some(file) = by_name.remove(name) else {
        return;
    };
    for dep in &file.dependency {
        visit(dep, by_name, visited, ordered);
    }
    ordered.push(file);
}
