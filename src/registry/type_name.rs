//! Stable names for registered types.
//!
//! Logical message-type identifiers are derived from these names, so a
//! resolver must return the same string for the same type in every process.

use super::TypeDescriptor;

pub trait TypeNameResolver: Send + Sync {
    fn to_name(&self, descriptor: &TypeDescriptor) -> String;
}

/// Uses the message's declared name, falling back to the Rust type path.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustTypeNameResolver;

impl TypeNameResolver for RustTypeNameResolver {
    fn to_name(&self, descriptor: &TypeDescriptor) -> String {
        descriptor
            .message_name()
            .unwrap_or_else(|| descriptor.rust_name())
            .to_string()
    }
}

/// Drops module paths, keeping only the final segment of each path in the
/// name (`orders::OrderCreated` → `OrderCreated`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortTypeNameResolver;

impl TypeNameResolver for ShortTypeNameResolver {
    fn to_name(&self, descriptor: &TypeDescriptor) -> String {
        let full = RustTypeNameResolver.to_name(descriptor);
        let mut out = String::with_capacity(full.len());
        let mut segment = String::new();
        for c in full.chars() {
            match c {
                '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' => {
                    out.push_str(last_segment(&segment));
                    segment.clear();
                    out.push(c);
                }
                _ => segment.push(c),
            }
        }
        out.push_str(last_segment(&segment));
        out
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}
