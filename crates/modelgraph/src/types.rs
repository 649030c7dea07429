//! Runtime type descriptors.
//!
//! A [`TypeRef`] is the graph's stand-in for a backing application type: a
//! nominal descriptor carrying the type's name, its single-inheritance base
//! chain, whether values of the type can be null, and the members declared on
//! it. Descriptors are cheap to clone and compare by name.

use std::sync::Arc;

/// Upper bound on base-chain walks. Descriptor chains are user-provided and
/// must never be trusted to terminate.
const BASE_CHAIN_LIMIT: usize = 256;

/// A member declared on a runtime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Simple member name.
    pub name: String,
    /// Declared member type.
    pub member_type: TypeRef,
    /// Whether this member is the type's designated indexer.
    pub indexer: bool,
}

#[derive(Debug)]
struct TypeInfo {
    name: String,
    base: Option<TypeRef>,
    nullable: bool,
    underlying: Option<TypeRef>,
    members: Vec<MemberInfo>,
}

/// A nominal reference to a runtime type.
///
/// Identity is the type name: two descriptors with the same name refer to the
/// same type regardless of how much structural detail each carries.
#[derive(Clone)]
pub struct TypeRef(Arc<TypeInfo>);

impl TypeRef {
    /// A named reference-like type (nullable by default).
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef(Arc::new(TypeInfo {
            name: name.into(),
            base: None,
            nullable: true,
            underlying: None,
            members: Vec::new(),
        }))
    }

    fn scalar(name: &str) -> Self {
        TypeRef(Arc::new(TypeInfo {
            name: name.to_string(),
            base: None,
            nullable: false,
            underlying: None,
            members: Vec::new(),
        }))
    }

    /// Non-nullable 32-bit integer.
    pub fn int32() -> Self {
        Self::scalar("i32")
    }

    /// Non-nullable 64-bit integer.
    pub fn int64() -> Self {
        Self::scalar("i64")
    }

    /// Non-nullable 64-bit float.
    pub fn float64() -> Self {
        Self::scalar("f64")
    }

    /// Non-nullable boolean.
    pub fn boolean() -> Self {
        Self::scalar("bool")
    }

    /// String type. Reference-like, nullable.
    pub fn string() -> Self {
        TypeRef(Arc::new(TypeInfo {
            name: "string".to_string(),
            base: None,
            nullable: true,
            underlying: None,
            members: Vec::new(),
        }))
    }

    /// Byte-array type. Reference-like, nullable.
    pub fn bytes() -> Self {
        TypeRef(Arc::new(TypeInfo {
            name: "bytes".to_string(),
            base: None,
            nullable: true,
            underlying: None,
            members: Vec::new(),
        }))
    }

    /// The nullable wrapper of a type, e.g. `optional(int32())` for `i32?`.
    ///
    /// Wrapping an already-nullable type returns it unchanged.
    pub fn optional(inner: TypeRef) -> Self {
        if inner.is_nullable() {
            return inner;
        }
        TypeRef(Arc::new(TypeInfo {
            name: format!("{}?", inner.name()),
            base: None,
            nullable: true,
            underlying: Some(inner),
            members: Vec::new(),
        }))
    }

    /// Set the base type, consuming and returning the descriptor.
    pub fn with_base(self, base: TypeRef) -> Self {
        let info = &*self.0;
        TypeRef(Arc::new(TypeInfo {
            name: info.name.clone(),
            base: Some(base),
            nullable: info.nullable,
            underlying: info.underlying.clone(),
            members: info.members.clone(),
        }))
    }

    /// Declare a member on the type.
    pub fn with_member(self, name: impl Into<String>, member_type: TypeRef) -> Self {
        self.push_member(MemberInfo {
            name: name.into(),
            member_type,
            indexer: false,
        })
    }

    /// Declare the type's designated indexer member.
    pub fn with_indexer(self, name: impl Into<String>, member_type: TypeRef) -> Self {
        self.push_member(MemberInfo {
            name: name.into(),
            member_type,
            indexer: true,
        })
    }

    fn push_member(self, member: MemberInfo) -> Self {
        let info = &*self.0;
        let mut members = info.members.clone();
        members.push(member);
        TypeRef(Arc::new(TypeInfo {
            name: info.name.clone(),
            base: info.base.clone(),
            nullable: info.nullable,
            underlying: info.underlying.clone(),
            members,
        }))
    }

    /// The type's canonical display name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The direct base type, if any.
    pub fn base(&self) -> Option<&TypeRef> {
        self.0.base.as_ref()
    }

    /// Whether values of this type may be null.
    pub fn is_nullable(&self) -> bool {
        self.0.nullable
    }

    /// The wrapped type for nullable wrappers, `None` otherwise.
    pub fn underlying(&self) -> Option<&TypeRef> {
        self.0.underlying.as_ref()
    }

    /// Members declared directly on this type.
    pub fn declared_members(&self) -> &[MemberInfo] {
        &self.0.members
    }

    /// Find a member by simple name, searching the base chain.
    pub fn member(&self, name: &str) -> Option<&MemberInfo> {
        let mut current = Some(self);
        let mut steps = 0;
        while let Some(ty) = current {
            if let Some(member) = ty.0.members.iter().find(|m| m.name == name) {
                return Some(member);
            }
            steps += 1;
            if steps > BASE_CHAIN_LIMIT {
                return None;
            }
            current = ty.base();
        }
        None
    }

    /// Find the designated indexer member, searching the base chain.
    pub fn indexer_member(&self) -> Option<&MemberInfo> {
        let mut current = Some(self);
        let mut steps = 0;
        while let Some(ty) = current {
            if let Some(member) = ty.0.members.iter().find(|m| m.indexer) {
                return Some(member);
            }
            steps += 1;
            if steps > BASE_CHAIN_LIMIT {
                return None;
            }
            current = ty.base();
        }
        None
    }

    /// Check whether a value of `other` can be treated as a value of `self`,
    /// i.e. `other` is this type or transitively derives from it.
    pub fn is_assignable_from(&self, other: &TypeRef) -> bool {
        let mut current = Some(other);
        let mut steps = 0;
        while let Some(ty) = current {
            if ty == self {
                return true;
            }
            steps += 1;
            if steps > BASE_CHAIN_LIMIT {
                return false;
            }
            current = ty.base();
        }
        false
    }

    /// Walk the base chain starting at this type, nearest first.
    pub fn self_and_bases(&self) -> impl Iterator<Item = &TypeRef> {
        let mut current = Some(self);
        let mut steps = 0;
        std::iter::from_fn(move || {
            let ty = current?;
            steps += 1;
            current = if steps > BASE_CHAIN_LIMIT {
                None
            } else {
                ty.base()
            };
            Some(ty)
        })
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for TypeRef {}

impl PartialOrd for TypeRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.name.cmp(&other.0.name)
    }
}

impl std::hash::Hash for TypeRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl std::fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeRef({})", self.0.name)
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_nullability() {
        assert!(!TypeRef::int32().is_nullable());
        assert!(!TypeRef::boolean().is_nullable());
        assert!(TypeRef::string().is_nullable());
        assert!(TypeRef::optional(TypeRef::int32()).is_nullable());
    }

    #[test]
    fn test_optional_wrapping() {
        let opt = TypeRef::optional(TypeRef::int32());
        assert_eq!(opt.name(), "i32?");
        assert_eq!(opt.underlying().unwrap().name(), "i32");

        // Wrapping a nullable type is a no-op.
        let string = TypeRef::string();
        assert_eq!(TypeRef::optional(string.clone()), string);
    }

    #[test]
    fn test_assignability() {
        let animal = TypeRef::named("Animal");
        let cat = TypeRef::named("Cat").with_base(animal.clone());
        let tabby = TypeRef::named("Tabby").with_base(cat.clone());

        assert!(animal.is_assignable_from(&cat));
        assert!(animal.is_assignable_from(&tabby));
        assert!(cat.is_assignable_from(&tabby));
        assert!(!cat.is_assignable_from(&animal));
        assert!(!tabby.is_assignable_from(&cat));
        assert!(animal.is_assignable_from(&animal));
    }

    #[test]
    fn test_member_lookup_walks_bases() {
        let base = TypeRef::named("Base").with_member("Id", TypeRef::int32());
        let derived = TypeRef::named("Derived")
            .with_base(base)
            .with_member("Name", TypeRef::string());

        assert_eq!(derived.member("Name").unwrap().member_type, TypeRef::string());
        assert_eq!(derived.member("Id").unwrap().member_type, TypeRef::int32());
        assert!(derived.member("Missing").is_none());
    }

    #[test]
    fn test_indexer_member() {
        let bag = TypeRef::named("Bag").with_indexer("Item", TypeRef::string());
        let member = bag.indexer_member().unwrap();
        assert_eq!(member.name, "Item");
        assert!(member.indexer);
        assert!(TypeRef::named("Plain").indexer_member().is_none());
    }

    #[test]
    fn test_identity_is_nominal() {
        let a = TypeRef::named("Order").with_member("Id", TypeRef::int32());
        let b = TypeRef::named("Order");
        assert_eq!(a, b);
    }
}
