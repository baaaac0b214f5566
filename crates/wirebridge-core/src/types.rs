//! Structural type descriptors.
//!
//! Every value crossing the bridge is described by a [`TypeDescriptor`]. The
//! descriptors drive argument validation at dispatch time and the TypeScript
//! surface at generation time. Rust types opt in through [`Describe`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Leaf value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    String,
    Integer,
    Float,
    Boolean,
    Null,
    /// Raw bytes, base64 encoded on the wire.
    Bytes,
    /// Any JSON value.
    Unknown,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::String => "string",
            Primitive::Integer => "integer",
            Primitive::Float => "float",
            Primitive::Boolean => "boolean",
            Primitive::Null => "null",
            Primitive::Bytes => "bytes",
            Primitive::Unknown => "unknown",
        }
    }
}

/// The shape of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Primitive(Primitive),
    Optional(Box<TypeDescriptor>),
    Sequence(Box<TypeDescriptor>),
    Mapping(Box<TypeDescriptor>, Box<TypeDescriptor>),
    Tuple(Vec<TypeDescriptor>),
    Record(RecordDef),
    Enum(EnumDef),
    Union(Vec<TypeDescriptor>),
    /// A named record or enum defined elsewhere. Used for recursive schemas.
    Reference(String),
    /// Payload marker for streaming commands.
    Stream(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn optional(inner: TypeDescriptor) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn sequence(element: TypeDescriptor) -> Self {
        Self::Sequence(Box::new(element))
    }

    pub fn mapping(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::Mapping(Box::new(key), Box::new(value))
    }

    pub fn stream(element: TypeDescriptor) -> Self {
        Self::Stream(Box::new(element))
    }

    pub fn union(members: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        Self::Union(members.into_iter().collect())
    }

    /// Refer to a record or enum by name without inlining it.
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    /// Name of the record, enum or reference, if this is one.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            TypeDescriptor::Record(def) => Some(&def.name),
            TypeDescriptor::Enum(def) => Some(&def.name),
            TypeDescriptor::Reference(name) => Some(name),
            _ => None,
        }
    }

    /// Whether `null` is an accepted value.
    pub fn is_nullable(&self) -> bool {
        match self {
            TypeDescriptor::Optional(_) => true,
            TypeDescriptor::Primitive(Primitive::Null | Primitive::Unknown) => true,
            TypeDescriptor::Union(members) => members.iter().any(TypeDescriptor::is_nullable),
            _ => false,
        }
    }

    /// Direct children, in declaration order. Record fields are children;
    /// references are leaves.
    pub fn children(&self) -> Vec<&TypeDescriptor> {
        match self {
            TypeDescriptor::Primitive(_)
            | TypeDescriptor::Enum(_)
            | TypeDescriptor::Reference(_) => Vec::new(),
            TypeDescriptor::Optional(inner)
            | TypeDescriptor::Sequence(inner)
            | TypeDescriptor::Stream(inner) => vec![&**inner],
            TypeDescriptor::Mapping(key, value) => vec![&**key, &**value],
            TypeDescriptor::Tuple(items) | TypeDescriptor::Union(items) => items.iter().collect(),
            TypeDescriptor::Record(def) => def.fields.iter().map(|f| &f.ty).collect(),
        }
    }
}

impl From<Primitive> for TypeDescriptor {
    fn from(p: Primitive) -> Self {
        TypeDescriptor::Primitive(p)
    }
}

impl From<RecordDef> for TypeDescriptor {
    fn from(def: RecordDef) -> Self {
        TypeDescriptor::Record(def)
    }
}

impl From<EnumDef> for TypeDescriptor {
    fn from(def: EnumDef) -> Self {
        TypeDescriptor::Enum(def)
    }
}

/// A record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Native (transport-case) field name.
    pub name: String,
    pub ty: TypeDescriptor,
    /// The field has a default and may be omitted.
    pub optional: bool,
    pub description: Option<String>,
}

impl Field {
    /// Whether the field may be absent from a payload.
    pub fn may_be_absent(&self) -> bool {
        self.optional || self.ty.is_nullable()
    }
}

/// A named record with ordered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDef {
    pub name: String,
    pub fields: Vec<Field>,
    pub doc: Option<String>,
}

impl RecordDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            doc: None,
        }
    }

    pub fn describe(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Add a required field described by `T`.
    pub fn field<T: Describe + ?Sized>(self, name: impl Into<String>) -> Self {
        self.field_with(name, T::describe())
    }

    /// Add a required field with an explicit descriptor.
    pub fn field_with(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.fields.push(Field {
            name: name.into(),
            ty,
            optional: false,
            description: None,
        });
        self
    }

    /// Add a field that has a default value.
    pub fn optional_field<T: Describe + ?Sized>(self, name: impl Into<String>) -> Self {
        self.optional_field_with(name, T::describe())
    }

    pub fn optional_field_with(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.fields.push(Field {
            name: name.into(),
            ty,
            optional: true,
            description: None,
        });
        self
    }

    /// Attach a description to the most recently added field.
    pub fn doc(mut self, description: impl Into<String>) -> Self {
        if let Some(field) = self.fields.last_mut() {
            field.description = Some(description.into());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A closed set of string variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<String>,
    pub doc: Option<String>,
}

impl EnumDef {
    pub fn new<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
            doc: None,
        }
    }

    pub fn describe(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// Types that can describe their wire shape.
///
/// Implemented for the std types that map onto JSON. Records implement it by
/// hand:
///
/// ```
/// use wirebridge_core::{Describe, RecordDef, TypeDescriptor};
///
/// struct User {
///     id: i64,
///     email: Option<String>,
/// }
///
/// impl Describe for User {
///     fn describe() -> TypeDescriptor {
///         RecordDef::new("User")
///             .field::<i64>("id")
///             .field::<Option<String>>("email")
///             .into()
///     }
/// }
/// ```
pub trait Describe {
    fn describe() -> TypeDescriptor;
}

macro_rules! impl_primitive {
    ($kind:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl Describe for $ty {
                fn describe() -> TypeDescriptor {
                    TypeDescriptor::Primitive($kind)
                }
            }
        )+
    };
}

impl_primitive!(Primitive::String => String, str, char);
impl_primitive!(Primitive::Integer => i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
impl_primitive!(Primitive::Float => f32, f64);
impl_primitive!(Primitive::Boolean => bool);
impl_primitive!(Primitive::Null => ());
impl_primitive!(Primitive::Unknown => serde_json::Value);

impl<T: Describe> Describe for Option<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::optional(T::describe())
    }
}

macro_rules! impl_sequence {
    ($($ty:ident),+) => {
        $(
            impl<T: Describe> Describe for $ty<T> {
                fn describe() -> TypeDescriptor {
                    TypeDescriptor::sequence(T::describe())
                }
            }
        )+
    };
}

impl_sequence!(Vec, VecDeque, BTreeSet);

impl<T: Describe, S> Describe for HashSet<T, S> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::sequence(T::describe())
    }
}

impl<T: Describe> Describe for [T] {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::sequence(T::describe())
    }
}

impl<T: Describe, const N: usize> Describe for [T; N] {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::sequence(T::describe())
    }
}

impl<K: Describe, V: Describe, S> Describe for HashMap<K, V, S> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::mapping(K::describe(), V::describe())
    }
}

impl<K: Describe, V: Describe> Describe for BTreeMap<K, V> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::mapping(K::describe(), V::describe())
    }
}

impl<T: Describe + ?Sized> Describe for &T {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<T: Describe + ?Sized> Describe for Box<T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<T: Describe + ?Sized> Describe for Arc<T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: Describe),+> Describe for ($($name,)+) {
            fn describe() -> TypeDescriptor {
                TypeDescriptor::Tuple(vec![$($name::describe()),+])
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;

    struct Node;

    impl Describe for Node {
        fn describe() -> TypeDescriptor {
            RecordDef::new("Node")
                .field::<String>("label")
                .field_with(
                    "children",
                    TypeDescriptor::sequence(TypeDescriptor::reference("Node")),
                )
                .into()
        }
    }

    #[test]
    fn std_types_describe_themselves() {
        assert_eq!(String::describe(), Primitive::String.into());
        assert_eq!(u32::describe(), Primitive::Integer.into());
        assert_eq!(
            Option::<Vec<f64>>::describe(),
            TypeDescriptor::optional(TypeDescriptor::sequence(Primitive::Float.into()))
        );
        assert_eq!(
            HashMap::<String, bool>::describe(),
            TypeDescriptor::mapping(Primitive::String.into(), Primitive::Boolean.into())
        );
        assert_eq!(
            <(i32, String)>::describe(),
            TypeDescriptor::Tuple(vec![Primitive::Integer.into(), Primitive::String.into()])
        );
    }

    #[test]
    fn recursive_record_refers_to_itself_by_name() {
        let TypeDescriptor::Record(def) = Node::describe() else {
            panic!("expected record");
        };
        let children = def.get("children").unwrap();
        assert_eq!(
            children.ty,
            TypeDescriptor::sequence(TypeDescriptor::reference("Node"))
        );
    }

    #[test]
    fn nullability() {
        assert!(Option::<i32>::describe().is_nullable());
        assert!(!i32::describe().is_nullable());
        assert!(
            TypeDescriptor::union([Primitive::String.into(), Primitive::Null.into()]).is_nullable()
        );
    }

    #[test]
    fn field_docs_attach_to_last_field() {
        let def = RecordDef::new("User")
            .field::<i64>("id")
            .doc("Primary key")
            .optional_field::<String>("nickname");
        assert_eq!(def.fields[0].description.as_deref(), Some("Primary key"));
        assert!(def.fields[1].optional);
        assert!(def.fields[1].may_be_absent());
        assert!(!def.fields[0].may_be_absent());
    }
}
