// Type registry: declared types keyed by namespace-qualified name

use rustc_hash::FxHashMap;

use super::ast::{Attribute, TypeBody, TypeDecl};
use crate::span::Span;

/// Registry of declared types for a single parse.
///
/// A type is "open" from the moment its name is claimed until its body has
/// been parsed. Use sites inside the open body get a forward reference; every
/// other use site gets its own deep clone of the finished declaration.
#[derive(Debug, Default)]
pub(crate) struct TypeRegistry {
    types: FxHashMap<String, TypeDecl>,
    open: Vec<String>,
}

/// Join a namespace path and a name as `a::b::name`
pub(crate) fn qualify(namespace: &[String], name: &str) -> String {
    if namespace.is_empty() {
        return name.to_string();
    }
    let mut qualified = namespace.join("::");
    qualified.push_str("::");
    qualified.push_str(name);
    qualified
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_known(&self, qualified: &str) -> bool {
        self.types.contains_key(qualified) || self.open.iter().any(|n| n == qualified)
    }

    /// Claim a name for a type whose body is about to be parsed.
    /// Returns the qualified name, or the redefinition message.
    pub fn open(&mut self, namespace: &[String], name: &str) -> Result<String, String> {
        let qualified = qualify(namespace, name);
        if self.is_known(&qualified) {
            return Err(format!("redefinition of type '{}'", qualified));
        }
        self.open.push(qualified.clone());
        Ok(qualified)
    }

    /// Store the finished declaration of a previously opened type
    pub fn finish(&mut self, decl: TypeDecl) {
        self.open.retain(|n| *n != decl.name);
        self.types.insert(decl.name.clone(), decl);
    }

    /// Attach trailing attributes to an already registered type
    pub fn add_attrs(&mut self, qualified: &str, attrs: &[Attribute]) {
        if let Some(decl) = self.types.get_mut(qualified) {
            decl.attrs.extend_from_slice(attrs);
        }
    }

    /// Resolve a name as written, then relative to the current namespace
    pub fn resolve(&self, namespace: &[String], name: &str) -> Option<String> {
        if self.is_known(name) {
            return Some(name.to_string());
        }
        let prefixed = qualify(namespace, name);
        if self.is_known(&prefixed) {
            return Some(prefixed);
        }
        None
    }

    /// A fresh copy of the named type for a use site.
    /// Types whose body is still open come back as forward references.
    pub fn instantiate(&self, namespace: &[String], name: &str, span: Span) -> Option<TypeDecl> {
        let qualified = self.resolve(namespace, name)?;
        match self.types.get(&qualified) {
            Some(decl) => Some(decl.clone()),
            None => Some(TypeDecl {
                name: qualified.clone(),
                endian: None,
                body: TypeBody::Forward(qualified),
                attrs: Vec::new(),
                span,
            }),
        }
    }

    /// A finished type only; open types are not usable here (e.g. as a base)
    pub fn instantiate_finished(&self, namespace: &[String], name: &str) -> Option<TypeDecl> {
        let qualified = self.resolve(namespace, name)?;
        self.types.get(&qualified).cloned()
    }

    pub fn into_types(self) -> FxHashMap<String, TypeDecl> {
        self.types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::BuiltinType;

    fn u8_alias(name: &str) -> TypeDecl {
        TypeDecl {
            name: name.to_string(),
            endian: None,
            body: TypeBody::Alias(Box::new(TypeDecl::builtin(
                BuiltinType::U8,
                None,
                Span::dummy(),
            ))),
            attrs: Vec::new(),
            span: Span::dummy(),
        }
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify(&[], "A"), "A");
        let ns = vec!["a".to_string(), "b".to_string()];
        assert_eq!(qualify(&ns, "A"), "a::b::A");
    }

    #[test]
    fn test_redefinition_rejected() {
        let mut reg = TypeRegistry::new();
        let q = reg.open(&[], "Byte").unwrap();
        reg.finish(u8_alias(&q));
        let err = reg.open(&[], "Byte").unwrap_err();
        assert_eq!(err, "redefinition of type 'Byte'");
    }

    #[test]
    fn test_open_type_is_forward() {
        let mut reg = TypeRegistry::new();
        reg.open(&[], "Node").unwrap();
        let decl = reg.instantiate(&[], "Node", Span::dummy()).unwrap();
        assert_eq!(decl.body, TypeBody::Forward("Node".to_string()));
        assert!(reg.instantiate_finished(&[], "Node").is_none());
    }

    #[test]
    fn test_namespace_relative_lookup() {
        let mut reg = TypeRegistry::new();
        let ns = vec!["fmt".to_string()];
        let q = reg.open(&ns, "Byte").unwrap();
        reg.finish(u8_alias(&q));
        assert_eq!(reg.resolve(&ns, "Byte").as_deref(), Some("fmt::Byte"));
        assert_eq!(reg.resolve(&[], "fmt::Byte").as_deref(), Some("fmt::Byte"));
        assert!(reg.resolve(&[], "Byte").is_none());
    }

    #[test]
    fn test_instances_are_independent_copies() {
        let mut reg = TypeRegistry::new();
        let q = reg.open(&[], "Byte").unwrap();
        reg.finish(u8_alias(&q));
        let mut a = reg.instantiate(&[], "Byte", Span::dummy()).unwrap();
        a.attrs.push(Attribute {
            name: "hidden".into(),
            value: None,
            span: Span::dummy(),
        });
        let b = reg.instantiate(&[], "Byte", Span::dummy()).unwrap();
        assert!(b.attrs.is_empty());
    }
}
