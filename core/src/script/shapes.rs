//! Module catalog as a `TypeCatalog`
//!
//! Every catalog module is a static type `script.modules.<name>`: functions
//! become static methods, constants static properties.

use super::engine::ScriptEngine;
use super::modules::ModuleDef;
use super::types::Type;
use crate::introspect::{MethodShape, PropertyShape, TypeCatalog, TypeRef, TypeShape};

pub const MODULES_NAMESPACE: &str = "script.modules";

/// Full type name of a module
pub fn module_type_name(module: &str) -> String {
    format!("{}.{}", MODULES_NAMESPACE, module)
}

impl TypeCatalog for ScriptEngine {
    fn find_type(&self, name: &str) -> Option<TypeShape> {
        let module = name
            .strip_prefix(MODULES_NAMESPACE)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name);
        self.catalog().get(module).map(|def| module_shape(def))
    }
}

pub fn module_shape(def: &ModuleDef) -> TypeShape {
    TypeShape {
        namespace: MODULES_NAMESPACE.to_string(),
        name: def.name.clone(),
        generic_args: Vec::new(),
        methods: def
            .functions
            .iter()
            .map(|f| MethodShape {
                name: f.name.clone(),
                return_type: type_ref(&f.returns),
                params: f
                    .params
                    .iter()
                    .map(|(name, ty)| (type_ref(ty), name.clone()))
                    .chain(
                        f.variadic
                            .then(|| (type_ref(&Type::Any), "values".to_string())),
                    )
                    .collect(),
                is_static: true,
                is_public: true,
                is_special: false,
                is_variadic: f.variadic,
            })
            .collect(),
        properties: def
            .constants
            .iter()
            .map(|c| PropertyShape {
                name: c.name.clone(),
                property_type: type_ref(&c.ty),
                is_static: true,
                is_public: true,
            })
            .collect(),
    }
}

fn type_ref(ty: &Type) -> TypeRef {
    match ty {
        Type::Num => TypeRef::new("script", "Number"),
        Type::Str => TypeRef::new("script", "String"),
        Type::Bool => TypeRef::new("script", "Boolean"),
        Type::Null => TypeRef::new("script", "Null"),
        Type::Void => TypeRef::new("script", "Void"),
        Type::Any => TypeRef::new("script", "Any"),
        Type::List(item) => TypeRef::generic("script", "List`1", vec![type_ref(item)]),
        Type::Future(item) => TypeRef::generic("script", "Future`1", vec![type_ref(item)]),
        Type::Fn(_) => TypeRef::new("script", "Function"),
        Type::Module(name) => TypeRef::new(MODULES_NAMESPACE, name),
    }
}
