//! Member listing
//!
//! Renders the callable surface of a type as one signature string per member,
//! for tool callers that need to know what they can invoke. Rust has no
//! runtime reflection, so a host describes its types as `TypeShape`s and hands
//! them out through a `TypeCatalog`.

use serde::{Deserialize, Serialize};

/// Canonical names rendered as their short alias
const ALIASES: &[(&str, &str)] = &[
    ("script.Number", "num"),
    ("script.String", "str"),
    ("script.Boolean", "bool"),
    ("script.Void", "void"),
    ("script.Any", "any"),
    ("script.Null", "null"),
    ("System.String", "string"),
    ("System.Int32", "int"),
    ("System.Boolean", "bool"),
    ("System.Double", "double"),
    ("System.Single", "float"),
    ("System.Decimal", "decimal"),
    ("System.Object", "object"),
    ("System.Void", "void"),
    ("System.Char", "char"),
    ("System.Byte", "byte"),
    ("System.SByte", "sbyte"),
    ("System.Int16", "short"),
    ("System.UInt16", "ushort"),
    ("System.UInt32", "uint"),
    ("System.Int64", "long"),
    ("System.UInt64", "ulong"),
];

/// Return types whose members are awaited
const FUTURE_SHAPES: &[&str] = &["Future", "Task", "ValueTask"];

/// Reference to a type, possibly generic (`Future`1<num>`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<TypeRef>,
}

impl TypeRef {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    pub fn generic(namespace: &str, name: &str, args: Vec<TypeRef>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            args,
        }
    }

    /// Name without its arity marker
    fn bare_name(&self) -> &str {
        self.name.split('`').next().unwrap_or(&self.name)
    }

    fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.bare_name().to_string()
        } else {
            format!("{}.{}", self.namespace, self.bare_name())
        }
    }

    /// Display form: aliases for built-ins, generic arguments rendered recursively
    pub fn render(&self) -> String {
        let full = self.full_name();
        if self.args.is_empty() {
            return ALIASES
                .iter()
                .find(|(canonical, _)| *canonical == full)
                .map(|(_, alias)| alias.to_string())
                .unwrap_or(full);
        }
        let args: Vec<String> = self.args.iter().map(TypeRef::render).collect();
        format!("{}<{}>", full, args.join(", "))
    }

    /// Whether members returning this type are asynchronous
    pub fn is_future(&self) -> bool {
        FUTURE_SHAPES.contains(&self.bare_name()) && self.args.len() <= 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodShape {
    pub name: String,
    pub return_type: TypeRef,
    pub params: Vec<(TypeRef, String)>,
    pub is_static: bool,
    pub is_public: bool,
    /// Compiler-generated (operators, accessors); never listed
    pub is_special: bool,
    /// The last parameter takes any number of arguments
    #[serde(default)]
    pub is_variadic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyShape {
    pub name: String,
    pub property_type: TypeRef,
    pub is_static: bool,
    pub is_public: bool,
}

/// The members of a type, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeShape {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub generic_args: Vec<TypeRef>,
    pub methods: Vec<MethodShape>,
    pub properties: Vec<PropertyShape>,
}

impl TypeShape {
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// Looks up the shape of a type by its full name
pub trait TypeCatalog: Send + Sync {
    fn find_type(&self, name: &str) -> Option<TypeShape>;
}

/// One listed member, before rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberDescriptor {
    pub declared_type_name: String,
    pub member_name: String,
    pub parameters: Vec<(String, String)>,
    pub is_async: bool,
    pub is_property_like: bool,
    pub is_variadic: bool,
}

impl MemberDescriptor {
    /// `"<Type> <Name>"` for properties, `"[async ]<Ret> <Name>(<Type> <param>, ...)"` for methods
    ///
    /// A variadic method renders its last parameter as `<Type>.. <param>`.
    pub fn signature(&self) -> String {
        if self.is_property_like {
            return format!("{} {}", self.declared_type_name, self.member_name);
        }
        let last = self.parameters.len().saturating_sub(1);
        let params: Vec<String> = self
            .parameters
            .iter()
            .enumerate()
            .map(|(i, (ty, name))| {
                if self.is_variadic && i == last {
                    format!("{}.. {}", ty, name)
                } else {
                    format!("{} {}", ty, name)
                }
            })
            .collect();
        format!(
            "{}{} {}({})",
            if self.is_async { "async " } else { "" },
            self.declared_type_name,
            self.member_name,
            params.join(", ")
        )
    }
}

/// Public static non-special methods, then public static properties
pub fn describe_members(shape: &TypeShape) -> Vec<MemberDescriptor> {
    let methods = shape
        .methods
        .iter()
        .filter(|m| m.is_public && m.is_static && !m.is_special)
        .map(|m| MemberDescriptor {
            declared_type_name: m.return_type.render(),
            member_name: m.name.clone(),
            parameters: m
                .params
                .iter()
                .map(|(ty, name)| (ty.render(), name.clone()))
                .collect(),
            is_async: m.return_type.is_future(),
            is_property_like: m.name.starts_with("get_") && m.params.is_empty(),
            is_variadic: m.is_variadic && !m.params.is_empty(),
        });
    let properties = shape
        .properties
        .iter()
        .filter(|p| p.is_public && p.is_static)
        .map(|p| MemberDescriptor {
            declared_type_name: p.property_type.render(),
            member_name: p.name.clone(),
            parameters: Vec::new(),
            is_async: false,
            is_property_like: true,
            is_variadic: false,
        });
    methods.chain(properties).collect()
}

/// One signature string per listed member
pub fn list_members(shape: &TypeShape) -> Vec<String> {
    describe_members(shape)
        .iter()
        .map(MemberDescriptor::signature)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int() -> TypeRef {
        TypeRef::new("System", "Int32")
    }

    fn string() -> TypeRef {
        TypeRef::new("System", "String")
    }

    fn method(name: &str, ret: TypeRef, params: Vec<(TypeRef, &str)>) -> MethodShape {
        MethodShape {
            name: name.to_string(),
            return_type: ret,
            params: params
                .into_iter()
                .map(|(ty, n)| (ty, n.to_string()))
                .collect(),
            is_static: true,
            is_public: true,
            is_special: false,
            is_variadic: false,
        }
    }

    fn globals() -> TypeShape {
        TypeShape {
            namespace: "App".to_string(),
            name: "Globals".to_string(),
            generic_args: vec![],
            methods: vec![
                method(
                    "Fetch",
                    TypeRef::generic("System.Threading.Tasks", "Task`1", vec![int()]),
                    vec![(string(), "url")],
                ),
                method("Add", int(), vec![(int(), "a"), (int(), "b")]),
                method("get_Count", int(), vec![]),
                method("Flush", TypeRef::new("System.Threading.Tasks", "ValueTask"), vec![]),
                MethodShape {
                    is_special: true,
                    ..method("op_Addition", int(), vec![(int(), "a"), (int(), "b")])
                },
                MethodShape {
                    is_static: false,
                    ..method("ToString", string(), vec![])
                },
            ],
            properties: vec![
                PropertyShape {
                    name: "Name".to_string(),
                    property_type: string(),
                    is_static: true,
                    is_public: true,
                },
                PropertyShape {
                    name: "Secret".to_string(),
                    property_type: string(),
                    is_static: true,
                    is_public: false,
                },
            ],
        }
    }

    #[test]
    fn test_list_members() {
        assert_eq!(
            list_members(&globals()),
            vec![
                "async System.Threading.Tasks.Task<int> Fetch(string url)",
                "int Add(int a, int b)",
                "int get_Count",
                "async System.Threading.Tasks.ValueTask Flush()",
                "string Name",
            ]
        );
    }

    #[test]
    fn test_nested_generics_render_recursively() {
        let ty = TypeRef::generic(
            "System.Collections.Generic",
            "Dictionary`2",
            vec![
                string(),
                TypeRef::generic("System.Collections.Generic", "List`1", vec![int()]),
            ],
        );
        assert_eq!(
            ty.render(),
            "System.Collections.Generic.Dictionary<string, System.Collections.Generic.List<int>>"
        );
        assert!(!ty.is_future());
    }

    #[test]
    fn test_script_aliases() {
        let future = TypeRef::generic("script", "Future`1", vec![TypeRef::new("script", "Void")]);
        assert_eq!(future.render(), "script.Future<void>");
        assert!(future.is_future());
        assert_eq!(TypeRef::new("script", "Number").render(), "num");
        assert_eq!(TypeRef::new("App", "Widget").render(), "App.Widget");
    }

    #[test]
    fn test_descriptors_carry_flags() {
        let members = describe_members(&globals());
        assert!(members[0].is_async);
        assert_eq!(members[0].parameters, vec![("string".to_string(), "url".to_string())]);
        assert!(members[2].is_property_like);
        assert!(members[4].is_property_like);
    }

    #[test]
    fn test_variadic_marks_last_parameter() {
        let shape = TypeShape {
            methods: vec![
                MethodShape {
                    is_variadic: true,
                    ..method("Format", string(), vec![(string(), "format"), (int(), "args")])
                },
                MethodShape {
                    is_variadic: true,
                    ..method("Nothing", int(), vec![])
                },
            ],
            properties: vec![],
            ..globals()
        };
        assert_eq!(
            list_members(&shape),
            vec!["string Format(string format, int.. args)", "int Nothing()"]
        );
    }
}
