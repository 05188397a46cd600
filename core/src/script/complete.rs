//! Completion source for stanza script
//!
//! Provides candidates for:
//! - Keywords (let, fn, use, if, else, while, await, ...)
//! - Bindings of earlier submissions and of the lines above the caret
//! - Referenced modules and their members (`math.fl|`)
//! - Members of imported modules, the prelude included
//! - Module names inside `#load "..."`

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use super::checker::{Checker, ARGS_BINDING, RUNTIME_HELPER};
use super::engine::{ScriptEngine, ScriptProgram};
use super::modules::{ModuleDef, PRELUDE};
use super::parser::parse_program;
use super::types::Type;
use crate::completion::{
    ready_description, Candidate, Classification, CompletionSource, DescriptionFn,
    DescriptionFuture, Document,
};
use crate::error::CompletionError;
use crate::references::{import_statements, load_directives};

/// All stanza keywords
pub const KEYWORDS: &[(&str, &str)] = &[
    ("let", "Declare a binding"),
    ("fn", "Declare a function"),
    ("use", "Import a module's members into scope"),
    ("if", "Conditional statement"),
    ("else", "Else branch of conditional"),
    ("while", "While loop"),
    ("await", "Wait for a future"),
    ("true", "Boolean true"),
    ("false", "Boolean false"),
    ("null", "Null value"),
];

/// Where the caret sits on its line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineContext {
    Code,
    String,
    Comment,
}

/// Names the text at the caret can see
struct Scope {
    modules: Vec<String>,
    imports: Vec<String>,
    bindings: BTreeMap<String, Type>,
}

#[async_trait]
impl CompletionSource<ScriptProgram> for ScriptEngine {
    async fn candidates(
        &self,
        document: &Document<ScriptProgram>,
        text: &str,
        caret: usize,
    ) -> Result<Option<Vec<Candidate>>, CompletionError> {
        self.candidates_at(document, text, caret)
    }
}

impl ScriptEngine {
    fn candidates_at(
        &self,
        document: &Document<ScriptProgram>,
        text: &str,
        caret: usize,
    ) -> Result<Option<Vec<Candidate>>, CompletionError> {
        if caret > text.len() {
            return Err(CompletionError::CaretOutOfRange {
                caret,
                len: text.len(),
            });
        }
        if !text.is_char_boundary(caret) {
            return Err(CompletionError::CaretNotOnCharBoundary { caret });
        }

        let before = &text[..caret];
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let line = &before[line_start..];

        match line_context(line) {
            LineContext::Comment => return Ok(None),
            LineContext::String => return Ok(self.load_targets(document, line)),
            LineContext::Code => {}
        }

        let word_start = before
            .char_indices()
            .rev()
            .take_while(|(_, c)| is_ident_char(*c))
            .last()
            .map_or(caret, |(i, _)| i);
        let word = &before[word_start..];
        let head = &before[..word_start];

        let scope = self.scope(document, text, &text[..line_start]);

        let (prefix, mut candidates) = if let Some(receiver) = head.strip_suffix('.') {
            let receiver = trailing_ident(receiver);
            (word.to_string(), self.member_candidates(&scope, receiver))
        } else {
            let at_line_start = head[line_start..].trim().is_empty();
            let directive = head[line_start..].trim() == "#";
            let prefix = if directive {
                format!("#{}", word)
            } else {
                word.to_string()
            };
            (prefix, self.scope_candidates(&scope, at_line_start || directive))
        };

        candidates.retain(|c| c.label.starts_with(&prefix));
        candidates.sort_by(|a, b| {
            rank(a.classification)
                .cmp(&rank(b.classification))
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(Some(candidates))
    }

    /// Modules and bindings visible at the caret: the committed context plus
    /// the complete lines typed above it
    fn scope(&self, document: &Document<ScriptProgram>, text: &str, above: &str) -> Scope {
        let mut modules = vec![PRELUDE.to_string()];
        let push_module = |modules: &mut Vec<String>, name: String| {
            if !modules.contains(&name) {
                modules.push(name);
            }
        };
        for module in self.visible_modules(document.references()) {
            push_module(&mut modules, module.name);
        }
        for target in load_directives(text) {
            for module in self.catalog().with_dependencies(&target) {
                push_module(&mut modules, module.name);
            }
        }

        let mut imports = vec![PRELUDE.to_string()];
        for import in document
            .references()
            .imports()
            .iter()
            .cloned()
            .chain(import_statements(text))
        {
            if !imports.contains(&import) {
                imports.push(import);
            }
        }

        let committed = document
            .unit()
            .map(|unit| unit.program().bindings.clone())
            .unwrap_or_default();
        let bindings = match parse_program(above) {
            Ok(statements) if !statements.is_empty() => {
                let mut checker =
                    Checker::new(self.catalog(), &modules, &imports, committed.clone());
                checker.check_statements(&statements);
                checker.finish().unwrap_or(committed)
            }
            _ => committed,
        };

        Scope {
            modules,
            imports,
            bindings,
        }
    }

    fn member_candidates(&self, scope: &Scope, receiver: &str) -> Vec<Candidate> {
        if receiver == RUNTIME_HELPER {
            return vec![
                Candidate::new(
                    "version",
                    Classification::Property,
                    ready_description("version: str\nVersion of the evaluation environment"),
                ),
                Candidate::new(
                    "submission",
                    Classification::Property,
                    ready_description("submission: num\nNumber of the running submission"),
                ),
            ];
        }

        let module = match scope.bindings.get(receiver) {
            Some(Type::Module(name)) => Some(name.as_str()),
            Some(_) => None,
            None => scope
                .modules
                .iter()
                .find(|m| m.as_str() == receiver)
                .map(String::as_str),
        };
        module
            .and_then(|name| self.catalog().get(name))
            .map(|def| module_members(def))
            .unwrap_or_default()
    }

    fn scope_candidates(&self, scope: &Scope, at_line_start: bool) -> Vec<Candidate> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut offer = |candidate: Candidate, out: &mut Vec<Candidate>| {
            if seen.insert(candidate.label.clone()) {
                out.push(candidate);
            }
        };

        for (name, ty) in &scope.bindings {
            offer(
                Candidate::new(
                    name.as_str(),
                    classify(ty),
                    ready_description(format!("{}: {}", name, ty)),
                ),
                &mut out,
            );
        }
        offer(
            Candidate::new(
                ARGS_BINDING,
                Classification::Variable,
                ready_description(format!("{}: list<str>\nArguments passed to the evaluation", ARGS_BINDING)),
            ),
            &mut out,
        );
        offer(
            Candidate::new(RUNTIME_HELPER, Classification::Variable, ready_description("")),
            &mut out,
        );

        for import in &scope.imports {
            if let Some(def) = self.catalog().get(import) {
                for candidate in module_members(def) {
                    offer(candidate, &mut out);
                }
            }
        }
        for module in &scope.modules {
            if let Some(def) = self.catalog().get(module) {
                offer(
                    Candidate::new(
                        module.as_str(),
                        Classification::Module,
                        ready_description(format!(
                            "module {}, version={}\n{}",
                            def.name, def.version, def.description
                        )),
                    ),
                    &mut out,
                );
            }
        }
        for (keyword, doc) in KEYWORDS {
            offer(
                Candidate::new(*keyword, Classification::Keyword, ready_description(*doc)),
                &mut out,
            );
        }

        if at_line_start {
            offer(
                Candidate::new(
                    "#load",
                    Classification::Snippet,
                    ready_description("#load \"<module>\"\nBind a module to the session"),
                )
                .complex_edit(""),
                &mut out,
            );
        }
        offer(
            Candidate::new(
                "if-else",
                Classification::Snippet,
                ready_description("if <condition> { } else { }"),
            )
            .complex_edit("conditional with an else branch"),
            &mut out,
        );
        out
    }

    /// Module names for the target of a `#load` being typed
    fn load_targets(&self, document: &Document<ScriptProgram>, line: &str) -> Option<Vec<Candidate>> {
        let partial = line.trim_start().strip_prefix("#load")?.trim_start().strip_prefix('"')?;
        let mut out: Vec<Candidate> = self
            .catalog()
            .iter()
            .filter(|def| def.name != PRELUDE && def.name.starts_with(partial))
            .filter(|def| !document.references().contains_module(&def.name))
            .map(|def| {
                Candidate::new(
                    def.name.as_str(),
                    Classification::Module,
                    ready_description(def.description.clone()),
                )
            })
            .collect();
        out.sort_by(|a, b| a.label.cmp(&b.label));
        Some(out)
    }
}

fn module_members(def: &Arc<ModuleDef>) -> Vec<Candidate> {
    let functions = def.functions.iter().map(|f| {
        let classification = if f.is_async() {
            Classification::AsyncFunction
        } else {
            Classification::Function
        };
        Candidate::new(
            f.name.as_str(),
            classification,
            describe_member(def.clone(), f.name.clone()),
        )
    });
    let constants = def.constants.iter().map(|c| {
        Candidate::new(
            c.name.as_str(),
            Classification::Constant,
            describe_member(def.clone(), c.name.clone()),
        )
    });
    functions.chain(constants).collect()
}

/// Renders a member's signature and doc only when the prompt asks for it
fn describe_member(def: Arc<ModuleDef>, name: String) -> DescriptionFn {
    Arc::new(move || -> DescriptionFuture {
        let def = def.clone();
        let name = name.clone();
        Box::pin(async move {
            if let Some(f) = def.find_function(&name) {
                format!("{}.{}: {}\n{}", def.name, f.name, f.signature(), f.doc)
            } else if let Some(c) = def.find_constant(&name) {
                format!("{}.{}: {} = {}\n{}", def.name, c.name, c.ty, c.value, c.doc)
            } else {
                String::new()
            }
        })
    })
}

fn classify(ty: &Type) -> Classification {
    match ty {
        Type::Fn(sig) if matches!(sig.returns, Type::Future(_)) => Classification::AsyncFunction,
        Type::Fn(_) => Classification::Function,
        Type::Module(_) => Classification::Module,
        _ => Classification::Variable,
    }
}

fn rank(classification: Classification) -> u8 {
    match classification {
        Classification::Variable | Classification::Property | Classification::Constant => 0,
        Classification::Function | Classification::AsyncFunction => 1,
        Classification::Module => 2,
        Classification::Keyword => 3,
        Classification::Snippet => 4,
        Classification::Other => 5,
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn trailing_ident(text: &str) -> &str {
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_ident_char(*c))
        .last()
        .map_or(text.len(), |(i, _)| i);
    &text[start..]
}

fn line_context(line: &str) -> LineContext {
    let mut in_string = false;
    let mut escaped = false;
    let mut prev = '\0';
    for c in line.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == '/' && prev == '/' {
            return LineContext::Comment;
        }
        prev = c;
    }
    if in_string {
        LineContext::String
    } else {
        LineContext::Code
    }
}
