//! Compiles and memoises the CEL rule expressions used by the `allowed`
//! approver's `validations` field.
//!
//! Supported surface: CEL's standard macros (`has`, `all`, `exists`, ...),
//! the standard string-extension functions (`startsWith`, `endsWith`,
//! `contains`, `size`, `.format`), and one helper registered on top of the
//! standard library: `ServiceAccount(s)`, returning a value with
//! `.getName()`, `.getNamespace()`, and `.isServiceAccount()` — built by
//! splitting a Kubernetes service-account username of the form
//! `system:serviceaccount:<namespace>:<name>`. Ill-formed input produces a
//! value whose `isServiceAccount()` is `false`; two such values compare
//! equal component-wise, same as any other CEL map.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cel_interpreter::extractors::This;
use cel_interpreter::objects::Value as CelValue;
use cel_interpreter::{Context, Program};
use thiserror::Error;

/// The subset of request fields visible to rule expressions as `cr`.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub name: String,
    pub namespace: String,
    pub username: String,
}

#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct CompileError(String);

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("evaluating rule: {0}")]
    Execution(String),
    #[error("rule did not evaluate to a boolean")]
    NotBoolean,
}

type CacheSlot = Result<Arc<Program>, Arc<CompileError>>;

/// Process-lifetime memoisation of compiled rules, keyed by expression
/// text. The compile step itself may run concurrently for the same key;
/// only one result per key is ever observed afterwards.
#[derive(Default)]
pub struct Cache {
    entries: RwLock<HashMap<String, CacheSlot>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `expr` if not already cached, returning the cached
    /// validator (or cached compile error) either way.
    pub fn get_or_compile(&self, expr: &str) -> CacheSlot {
        if let Some(cached) = self.entries.read().unwrap().get(expr) {
            return cached.clone();
        }

        let compiled = Program::compile(expr)
            .map(Arc::new)
            .map_err(|e| Arc::new(CompileError(e.to_string())));

        let mut entries = self.entries.write().unwrap();
        entries
            .entry(expr.to_string())
            .or_insert(compiled)
            .clone()
    }

    /// Evaluate a previously compiled rule against `value` (bound as
    /// `self`) and `cr`. Internal evaluation failures — execution errors,
    /// or a rule that does not produce a boolean — are reported through
    /// `EvalError`, never surfaced as a rule match/mismatch.
    pub fn validate(
        &self,
        program: &Program,
        value: &str,
        cr: &RequestContext,
    ) -> Result<bool, EvalError> {
        let mut context = Context::default();
        register_helpers(&mut context);

        context
            .add_variable("self", value.to_string())
            .map_err(|e| EvalError::Execution(e.to_string()))?;
        context
            .add_variable(
                "cr",
                CelValue::Map(
                    [
                        ("name".into(), CelValue::String(Arc::new(cr.name.clone()))),
                        (
                            "namespace".into(),
                            CelValue::String(Arc::new(cr.namespace.clone())),
                        ),
                        (
                            "username".into(),
                            CelValue::String(Arc::new(cr.username.clone())),
                        ),
                    ]
                    .into_iter()
                    .collect::<HashMap<_, _>>()
                    .into(),
                ),
            )
            .map_err(|e| EvalError::Execution(e.to_string()))?;

        match program.execute(&context) {
            Ok(CelValue::Bool(b)) => Ok(b),
            Ok(_) => Err(EvalError::NotBoolean),
            Err(e) => Err(EvalError::Execution(e.to_string())),
        }
    }
}

fn register_helpers(context: &mut Context) {
    context
        .add_function("ServiceAccount", service_account)
        .ok();
    context.add_function("getName", get_name).ok();
    context.add_function("getNamespace", get_namespace).ok();
    context
        .add_function("isServiceAccount", is_service_account)
        .ok();
}

fn service_account(username: Arc<String>) -> CelValue {
    let parts: Vec<&str> = username.splitn(4, ':').collect();
    let (namespace, name, valid) = match parts.as_slice() {
        ["system", "serviceaccount", ns, name] => (ns.to_string(), name.to_string(), true),
        _ => (String::new(), String::new(), false),
    };

    CelValue::Map(
        [
            ("namespace".into(), CelValue::String(Arc::new(namespace))),
            ("name".into(), CelValue::String(Arc::new(name))),
            ("isServiceAccount".into(), CelValue::Bool(valid)),
        ]
        .into_iter()
        .collect::<HashMap<_, _>>()
        .into(),
    )
}

fn get_name(This(sa): This<CelValue>) -> String {
    map_string_field(&sa, "name")
}

fn get_namespace(This(sa): This<CelValue>) -> String {
    map_string_field(&sa, "namespace")
}

fn is_service_account(This(sa): This<CelValue>) -> bool {
    match sa {
        CelValue::Map(map) => matches!(
            map.map.get(&"isServiceAccount".into()),
            Some(CelValue::Bool(true))
        ),
        _ => false,
    }
}

fn map_string_field(value: &CelValue, field: &str) -> String {
    match value {
        CelValue::Map(map) => match map.map.get(&field.into()) {
            Some(CelValue::String(s)) => s.as_str().to_string(),
            _ => String::new(),
        },
        _ => String::new(),
    }
}
