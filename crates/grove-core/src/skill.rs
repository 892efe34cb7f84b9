use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input handed to a skill on invocation.
#[derive(Debug, Clone, Default)]
pub struct SkillInput {
    /// The original free-text query.
    pub query: String,
    /// Structured arguments, already checked against the leaf's schema.
    pub args: Map<String, Value>,
}

impl SkillInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            args: Map::new(),
        }
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(|v| v.as_str())
    }

    pub fn arg_f64(&self, name: &str) -> Option<f64> {
        self.args.get(name).and_then(|v| v.as_f64())
    }
}

/// Tagged skill outcome. Skills report failure as data, not by unwinding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum SkillResult {
    Success(Value),
    Failure(String),
}

impl SkillResult {
    pub fn success(value: impl Into<Value>) -> Self {
        Self::Success(value.into())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Convert a fallible computation into a skill outcome.
    pub fn from_result<T, E>(result: std::result::Result<T, E>) -> Self
    where
        T: Into<Value>,
        E: std::fmt::Display,
    {
        match result {
            Ok(v) => Self::Success(v.into()),
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

/// Declared execution mode of a skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillMode {
    Sync,
    Async,
}

pub type SyncSkillFn = dyn Fn(SkillInput) -> SkillResult + Send + Sync;
pub type AsyncSkillFn = dyn Fn(SkillInput) -> BoxFuture<'static, SkillResult> + Send + Sync;

/// An externally supplied skill callable.
///
/// The variant fixes the execution mode at spawn time: synchronous skills run
/// on the engine's blocking worker pool, asynchronous ones are awaited in place.
#[derive(Clone)]
pub enum Skill {
    Sync(Arc<SyncSkillFn>),
    Async(Arc<AsyncSkillFn>),
}

impl Skill {
    /// Wrap a blocking function.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(SkillInput) -> SkillResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap an async function.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(SkillInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SkillResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |input| Box::pin(f(input))))
    }

    pub fn mode(&self) -> SkillMode {
        match self {
            Self::Sync(_) => SkillMode::Sync,
            Self::Async(_) => SkillMode::Async,
        }
    }
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Skill").field(&self.mode()).finish()
    }
}

/// One declared parameter of a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// Type name: string, number, integer, boolean, object, array, or any.
    #[serde(rename = "type", default = "default_param_type")]
    pub ty: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_param_type() -> String {
    "any".to_string()
}

fn default_required() -> bool {
    true
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(mut self, default: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.ty.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        }
    }
}

/// Ordered parameter schema captured when a leaf is spawned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema {
    pub params: Vec<ParamSpec>,
}

impl ParameterSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    /// Render as `name: type, ...` for embeddable text and prompts.
    pub fn render(&self) -> String {
        self.params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check arguments against the schema, filling in defaults.
    ///
    /// Unknown keys are kept. Returns a description of the first violation.
    pub fn validate(&self, args: &Map<String, Value>) -> std::result::Result<Map<String, Value>, String> {
        let mut out = args.clone();
        for param in &self.params {
            match args.get(&param.name) {
                Some(value) if !param.accepts(value) => {
                    return Err(format!(
                        "parameter '{}' expected {}, got {}",
                        param.name, param.ty, value
                    ));
                }
                Some(_) => {}
                None => {
                    if let Some(ref default) = param.default {
                        out.insert(param.name.clone(), default.clone());
                    } else if param.required {
                        return Err(format!("missing required parameter '{}'", param.name));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Arguments made only of declared defaults.
    pub fn defaults(&self) -> Map<String, Value> {
        self.params
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_schema() -> ParameterSchema {
        ParameterSchema::new(vec![
            ParamSpec::new("a", "number"),
            ParamSpec::new("b", "number").optional(0),
        ])
    }

    #[test]
    fn test_render_schema() {
        assert_eq!(add_schema().render(), "a: number, b: number");
        assert_eq!(ParameterSchema::default().render(), "");
    }

    #[test]
    fn test_validate_fills_defaults() {
        let args = json!({"a": 2}).as_object().unwrap().clone();
        let out = add_schema().validate(&args).unwrap();
        assert_eq!(out["a"], json!(2));
        assert_eq!(out["b"], json!(0));
        assert_eq!(add_schema().defaults(), json!({"b": 0}).as_object().unwrap().clone());
    }

    #[test]
    fn test_validate_rejects_missing_and_mistyped() {
        let missing = Map::new();
        assert!(add_schema().validate(&missing).unwrap_err().contains("'a'"));

        let wrong = json!({"a": "two"}).as_object().unwrap().clone();
        assert!(add_schema().validate(&wrong).unwrap_err().contains("expected number"));
    }

    #[test]
    fn test_skill_mode_follows_variant() {
        let sync = Skill::blocking(|_| SkillResult::success(1));
        let fut = Skill::future(|_| async { SkillResult::success(1) });
        assert_eq!(sync.mode(), SkillMode::Sync);
        assert_eq!(fut.mode(), SkillMode::Async);
    }

    #[test]
    fn test_from_result() {
        let ok: std::result::Result<i64, String> = Ok(5);
        assert_eq!(SkillResult::from_result(ok), SkillResult::Success(json!(5)));
        let err: std::result::Result<i64, String> = Err("boom".into());
        assert_eq!(SkillResult::from_result(err), SkillResult::Failure("boom".into()));
    }
}
