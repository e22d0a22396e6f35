use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::ScriptError;
use crate::scope::ScriptScope;

type FunctionBody = dyn Fn(&ScriptScope, &[ScriptValue]) -> Result<ScriptValue, ScriptError>;

/// A callable guest or host function.
///
/// Engines wrap their compiled closures in this type; the host wraps its API
/// functions the same way, so both live side by side in an environment.
#[derive(Clone)]
pub struct ScriptFunction {
    name: Option<Rc<str>>,
    body: Rc<FunctionBody>,
}

impl ScriptFunction {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&ScriptScope, &[ScriptValue]) -> Result<ScriptValue, ScriptError> + 'static,
    {
        Self {
            name: None,
            body: Rc::new(body),
        }
    }

    pub fn named<F>(name: &str, body: F) -> Self
    where
        F: Fn(&ScriptScope, &[ScriptValue]) -> Result<ScriptValue, ScriptError> + 'static,
    {
        Self {
            name: Some(Rc::from(name)),
            body: Rc::new(body),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn call(&self, scope: &ScriptScope, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
        (self.body)(scope, args)
    }

    pub fn ptr_eq(&self, other: &ScriptFunction) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "function: {}", name),
            None => write!(f, "function: {:p}", Rc::as_ptr(&self.body) as *const ()),
        }
    }
}

impl PartialEq for ScriptFunction {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// A value crossing the host/guest boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ScriptValue {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ScriptValue>),
    Table(BTreeMap<String, ScriptValue>),
    Function(ScriptFunction),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Int(_) | ScriptValue::Float(_) => "number",
            ScriptValue::Str(_) => "string",
            ScriptValue::List(_) | ScriptValue::Table(_) => "table",
            ScriptValue::Function(_) => "function",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ScriptFunction> {
        match self {
            ScriptValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ScriptValue]> {
        match self {
            ScriptValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Nil => write!(f, "nil"),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Int(i) => write!(f, "{}", i),
            ScriptValue::Float(x) => write!(f, "{}", x),
            ScriptValue::Str(s) => write!(f, "{}", s),
            ScriptValue::List(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            ScriptValue::Table(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", key, value)?;
                }
                write!(f, "}}")
            }
            ScriptValue::Function(function) => write!(f, "{:?}", function),
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Int(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Float(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::Str(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::Str(value)
    }
}

impl From<Vec<ScriptValue>> for ScriptValue {
    fn from(value: Vec<ScriptValue>) -> Self {
        ScriptValue::List(value)
    }
}

impl From<ScriptFunction> for ScriptValue {
    fn from(value: ScriptFunction) -> Self {
        ScriptValue::Function(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(ScriptValue::Nil.type_name(), "nil");
        assert_eq!(ScriptValue::from(3i64).type_name(), "number");
        assert_eq!(ScriptValue::from("x").type_name(), "string");
        assert_eq!(ScriptValue::List(vec![]).type_name(), "table");
    }

    #[test]
    fn test_function_equality_is_identity() {
        let a = ScriptFunction::new(|_, _| Ok(ScriptValue::Nil));
        let b = ScriptFunction::new(|_, _| Ok(ScriptValue::Nil));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_list() {
        let value = ScriptValue::List(vec!["a".into(), 2i64.into(), ScriptValue::Nil]);
        assert_eq!(value.to_string(), "{a, 2, nil}");
    }
}
