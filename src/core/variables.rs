//! C4 — Variable Registry & Expansion
//!
//! Scoped variable namespaces and the two-stage, non-recursive template
//! expansion pipeline. Scope is a pure function of the variable's first
//! character; a single shared parser backs expansion, validation, and
//! reference-collection so the set of recognized tokens never drifts
//! between call sites. Grounded on `PyRo1121-omg`'s `core/error.rs` style
//! of precise, named error variants — the parser itself has no teacher
//! analogue in the pack and is this crate's own composition of the spec's
//! substitution rules.

use std::collections::HashMap;

use crate::core::error::ConfigError;

/// A variable's value: a scalar string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarValue {
    Scalar(String),
    List(Vec<String>),
}

impl VarValue {
    #[must_use]
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::List(_) => None,
        }
    }
}

/// The scope a variable name implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Local,
    Invalid,
}

/// Determine scope from a variable name's first character (spec §3, §8.3).
#[must_use]
pub fn determine_scope(name: &str) -> Scope {
    let Some(first) = name.chars().next() else {
        return Scope::Invalid;
    };
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Scope::Invalid;
    }
    if first.is_ascii_uppercase() {
        Scope::Global
    } else if first.is_ascii_lowercase() || first == '_' {
        if name.starts_with("__") {
            Scope::Invalid
        } else {
            Scope::Local
        }
    } else {
        Scope::Invalid
    }
}

fn validate_name(name: &str, expected: Scope) -> Result<(), ConfigError> {
    if name.starts_with("__") {
        return Err(ConfigError::ReservedVariableName(name.to_string()));
    }
    match determine_scope(name) {
        Scope::Invalid => Err(ConfigError::InvalidVariableName(name.to_string())),
        actual if actual == expected => Ok(()),
        actual => Err(ConfigError::ScopeMismatch {
            name: name.to_string(),
            location: "registry".to_string(),
            expected: scope_label(expected),
            actual: scope_label(actual),
        }),
    }
}

fn scope_label(scope: Scope) -> &'static str {
    match scope {
        Scope::Global => "Global",
        Scope::Local => "Local",
        Scope::Invalid => "Invalid",
    }
}

/// Error returned by [`VariableRegistry::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("undefined global variable '{0}'")]
    UndefinedGlobal(String),
    #[error("undefined local variable '{0}'")]
    UndefinedLocal(String),
    #[error("invalid variable name '{0}'")]
    InvalidName(String),
}

/// Two disjoint namespaces: `Globals` and `Locals` (spec §3).
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    globals: HashMap<String, VarValue>,
    locals: HashMap<String, VarValue>,
}

impl VariableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Global variable; fails unless `name` is uppercase-led and
    /// matches the character rule.
    pub fn register_global(&mut self, name: &str, value: VarValue) -> Result<(), ConfigError> {
        validate_name(name, Scope::Global)?;
        self.globals.insert(name.to_string(), value);
        Ok(())
    }

    /// Derive a child registry sharing this registry's globals by copy, with
    /// `locals` attached as the child's Local namespace. The parent is
    /// unchanged.
    pub fn with_locals(
        &self,
        locals: HashMap<String, VarValue>,
    ) -> Result<VariableRegistry, ConfigError> {
        for name in locals.keys() {
            validate_name(name, Scope::Local)?;
        }
        Ok(VariableRegistry {
            globals: self.globals.clone(),
            locals,
        })
    }

    #[must_use]
    pub fn globals(&self) -> &HashMap<String, VarValue> {
        &self.globals
    }

    /// Resolve `name` against `Globals` if uppercase, `Locals` otherwise.
    pub fn resolve(&self, name: &str) -> Result<&VarValue, ResolveError> {
        match determine_scope(name) {
            Scope::Invalid => Err(ResolveError::InvalidName(name.to_string())),
            Scope::Global => self
                .globals
                .get(name)
                .ok_or_else(|| ResolveError::UndefinedGlobal(name.to_string())),
            Scope::Local => self
                .locals
                .get(name)
                .ok_or_else(|| ResolveError::UndefinedLocal(name.to_string())),
        }
    }
}

/// Parameters supplied at a template invocation site (stage 1 inputs).
#[derive(Debug, Clone, Default)]
pub struct ParamMap(HashMap<String, VarValue>);

impl ParamMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: VarValue) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.0.get(name)
    }
}

/// A reference discovered while parsing a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Param { name: String, splice: bool },
    Variable(String),
}

/// The shared parser: tokenizes a raw string into literal runs and
/// `${param}` / `%{Var}` references, honoring `\$`, `\%`, `\\` escapes.
/// Used identically by expansion, template validation, and reference
/// collection so every caller recognizes the same token grammar.
#[must_use]
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() && matches!(chars[i + 1], '$' | '%' | '\\') => {
                literal.push(chars[i + 1]);
                i += 2;
            }
            '$' if i + 1 < chars.len() && chars[i + 1] == '{' => {
                if let Some(end) = find_close(&chars, i + 2) {
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    let raw: String = chars[i + 2..end].iter().collect();
                    let (name, splice) = match raw.strip_prefix('@') {
                        Some(rest) => (rest.to_string(), true),
                        None => (raw, false),
                    };
                    tokens.push(Token::Param { name, splice });
                    i = end + 1;
                } else {
                    literal.push(c);
                    i += 1;
                }
            }
            '%' if i + 1 < chars.len() && chars[i + 1] == '{' => {
                if let Some(end) = find_close(&chars, i + 2) {
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    let name: String = chars[i + 2..end].iter().collect();
                    tokens.push(Token::Variable(name));
                    i = end + 1;
                } else {
                    literal.push(c);
                    i += 1;
                }
            }
            _ => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

fn find_close(chars: &[char], start: usize) -> Option<usize> {
    chars[start..]
        .iter()
        .position(|&c| c == '}')
        .map(|offset| start + offset)
}

/// Stage 1: substitute `${param}` references from `params`. Returns an
/// error on an undefined parameter or a type mismatch (list used in a
/// scalar position).
pub fn expand_params(
    template: &str,
    field: &str,
    location: &str,
    params: &ParamMap,
) -> Result<String, ConfigError> {
    let mut out = String::new();
    for token in tokenize(template) {
        match token {
            Token::Literal(lit) => out.push_str(&lit),
            Token::Variable(name) => {
                out.push('%');
                out.push('{');
                out.push_str(&name);
                out.push('}');
            }
            Token::Param { name, splice } => {
                let value = params
                    .get(&name)
                    .ok_or_else(|| ConfigError::UndefinedParameter {
                        param: name.clone(),
                        location: location.to_string(),
                    })?;
                match (value, splice) {
                    (VarValue::Scalar(s), false) => out.push_str(s),
                    (VarValue::List(items), true) => out.push_str(&items.join(" ")),
                    (VarValue::List(_), false) | (VarValue::Scalar(_), true) => {
                        return Err(ConfigError::ParameterTypeMismatch {
                            param: name,
                            location: location.to_string(),
                        });
                    }
                }
            }
        }
    }
    let _ = (template, field);
    Ok(out)
}

/// Stage 2: substitute `%{Name}` references from `registry`. Non-recursive:
/// the substituted value is emitted literally and never re-tokenized.
pub fn expand_variables(
    input: &str,
    registry: &VariableRegistry,
) -> Result<String, ResolveError> {
    let mut out = String::new();
    for token in tokenize(input) {
        match token {
            Token::Literal(lit) => out.push_str(&lit),
            Token::Param { name, splice } => {
                out.push('$');
                out.push('{');
                if splice {
                    out.push('@');
                }
                out.push_str(&name);
                out.push('}');
            }
            Token::Variable(name) => {
                let value = registry.resolve(&name)?;
                match value {
                    VarValue::Scalar(s) => out.push_str(s),
                    VarValue::List(items) => out.push_str(&items.join(" ")),
                }
            }
        }
    }
    Ok(out)
}

/// Full two-stage expansion of a template string at an invocation site.
pub fn expand(
    template: &str,
    field: &str,
    location: &str,
    params: &ParamMap,
    registry: &VariableRegistry,
) -> Result<String, ConfigError> {
    let stage1 = expand_params(template, field, location, params)?;
    expand_variables(&stage1, registry).map_err(|e| match e {
        ResolveError::UndefinedGlobal(name) => ConfigError::UndefinedGlobalInTemplate {
            template: location.to_string(),
            field: field.to_string(),
            name,
        },
        ResolveError::UndefinedLocal(name) => ConfigError::UndefinedLocalInTemplate {
            template: location.to_string(),
            field: field.to_string(),
            name,
        },
        ResolveError::InvalidName(name) => ConfigError::InvalidVariableName(name),
    })
}

/// Template validation (§4.4): every `%{Name}` reference in a template
/// string must name a Global variable defined in `globals`.
pub fn validate_template_string(
    input: &str,
    template_name: &str,
    field: &str,
    globals: &HashMap<String, VarValue>,
) -> Result<(), ConfigError> {
    for token in tokenize(input) {
        if let Token::Variable(name) = token {
            match determine_scope(&name) {
                Scope::Global => {
                    if !globals.contains_key(&name) {
                        return Err(ConfigError::UndefinedGlobalInTemplate {
                            template: template_name.to_string(),
                            field: field.to_string(),
                            name,
                        });
                    }
                }
                Scope::Local | Scope::Invalid => {
                    return Err(ConfigError::LocalVariableInTemplate {
                        template: template_name.to_string(),
                        field: field.to_string(),
                        name,
                    });
                }
            }
        }
    }
    Ok(())
}
