//! C5 — Configuration Model & Validator
//!
//! The typed declarative model (§3) plus structural, naming, and scope
//! validation performed eagerly over the parsed tree. Grounded on
//! `PyRo1121-omg`'s `config/settings.rs` (serde-derived config structs,
//! `toml` parsing, `thiserror`-backed validation errors) generalized from
//! flat user settings to the hierarchical runner configuration.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::core::error::ConfigError;
use crate::core::variables::{determine_scope, Scope, VarValue};

/// Risk ceiling as written in configuration. `Critical` is never
/// constructible from configuration text (§4.5, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfiguredRiskLevel {
    Low,
    Medium,
    High,
}

impl Default for ConfiguredRiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawVars(HashMap<String, RawVarValue>);

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawVarValue {
    Scalar(String),
    List(Vec<String>),
}

impl From<RawVarValue> for VarValue {
    fn from(raw: RawVarValue) -> Self {
        match raw {
            RawVarValue::Scalar(s) => VarValue::Scalar(s),
            RawVarValue::List(items) => VarValue::List(items),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawGlobalSection {
    #[serde(default)]
    pub vars: HashMap<String, RawVarValue>,
    #[serde(default)]
    pub verify_files: Vec<String>,
    #[serde(default)]
    pub env_allowlist: Vec<String>,
    #[serde(default)]
    pub skip_standard_paths: bool,
    pub hash_directory: Option<String>,
    pub from_env_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCommandTemplate {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub workdir: Option<String>,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCommandBody {
    #[serde(deny_unknown_fields)]
    Templated {
        template: String,
        #[serde(default)]
        params: HashMap<String, RawVarValue>,
    },
    #[serde(deny_unknown_fields)]
    Inline {
        cmd: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: Vec<String>,
        workdir: Option<String>,
    },
}

// `RawCommandSpec` cannot itself carry `deny_unknown_fields`: serde forbids
// combining it with a `#[serde(flatten)]` field. Unknown-field rejection for
// the command body still happens because every `RawCommandBody` variant
// denies unknown fields, so a typo'd key fails to match either variant and
// the untagged enum's own deserialization fails closed.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCommandSpec {
    #[serde(flatten)]
    pub body: RawCommandBody,
    #[serde(default)]
    pub max_risk_level: Option<String>,
    pub run_as_user: Option<String>,
    pub run_as_group: Option<String>,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawGroup {
    pub name: String,
    #[serde(default)]
    pub vars: HashMap<String, RawVarValue>,
    #[serde(default)]
    pub verify_files: Vec<String>,
    #[serde(default)]
    pub env_allowlist: Vec<String>,
    #[serde(default)]
    pub commands: Vec<RawCommandSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub global: RawGlobalSection,
    #[serde(default)]
    pub command_templates: HashMap<String, RawCommandTemplate>,
    #[serde(default)]
    pub groups: Vec<RawGroup>,
}

impl Default for RawGlobalSection {
    fn default() -> Self {
        Self {
            vars: HashMap::new(),
            verify_files: Vec::new(),
            env_allowlist: Vec::new(),
            skip_standard_paths: false,
            hash_directory: None,
            from_env_file: None,
        }
    }
}

/// Parse raw TOML text into the unvalidated tree. Duplicate keys within a
/// table are rejected by the underlying `toml` parser itself, and unknown
/// keys are rejected by the `deny_unknown_fields` attributes on every raw
/// struct (§4.5) and surfaced as [`ConfigError::UnknownField`].
pub fn parse(text: &str) -> Result<RawConfig, ConfigError> {
    toml::from_str(text).map_err(map_parse_error)
}

fn map_parse_error(e: toml::de::Error) -> ConfigError {
    let rendered = e.to_string();
    if let Some(field) = rendered
        .split("unknown field `")
        .nth(1)
        .and_then(|rest| rest.split('`').next())
    {
        return ConfigError::UnknownField {
            section: "configuration".to_string(),
            field: field.to_string(),
        };
    }
    ConfigError::ParseError(rendered)
}

/// Command specification after validation, in the typed model of §3.
#[derive(Debug, Clone)]
pub enum CommandBody {
    Templated {
        template: String,
        params: HashMap<String, VarValue>,
    },
    Inline {
        cmd: String,
        args: Vec<String>,
        env: Vec<String>,
        workdir: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub body: CommandBody,
    pub max_risk_level: ConfiguredRiskLevel,
    pub run_as_user: Option<String>,
    pub run_as_group: Option<String>,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub cmd: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub workdir: Option<String>,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub name: String,
    pub vars: HashMap<String, VarValue>,
    pub verify_files: Vec<String>,
    pub env_allowlist: Vec<String>,
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Clone)]
pub struct GlobalSection {
    pub vars: HashMap<String, VarValue>,
    pub verify_files: Vec<String>,
    pub env_allowlist: Vec<String>,
    pub skip_standard_paths: bool,
    pub hash_directory: Option<String>,
    pub from_env_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub global: GlobalSection,
    pub command_templates: HashMap<String, CommandTemplate>,
    pub groups: Vec<GroupSpec>,
}

fn validate_vars(
    raw: HashMap<String, RawVarValue>,
    expected: Scope,
    location: &str,
) -> Result<HashMap<String, VarValue>, ConfigError> {
    let mut out = HashMap::with_capacity(raw.len());
    for (name, value) in raw {
        if name.starts_with("__") {
            return Err(ConfigError::ReservedVariableName(name));
        }
        match determine_scope(&name) {
            Scope::Invalid => return Err(ConfigError::InvalidVariableName(name)),
            actual if actual == expected => {}
            actual => {
                return Err(ConfigError::ScopeMismatch {
                    name,
                    location: location.to_string(),
                    expected: scope_label(expected),
                    actual: scope_label(actual),
                });
            }
        }
        out.insert(name, value.into());
    }
    Ok(out)
}

fn scope_label(scope: Scope) -> &'static str {
    match scope {
        Scope::Global => "Global",
        Scope::Local => "Local",
        Scope::Invalid => "Invalid",
    }
}

fn validate_risk_level(raw: Option<String>, location: &str) -> Result<ConfiguredRiskLevel, ConfigError> {
    match raw {
        None => Ok(ConfiguredRiskLevel::Low),
        Some(s) if s.eq_ignore_ascii_case("critical") => {
            Err(ConfigError::InvalidMaxRiskLevel {
                location: location.to_string(),
            })
        }
        Some(s) => match s.to_ascii_lowercase().as_str() {
            "low" => Ok(ConfiguredRiskLevel::Low),
            "medium" => Ok(ConfiguredRiskLevel::Medium),
            "high" => Ok(ConfiguredRiskLevel::High),
            _ => Err(ConfigError::UnknownField {
                section: location.to_string(),
                field: format!("max_risk_level = \"{s}\""),
            }),
        },
    }
}

fn validate_command(raw: RawCommandSpec, location: &str) -> Result<CommandSpec, ConfigError> {
    let body = match raw.body {
        RawCommandBody::Templated { template, params } => CommandBody::Templated {
            template,
            params: params.into_iter().map(|(k, v)| (k, v.into())).collect(),
        },
        RawCommandBody::Inline {
            cmd,
            args,
            env,
            workdir,
        } => CommandBody::Inline {
            cmd,
            args,
            env,
            workdir,
        },
    };
    Ok(CommandSpec {
        body,
        max_risk_level: validate_risk_level(raw.max_risk_level, location)?,
        run_as_user: raw.run_as_user,
        run_as_group: raw.run_as_group,
        timeout: raw.timeout,
    })
}

fn validate_group(raw: RawGroup) -> Result<GroupSpec, ConfigError> {
    let location = format!("[[groups]] name={}", raw.name);
    let vars = validate_vars(raw.vars, Scope::Local, &format!("{location}.vars"))?;
    let mut commands = Vec::with_capacity(raw.commands.len());
    for (idx, raw_cmd) in raw.commands.into_iter().enumerate() {
        let cmd_location = format!("{location}.commands[{idx}]");
        commands.push(validate_command(raw_cmd, &cmd_location)?);
    }
    Ok(GroupSpec {
        name: raw.name,
        vars,
        verify_files: raw.verify_files,
        env_allowlist: raw.env_allowlist,
        commands,
    })
}

/// Validate a parsed [`RawConfig`] into the typed [`RunnerConfig`] model,
/// performing structural, naming, and scope checks (§4.5). Group names must
/// be unique; duplicate group names are a structural error.
pub fn validate(raw: RawConfig) -> Result<RunnerConfig, ConfigError> {
    let global_vars = validate_vars(raw.global.vars, Scope::Global, "[global.vars]")?;

    let mut seen_names = HashSet::new();
    let mut groups = Vec::with_capacity(raw.groups.len());
    for group in raw.groups {
        if !seen_names.insert(group.name.clone()) {
            return Err(ConfigError::DuplicateKey {
                section: "[[groups]]".to_string(),
                key: group.name,
            });
        }
        groups.push(validate_group(group)?);
    }

    let mut command_templates = HashMap::with_capacity(raw.command_templates.len());
    for (name, tmpl) in raw.command_templates {
        command_templates.insert(
            name,
            CommandTemplate {
                cmd: tmpl.cmd,
                args: tmpl.args,
                env: tmpl.env,
                workdir: tmpl.workdir,
                timeout: tmpl.timeout,
            },
        );
    }

    Ok(RunnerConfig {
        global: GlobalSection {
            vars: global_vars,
            verify_files: raw.global.verify_files,
            env_allowlist: raw.global.env_allowlist,
            skip_standard_paths: raw.global.skip_standard_paths,
            hash_directory: raw.global.hash_directory,
            from_env_file: raw.global.from_env_file,
        },
        command_templates,
        groups,
    })
}

/// Parse and validate in one step.
pub fn load(text: &str) -> Result<RunnerConfig, ConfigError> {
    validate(parse(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1_CONFIG: &str = r#"
[global]
verify_files = ["/etc/cfg"]

[global.vars]
AwsPath = "/usr/local/bin/aws"

[command_templates.s3_sync]
cmd = "%{AwsPath}"
args = ["s3", "sync", "${src}", "${dst}"]

[[groups]]
name = "backup"
verify_files = ["/etc/cfg"]

[[groups.commands]]
template = "s3_sync"
params = { src = "/data", dst = "s3://b" }
max_risk_level = "low"
"#;

    #[test]
    fn s1_happy_path_parses_and_validates() {
        let config = load(S1_CONFIG).unwrap();
        assert_eq!(
            config.global.vars.get("AwsPath").and_then(VarValue::as_scalar),
            Some("/usr/local/bin/aws")
        );
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.groups[0].name, "backup");
        assert_eq!(config.groups[0].commands.len(), 1);
    }

    #[test]
    fn s5_scope_violation_in_global_vars() {
        let text = r#"
[global.vars]
aws_path = "/usr/local/bin/aws"
"#;
        let err = load(text).unwrap_err();
        match err {
            ConfigError::ScopeMismatch {
                name,
                expected,
                actual,
                ..
            } => {
                assert_eq!(name, "aws_path");
                assert_eq!(expected, "Global");
                assert_eq!(actual, "Local");
            }
            other => panic!("expected ScopeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn rejects_critical_max_risk_level() {
        let text = r#"
[[groups]]
name = "g"

[[groups.commands]]
cmd = "ls"
max_risk_level = "critical"
"#;
        let err = load(text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMaxRiskLevel { .. }));
    }

    #[test]
    fn rejects_reserved_prefix_everywhere() {
        let text = r#"
[global.vars]
__Secret = "x"
"#;
        let err = load(text).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedVariableName(_)));
    }

    #[test]
    fn rejects_duplicate_group_names() {
        let text = r#"
[[groups]]
name = "dup"

[[groups]]
name = "dup"
"#;
        let err = load(text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKey { .. }));
    }

    #[test]
    fn group_vars_must_be_local() {
        let text = r#"
[[groups]]
name = "g"
vars = { Shared = "x" }
"#;
        let err = load(text).unwrap_err();
        assert!(matches!(err, ConfigError::ScopeMismatch { .. }));
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        let text = r#"
bogus_field = "x"

[[groups]]
name = "g"
"#;
        let err = load(text).unwrap_err();
        match err {
            ConfigError::UnknownField { field, .. } => assert_eq!(field, "bogus_field"),
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_field_in_inline_command() {
        let text = r#"
[[groups]]
name = "g"

[[groups.commands]]
cmd = "ls"
typo_field = "oops"
"#;
        let err = load(text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { .. }));
    }

    #[test]
    fn default_max_risk_level_is_low() {
        let text = r#"
[[groups]]
name = "g"

[[groups.commands]]
cmd = "ls"
"#;
        let config = load(text).unwrap();
        assert_eq!(
            config.groups[0].commands[0].max_risk_level,
            ConfiguredRiskLevel::Low
        );
    }
}
