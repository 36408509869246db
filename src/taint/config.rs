//! Taint rule configuration.
//!
//! Rules are loaded from a YAML document with three arrays:
//!
//! ```yaml
//! sources:
//!   - { method: "<Benchmark: String getSecret()>", type: "String" }
//! transfers:
//!   - { method: "<String: String concat(String)>", from: 0, to: result, type: "String" }
//! sinks:
//!   - { method: "<Log: void log(String)>", index: 0 }
//! ```
//!
//! `from`/`to` accept argument positions (`0`, `1`, ...) or the words `base`
//! and `result`, encoded internally as `-1` and `-2`. Method signatures are
//! `<ClassName: subsignature>` and are resolved against the program when the
//! configuration is loaded; any unresolvable rule is a fatal configuration
//! error.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::ir::{MethodId, Program, TypeId, TypeKind};

/// Index code for the receiver of a call.
pub const BASE: i32 = -1;
/// Index code for the result of a call.
pub const RESULT: i32 = -2;

/// A resolved source rule: calls to `method` produce a taint object of type
/// `ty` at the call result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    pub method: MethodId,
    pub ty: TypeId,
}

/// A resolved transfer rule: taint on `from` propagates to `to` at calls to
/// `method`, producing taint of type `ty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaintTransfer {
    pub method: MethodId,
    pub from: i32,
    pub to: i32,
    pub ty: TypeId,
}

/// A resolved sink rule: taint reaching argument `index` of a call to
/// `method` is a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sink {
    pub method: MethodId,
    pub index: usize,
}

/// A fully resolved taint configuration.
#[derive(Debug, Default)]
pub struct TaintConfig {
    pub sources: Vec<Source>,
    pub transfers: Vec<TaintTransfer>,
    pub sinks: Vec<Sink>,
}

// =============================================================================
// Raw document
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    sources: Vec<RawSource>,
    #[serde(default)]
    transfers: Vec<RawTransfer>,
    #[serde(default)]
    sinks: Vec<RawSink>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    method: String,
    #[serde(rename = "type")]
    ty: String,
}

#[derive(Debug, Deserialize)]
struct RawTransfer {
    method: String,
    from: IndexCode,
    to: IndexCode,
    #[serde(rename = "type")]
    ty: String,
}

#[derive(Debug, Deserialize)]
struct RawSink {
    method: String,
    index: usize,
}

/// An argument position, or one of the words `base` / `result`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexCode {
    Int(i32),
    Word(String),
}

impl IndexCode {
    fn resolve(&self) -> Result<i32> {
        match self {
            IndexCode::Int(i) => Ok(*i),
            IndexCode::Word(w) => match w.as_str() {
                "base" => Ok(BASE),
                "result" => Ok(RESULT),
                other => Err(Error::TaintConfigResolve(format!(
                    "unknown index word `{other}` (expected `base`, `result`, or an integer)"
                ))),
            },
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

fn resolve_method(program: &Program, signature: &str) -> Result<MethodId> {
    let inner = signature
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| {
            Error::TaintConfigResolve(format!("malformed signature `{signature}`"))
        })?;
    let (class_name, subsig_text) = inner.split_once(':').ok_or_else(|| {
        Error::TaintConfigResolve(format!("malformed signature `{signature}`"))
    })?;
    let class_name = class_name.trim();
    let subsig_text = subsig_text.trim();
    let class = program.class_by_name(class_name).ok_or_else(|| {
        Error::TaintConfigResolve(format!("unknown class `{class_name}` in `{signature}`"))
    })?;
    let subsig = program.subsig_by_text(subsig_text).ok_or_else(|| {
        Error::TaintConfigResolve(format!("unknown method `{subsig_text}` in `{signature}`"))
    })?;
    program.class(class).declared_method(subsig).ok_or_else(|| {
        Error::TaintConfigResolve(format!("`{class_name}` does not declare `{subsig_text}`"))
    })
}

fn resolve_type(program: &Program, name: &str) -> Result<TypeId> {
    let class = program
        .class_by_name(name)
        .ok_or_else(|| Error::TaintConfigResolve(format!("unknown type `{name}`")))?;
    program
        .type_map
        .get(&TypeKind::Reference(class))
        .copied()
        .ok_or_else(|| Error::TaintConfigResolve(format!("type `{name}` is never used")))
}

impl TaintConfig {
    /// Load and resolve a configuration file.
    pub fn load(path: impl AsRef<Path>, program: &Program) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::TaintConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig =
            serde_yaml::from_str(&text).map_err(|source| Error::TaintConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::resolve(raw, program)?;
        info!(
            sources = config.sources.len(),
            transfers = config.transfers.len(),
            sinks = config.sinks.len(),
            "taint config loaded"
        );
        Ok(config)
    }

    /// Parse and resolve a configuration from a YAML string.
    pub fn from_yaml(text: &str, program: &Program) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(text)
            .map_err(|e| Error::TaintConfigResolve(format!("malformed document: {e}")))?;
        Self::resolve(raw, program)
    }

    fn resolve(raw: RawConfig, program: &Program) -> Result<Self> {
        let mut config = TaintConfig::default();
        for source in &raw.sources {
            config.sources.push(Source {
                method: resolve_method(program, &source.method)?,
                ty: resolve_type(program, &source.ty)?,
            });
        }
        for transfer in &raw.transfers {
            let from = transfer.from.resolve()?;
            let to = transfer.to.resolve()?;
            let valid = (from == BASE && to == RESULT) || (from >= 0 && to == BASE)
                || (from >= 0 && to == RESULT);
            if !valid {
                return Err(Error::TaintConfigResolve(format!(
                    "unsupported transfer shape from={from} to={to} in `{}`",
                    transfer.method
                )));
            }
            let method = resolve_method(program, &transfer.method)?;
            if from >= 0 {
                let arity = program.method(method).params.len();
                if from as usize >= arity {
                    return Err(Error::TaintConfigResolve(format!(
                        "transfer argument {from} out of range for `{}` ({arity} parameters)",
                        transfer.method
                    )));
                }
            }
            config.transfers.push(TaintTransfer {
                method,
                from,
                to,
                ty: resolve_type(program, &transfer.ty)?,
            });
        }
        for sink in &raw.sinks {
            let method = resolve_method(program, &sink.method)?;
            let arity = program.method(method).params.len();
            if sink.index >= arity {
                return Err(Error::TaintConfigResolve(format!(
                    "sink index {} out of range for `{}` ({} parameters)",
                    sink.index, sink.method, arity
                )));
            }
            config.sinks.push(Sink {
                method,
                index: sink.index,
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::ProgramBuilder;

    fn sample_program() -> Program {
        let mut b = ProgramBuilder::new();
        let object = b.class("Object").build();
        let string = b.class("String").build();
        let bench = b.class("Benchmark").superclass(object).build();
        let string_ty = b.reference_ty(string);

        let mut m = b.method(bench, "getSecret", "String getSecret()");
        m.set_static();
        m.set_ret_ty(string_ty);
        let s = m.var("s", string_ty);
        m.new_object(s, string_ty);
        m.ret(Some(s));
        m.build();

        let mut m = b.method(bench, "log", "void log(String)");
        m.set_static();
        m.param("msg", string_ty);
        m.ret(None);
        let log = m.build();

        b.entry(log).build()
    }

    #[test]
    fn test_parse_and_resolve() {
        let program = sample_program();
        let yaml = r#"
sources:
  - { method: "<Benchmark: String getSecret()>", type: "String" }
transfers:
  - { method: "<Benchmark: String getSecret()>", from: 0, to: result, type: "String" }
sinks:
  - { method: "<Benchmark: void log(String)>", index: 0 }
"#;
        let config = TaintConfig::from_yaml(yaml, &program).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.transfers.len(), 1);
        assert_eq!(config.transfers[0].to, RESULT);
        assert_eq!(config.sinks.len(), 1);
    }

    #[test]
    fn test_word_codes() {
        let program = sample_program();
        let yaml = r#"
transfers:
  - { method: "<Benchmark: String getSecret()>", from: base, to: result, type: "String" }
"#;
        let config = TaintConfig::from_yaml(yaml, &program).unwrap();
        assert_eq!(config.transfers[0].from, BASE);
        assert_eq!(config.transfers[0].to, RESULT);
    }

    #[test]
    fn test_unknown_method_is_error() {
        let program = sample_program();
        let yaml = r#"
sources:
  - { method: "<Benchmark: String missing()>", type: "String" }
"#;
        assert!(TaintConfig::from_yaml(yaml, &program).is_err());
    }

    #[test]
    fn test_invalid_transfer_shape_is_error() {
        let program = sample_program();
        let yaml = r#"
transfers:
  - { method: "<Benchmark: String getSecret()>", from: result, to: base, type: "String" }
"#;
        assert!(TaintConfig::from_yaml(yaml, &program).is_err());
    }

    #[test]
    fn test_sink_index_out_of_range_is_error() {
        let program = sample_program();
        let yaml = r#"
sinks:
  - { method: "<Benchmark: void log(String)>", index: 3 }
"#;
        assert!(TaintConfig::from_yaml(yaml, &program).is_err());
    }
}
