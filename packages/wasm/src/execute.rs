//! What a wasm element runs, and what it reports.

use std::fmt;

use serde::{Deserialize, Serialize};
use wasmtime::{Val, ValType};

use crate::error::{Result, WasmError};

pub const DEFAULT_FUNCTION: &str = "_start";

fn default_function() -> String {
    DEFAULT_FUNCTION.to_string()
}

/// A module file and the exported function to call in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execute {
    /// `.wasm` binary or `.wat` text on the hosting server.
    pub path: String,

    #[serde(default = "default_function")]
    pub function: String,

    /// One per function parameter, parsed by the parameter's type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Remove the element from its anchor once the call finishes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub scrub: bool,
}

impl Execute {
    pub fn new(path: &str, function: &str) -> Self {
        Execute {
            path: path.to_string(),
            function: function.to_string(),
            args: Vec::new(),
            scrub: false,
        }
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WasmPhase {
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl WasmPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WasmPhase::Running)
    }
}

impl fmt::Display for WasmPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WasmPhase::Running => "running",
            WasmPhase::Completed => "completed",
            WasmPhase::Failed => "failed",
            WasmPhase::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasmStat {
    pub phase: WasmPhase,
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WasmStat {
    pub(crate) fn running() -> Self {
        WasmStat {
            phase: WasmPhase::Running,
            results: Vec::new(),
            error: None,
        }
    }
}

/// Parse textual arguments against the parameter types of `function`.
pub(crate) fn parse_args<I>(function: &str, params: I, args: &[String]) -> Result<Vec<Val>>
where
    I: ExactSizeIterator<Item = ValType>,
{
    let bad = |message: String| WasmError::BadArguments {
        function: function.to_string(),
        message,
    };
    if params.len() != args.len() {
        return Err(bad(format!(
            "expecting {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }
    params
        .zip(args)
        .map(|(ty, arg)| {
            let arg = arg.trim();
            let parsed = match &ty {
                ValType::I32 => arg.parse::<i32>().ok().map(Val::I32),
                ValType::I64 => arg.parse::<i64>().ok().map(Val::I64),
                ValType::F32 => arg.parse::<f32>().ok().map(|f| Val::F32(f.to_bits())),
                ValType::F64 => arg.parse::<f64>().ok().map(|f| Val::F64(f.to_bits())),
                other => return Err(bad(format!("parameter type {} not supported", other))),
            };
            parsed.ok_or_else(|| bad(format!("{:?} is not a valid {}", arg, ty)))
        })
        .collect()
}

pub(crate) fn render(val: &Val) -> String {
    match val {
        Val::I32(v) => v.to_string(),
        Val::I64(v) => v.to_string(),
        Val::F32(bits) => f32::from_bits(*bits).to_string(),
        Val::F64(bits) => f64::from_bits(*bits).to_string(),
        other => format!("{:?}", other),
    }
}
