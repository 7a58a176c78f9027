//! Program variants and command-line construction
//!
//! Every variant of a case receives the same model path, auxiliary path and
//! arguments; [`ProgramVariant::command`] is the only place argv is
//! assembled, so variants can only differ in the program they invoke.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Language binding a sample program is written against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleLanguage {
    Python,
    Cpp,
    C,
}

impl SampleLanguage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Cpp => "cpp",
            Self::C => "c",
        }
    }
}

impl fmt::Display for SampleLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One concrete program expected to behave like its siblings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramVariant {
    /// Name used in reports (e.g. "python", "cpp")
    pub name: String,
    pub language: SampleLanguage,
    /// Executable or script path
    pub program: PathBuf,
    /// Interpreter that runs `program`, when it is a script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<PathBuf>,
}

impl ProgramVariant {
    /// A directly executable program.
    pub fn native(name: impl Into<String>, language: SampleLanguage, program: PathBuf) -> Self {
        Self { name: name.into(), language, program, interpreter: None }
    }

    /// A script launched through `interpreter`.
    pub fn script(name: impl Into<String>, interpreter: PathBuf, script: PathBuf) -> Self {
        Self {
            name: name.into(),
            language: SampleLanguage::Python,
            program: script,
            interpreter: Some(interpreter),
        }
    }

    /// Build the command line `[interpreter] program model [aux] args...`.
    pub fn command(&self, input: &SampleInput) -> CommandLine {
        let (program, mut args) = match &self.interpreter {
            Some(interpreter) => {
                (interpreter.clone(), vec![self.program.as_os_str().to_os_string()])
            }
            None => (self.program.clone(), Vec::new()),
        };
        args.push(input.model_path.as_os_str().to_os_string());
        if let Some(aux) = &input.aux_path {
            args.push(aux.as_os_str().to_os_string());
        }
        args.extend(input.args.iter().map(OsString::from));

        CommandLine {
            variant: self.name.clone(),
            program,
            args,
            env: input.env.clone(),
            stdin: input.stdin.clone(),
        }
    }
}

/// Resolved inputs shared by every variant of one case
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleInput {
    pub model_path: PathBuf,
    pub aux_path: Option<PathBuf>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

/// A fully assembled invocation of one variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub variant: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Extra environment on top of the inherited one
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

fn quote(token: &str) -> String {
    if !token.is_empty() && !token.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        token.to_string()
    } else {
        format!("{token:?}")
    }
}
