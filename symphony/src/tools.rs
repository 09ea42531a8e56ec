//! Capabilities agents can invoke: read a file, write a file, open a pull request.
//!
//! The set is closed. A [`ToolRegistry`] built once at startup maps names to
//! [`Capability`] values; unknown names produce a failed [`ToolOutcome`].

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::types::{PublishRequest, PublishResult, ToolCall};
use crate::io::files::FileAccess;
use crate::io::prompt::ToolInfo;
use crate::publish::Publish;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ReadFile,
    WriteFile,
    CreatePr,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Self::ReadFile, Self::WriteFile, Self::CreatePr];

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::CreatePr => "create_pr",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ReadFile => {
                "Read a file from the workspace. Input: {\"path\": relative path}."
            }
            Self::WriteFile => {
                "Create or overwrite a file in the workspace. Input: {\"path\": relative path, \"content\": text}."
            }
            Self::CreatePr => {
                "Commit all workspace changes to a new branch and open a pull request. Input: {\"title\": text, \"body\": text}."
            }
        }
    }

    pub fn info(self) -> ToolInfo {
        ToolInfo {
            name: self.name(),
            description: self.description(),
        }
    }

    pub fn run(self, input: &Value, ctx: &ToolContext<'_>) -> ToolOutcome {
        match self {
            Self::ReadFile => {
                let input: ReadFileInput = match parse_input(self, input) {
                    Ok(input) => input,
                    Err(outcome) => return outcome,
                };
                match ctx.files.read(&input.path) {
                    Ok(contents) => ToolOutcome::success(contents),
                    Err(err) => ToolOutcome::failure(format!("Error reading file: {err:#}")),
                }
            }
            Self::WriteFile => {
                let input: WriteFileInput = match parse_input(self, input) {
                    Ok(input) => input,
                    Err(outcome) => return outcome,
                };
                match ctx.files.write(&input.path, &input.content) {
                    Ok(bytes) => ToolOutcome::success(format!(
                        "Successfully wrote {bytes} bytes to {}",
                        input.path
                    )),
                    Err(err) => ToolOutcome::failure(format!("Error writing file: {err:#}")),
                }
            }
            Self::CreatePr => {
                let input: CreatePrInput = match parse_input(self, input) {
                    Ok(input) => input,
                    Err(outcome) => return outcome,
                };
                let result = ctx
                    .publisher
                    .publish(&PublishRequest::new(input.title, input.body));
                ToolOutcome {
                    success: !matches!(result, PublishResult::Failed { .. }),
                    message: result.to_string(),
                    publish: Some(result),
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReadFileInput {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileInput {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CreatePrInput {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
}

fn parse_input<T: DeserializeOwned>(capability: Capability, input: &Value) -> Result<T, ToolOutcome> {
    T::deserialize(input).map_err(|err| {
        ToolOutcome::failure(format!("Invalid input for {}: {err}", capability.name()))
    })
}

/// What a capability needs from its surroundings.
pub struct ToolContext<'a> {
    pub files: &'a FileAccess,
    pub publisher: &'a dyn Publish,
}

/// Result of one capability invocation, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    pub message: String,
    /// Set only by `create_pr`.
    pub publish: Option<PublishResult>,
}

impl ToolOutcome {
    fn success(message: String) -> Self {
        Self {
            success: true,
            message,
            publish: None,
        }
    }

    fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            publish: None,
        }
    }
}

/// Name to capability lookup table.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    by_name: BTreeMap<&'static str, Capability>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let by_name = Capability::ALL
            .into_iter()
            .map(|capability| (capability.name(), capability))
            .collect();
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<Capability> {
        self.by_name.get(name).copied()
    }

    /// Capabilities ordered by name.
    pub fn list(&self) -> Vec<ToolInfo> {
        self.by_name.values().map(|c| c.info()).collect()
    }

    pub fn dispatch(&self, call: &ToolCall, ctx: &ToolContext<'_>) -> ToolOutcome {
        let Some(capability) = self.get(&call.name) else {
            warn!(tool = %call.name, "unknown tool requested");
            return ToolOutcome::failure(format!("Unknown tool: {}", call.name));
        };
        let outcome = capability.run(&call.input, ctx);
        info!(tool = capability.name(), success = outcome.success, "tool finished");
        outcome
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
