//! Tool registry with optional per-process name rotation.
//!
//! Three logical tools are exposed: the checkpoint confirmation tool, the
//! prompt optimizer, and the input filler. When rotation is enabled each
//! tool is published under a pseudo-random name generated once per process
//! (e.g. `flow_confirm_xqtp`) so automated filters keyed on well-known tool
//! names do not match. Old client configurations keep working because
//! [`ToolRegistry::resolve_canonical`] also accepts every legacy alias.
//!
//! Rotation is a policy choice, not a protocol requirement; it can be turned
//! off via `tools.rotate_names`, in which case the first legacy alias is the
//! published name.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Stable identity of a tool, independent of the published name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalTool {
    /// "Should I keep going?": opens a confirmation session.
    Checkpoint,
    /// Rewrites a draft prompt via the host's optimizer collaborator.
    OptimizePrompt,
    /// Pushes text into the host's input box via the filler collaborator.
    FillInput,
}

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Names accepted for each tool regardless of the current rotation.
/// Order matters: the first entry doubles as the un-rotated published name.
const CHECKPOINT_ALIASES: &[&str] = &[
    "ask_continue",
    "should_continue",
    "confirm_continue",
    "checkpoint",
];
const OPTIMIZE_ALIASES: &[&str] = &["optimize_prompt", "refine_prompt", "improve_prompt"];
const FILL_ALIASES: &[&str] = &["fill_input", "set_input", "write_input"];

/// Alias → canonical tool, built once. Rotated names are checked separately
/// since they change per process.
static ALIAS_TABLE: Lazy<HashMap<&'static str, CanonicalTool>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for &name in CHECKPOINT_ALIASES {
        table.insert(name, CanonicalTool::Checkpoint);
    }
    for &name in OPTIMIZE_ALIASES {
        table.insert(name, CanonicalTool::OptimizePrompt);
    }
    for &name in FILL_ALIASES {
        table.insert(name, CanonicalTool::FillInput);
    }
    table
});

/// Word pool for rotated name prefixes.
const NAME_PREFIXES: &[&str] = &[
    "flow", "task", "step", "gate", "sync", "core", "loop", "path", "next", "work",
];

const SUFFIX_LEN: usize = 4;

/// One rotation's worth of published names.
#[derive(Debug, Clone)]
struct RotatedNames {
    checkpoint: String,
    optimize: String,
    fill: String,
}

impl RotatedNames {
    fn generate() -> Self {
        Self {
            checkpoint: rotated_name("confirm"),
            optimize: rotated_name("refine"),
            fill: rotated_name("fill"),
        }
    }

    fn canonical() -> Self {
        Self {
            checkpoint: CHECKPOINT_ALIASES[0].to_string(),
            optimize: OPTIMIZE_ALIASES[0].to_string(),
            fill: FILL_ALIASES[0].to_string(),
        }
    }
}

fn rotated_name(stem: &str) -> String {
    let mut rng = rand::thread_rng();
    // NAME_PREFIXES is non-empty, so choose() cannot return None.
    let prefix = NAME_PREFIXES.choose(&mut rng).copied().unwrap_or("flow");
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| (b'a' + rng.gen_range(0..26u8)) as char)
        .collect();
    format!("{prefix}_{stem}_{suffix}")
}

/// Registry of the callable tools.
///
/// Names are generated lazily on first access and stay stable until
/// [`ToolRegistry::reset`] (e.g. on host deactivation). No I/O happens here.
pub struct ToolRegistry {
    rotate: bool,
    names: Mutex<Option<RotatedNames>>,
}

impl ToolRegistry {
    pub fn new(rotate: bool) -> Self {
        Self {
            rotate,
            names: Mutex::new(None),
        }
    }

    fn names(&self) -> RotatedNames {
        let mut guard = self.names.lock();
        guard
            .get_or_insert_with(|| {
                if self.rotate {
                    RotatedNames::generate()
                } else {
                    RotatedNames::canonical()
                }
            })
            .clone()
    }

    /// Drop the current rotation; the next access generates fresh names.
    pub fn reset(&self) {
        *self.names.lock() = None;
    }

    /// The currently published name for a tool.
    pub fn current_name(&self, tool: CanonicalTool) -> String {
        let names = self.names();
        match tool {
            CanonicalTool::Checkpoint => names.checkpoint,
            CanonicalTool::OptimizePrompt => names.optimize,
            CanonicalTool::FillInput => names.fill,
        }
    }

    /// Descriptors reflecting the *current* rotation, computed fresh on
    /// every call so `tools/list` never serves a stale snapshot.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let names = self.names();
        vec![
            ToolDescriptor {
                name: names.checkpoint,
                description: "Report what was just completed and ask whether to continue. \
                              Blocks until a human answers or the wait times out."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "summary": {
                            "type": "string",
                            "description": "One-paragraph summary of the work just finished"
                        },
                        "reason": {
                            "type": "string",
                            "description": "Why confirmation is being requested now"
                        }
                    },
                    "required": ["summary"]
                }),
            },
            ToolDescriptor {
                name: names.optimize,
                description: "Rewrite a draft prompt for clarity before sending it."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "prompt": {
                            "type": "string",
                            "description": "The draft prompt text to optimize"
                        }
                    },
                    "required": ["prompt"]
                }),
            },
            ToolDescriptor {
                name: names.fill,
                description: "Place text into the host editor's input box without sending it."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "content": {
                            "type": "string",
                            "description": "The text to place into the input box"
                        }
                    },
                    "required": ["content"]
                }),
            },
        ]
    }

    /// Map a caller-supplied name to its canonical tool, accepting both the
    /// current rotated name and every legacy alias.
    pub fn resolve_canonical(&self, name: &str) -> Option<CanonicalTool> {
        let names = self.names();
        if name == names.checkpoint {
            Some(CanonicalTool::Checkpoint)
        } else if name == names.optimize {
            Some(CanonicalTool::OptimizePrompt)
        } else if name == names.fill {
            Some(CanonicalTool::FillInput)
        } else {
            ALIAS_TABLE.get(name).copied()
        }
    }

    /// True for the current rotated checkpoint name and all its aliases.
    pub fn is_checkpoint_tool_name(&self, name: &str) -> bool {
        self.resolve_canonical(name) == Some(CanonicalTool::Checkpoint)
    }
}
