use blocksmith_core::rules::{IBD_RULES, RULES};
use blocksmith_core::GenerationMode;

use crate::Example;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One message of conversation history sent before the request itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

const STANDARD_FORMAT: &str = r#"{
  "diagram_type": "block",
  "elements": [
    {"id": "sensor-1", "type": "sensor", "name": "...", "description": "...", "properties": {}}
  ],
  "relationships": [
    {"source_id": "sensor-1", "target_id": "processor-1", "type": "association", "name": "..."}
  ]
}"#;

const ENHANCED_FORMAT: &str = r#"{
  "diagram_type": "bdd",
  "elements": [
    {
      "id": "block-1", "type": "block", "name": "Flight Controller",
      "internal_diagram": {
        "nodes": [
          {"id": "ibd-cpu", "type": "ibd_block", "name": "Central Processing Unit"},
          {"id": "ibd-memory", "type": "ibd_block", "name": "Memory Module"},
          {"id": "ibd-io", "type": "ibd_block", "name": "I/O Controller"}
        ],
        "edges": [
          {"id": "cpu-memory", "source": "ibd-cpu", "target": "ibd-memory", "label": "Data Bus"},
          {"id": "cpu-io", "source": "ibd-cpu", "target": "ibd-io", "label": "Control Signals"}
        ]
      }
    },
    {"id": "sensor-1", "type": "sensor", "name": "GPS"}
  ],
  "relationships": [
    {"source_id": "sensor-1", "target_id": "block-1", "name": "Provides data"}
  ]
}"#;

pub fn system_prompt(mode: GenerationMode) -> String {
    match mode {
        GenerationMode::Standard => format!(
            "You are a SysML expert assisting a modeling tool. Given a system description and \
optional example diagrams, produce a Block Definition Diagram as a single JSON object.\n\n\
## Output format\n{STANDARD_FORMAT}\n\n\
## Rules\n{RULES}\n\n\
Output ONLY the JSON object, nothing else."
        ),
        GenerationMode::Enhanced => format!(
            "You are an expert SysML architect. Given a system description, produce a Block \
Definition Diagram as a single JSON object. Blocks with internal structure carry a nested \
Internal Block Diagram.\n\n\
## Output format\n{ENHANCED_FORMAT}\n\n\
## Rules\n{RULES}\n\n\
## Internal block diagrams\n{IBD_RULES}\n\n\
Output ONLY the JSON object, nothing else."
        ),
    }
}

/// Examples replayed as prior user/assistant exchanges.
pub fn history(examples: &[Example]) -> Vec<Turn> {
    examples
        .iter()
        .flat_map(|example| {
            let output = serde_json::to_string_pretty(&example.output)
                .unwrap_or_else(|_| example.output.to_string());
            [
                Turn {
                    role: Role::User,
                    content: format!("System description:\n\n{}", example.input),
                },
                Turn {
                    role: Role::Assistant,
                    content: output,
                },
            ]
        })
        .collect()
}

pub fn user_message(text: &str) -> String {
    format!("Generate a diagram for the following system description:\n\n{text}")
}
