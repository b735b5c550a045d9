//! Prompt resources
//!
//! Few-shot examples plus the Draft-7 schemas that bound reasoner and
//! synthesizer output. Everything is loaded and compiled once at startup and
//! shared read-only.

use crate::config::PromptsConfig;
use jsonschema::{Draft, Validator};
use serde_json::Value;
use std::fs;
use std::path::Path;

pub struct PromptResources {
    pub examples: Value,
    pub reasoner_validator: Validator,
    pub synthesizer_validator: Validator,
}

impl PromptResources {
    pub fn load(cfg: &PromptsConfig) -> Result<Self, anyhow::Error> {
        let examples = load_json(&cfg.examples_path)?;
        let reasoner_schema = load_json(&cfg.reasoner_schema)?;
        let synthesizer_schema = load_json(&cfg.synthesizer_schema)?;
        Ok(Self {
            examples,
            reasoner_validator: compile(&reasoner_schema, &cfg.reasoner_schema)?,
            synthesizer_validator: compile(&synthesizer_schema, &cfg.synthesizer_schema)?,
        })
    }

    pub fn reasoner_examples(&self) -> &[Value] {
        self.examples
            .get("reasoner_examples")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn synthesizer_examples(&self) -> &[Value] {
        self.examples
            .get("synthesizer_examples")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn load_json(path: &str) -> Result<Value, anyhow::Error> {
    let content = fs::read_to_string(Path::new(path))
        .map_err(|e| anyhow::anyhow!("cannot read {path}: {e}"))?;
    Ok(serde_json::from_str(&content)?)
}

fn compile(schema: &Value, path: &str) -> Result<Validator, anyhow::Error> {
    jsonschema::options()
        .with_draft(Draft::Draft7)
        .build(schema)
        .map_err(|e| anyhow::anyhow!("invalid JSON schema {path}: {e}"))
}
