//! Extraction of structured payloads from free-form model responses.
//!
//! Models answer in prose with fenced blocks. Callers treat an empty match
//! list or a parse error as a recoverable failure (retry or safe default).

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{Draft, Validator};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

static JSON_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```json\s*([\s\S]*?)\s*```").expect("valid json block regex"));

static MARKDOWN_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```markdown\s*([\s\S]*?)\s*```").expect("valid markdown block regex")
});

/// Return the bodies of all ```` ```json ```` fenced blocks, in order.
pub fn extract_json_blocks(text: &str) -> Vec<String> {
    extract_blocks(&JSON_BLOCK_RE, text)
}

/// Return the bodies of all ```` ```markdown ```` fenced blocks, in order.
pub fn extract_markdown_blocks(text: &str) -> Vec<String> {
    extract_blocks(&MARKDOWN_BLOCK_RE, text)
}

fn extract_blocks(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// A compiled JSON Schema for one kind of model response.
pub struct ResponseSchema {
    name: &'static str,
    validator: Validator,
}

impl ResponseSchema {
    /// Compile `raw` (Draft 2020-12). Fails only on a malformed schema.
    pub fn new(name: &'static str, raw: &str) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(raw).with_context(|| format!("parse {name} schema"))?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .with_context(|| format!("compile {name} schema"))?;
        Ok(Self { name, validator })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Parse the first JSON block in `text`, validate it and deserialize it.
    pub fn parse<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        if text.trim().is_empty() {
            bail!("empty {} response", self.name);
        }
        let blocks = extract_json_blocks(text);
        let first = blocks
            .first()
            .ok_or_else(|| anyhow!("no json block in {} response", self.name))?;
        let value: Value = serde_json::from_str(first)
            .with_context(|| format!("decode {} json", self.name))?;
        self.validate(&value)?;
        serde_json::from_value(value).with_context(|| format!("deserialize {}", self.name))
    }

    fn validate(&self, instance: &Value) -> Result<()> {
        let messages: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            bail!(
                "{} response failed validation:\n- {}",
                self.name,
                messages.join("\n- ")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const CODE_SCHEMA: &str = r#"{
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["code"],
        "properties": { "code": { "type": "string" } }
    }"#;

    #[derive(Debug, Deserialize)]
    struct Code {
        code: String,
    }

    #[test]
    fn extracts_all_json_blocks_in_order() {
        let text = "intro\n```json\n{\"a\": 1}\n```\nmiddle\n```json {\"b\": 2} ```";
        assert_eq!(extract_json_blocks(text), vec!["{\"a\": 1}", "{\"b\": 2}"]);
    }

    #[test]
    fn no_blocks_yields_empty_list() {
        assert!(extract_json_blocks("just prose").is_empty());
        assert!(extract_markdown_blocks("```python\nx\n```").is_empty());
    }

    #[test]
    fn extracts_markdown_plan() {
        let text = "Plan:\n```markdown\n1. read input\n2. sum\n```\n";
        assert_eq!(extract_markdown_blocks(text), vec!["1. read input\n2. sum"]);
    }

    #[test]
    fn parse_reads_first_valid_block() {
        let schema = ResponseSchema::new("coding", CODE_SCHEMA).expect("schema");
        let text = "```json\n{\"code\": \"print(42)\"}\n```";
        let parsed: Code = schema.parse(text).expect("parse");
        assert_eq!(parsed.code, "print(42)");
    }

    #[test]
    fn parse_rejects_missing_keys() {
        let schema = ResponseSchema::new("coding", CODE_SCHEMA).expect("schema");
        let err = schema
            .parse::<Code>("```json\n{\"program\": \"x\"}\n```")
            .unwrap_err();
        assert!(err.to_string().contains("failed validation"));
    }

    #[test]
    fn parse_rejects_empty_and_blockless_responses() {
        let schema = ResponseSchema::new("coding", CODE_SCHEMA).expect("schema");
        assert!(schema.parse::<Code>("").is_err());
        let err = schema.parse::<Code>("no fences here").unwrap_err();
        assert!(err.to_string().contains("no json block"));
    }

    #[test]
    fn parse_rejects_invalid_json() {
        let schema = ResponseSchema::new("coding", CODE_SCHEMA).expect("schema");
        let err = schema
            .parse::<Code>("```json\n{code: nope}\n```")
            .unwrap_err();
        assert!(err.to_string().contains("decode coding json"));
    }
}
