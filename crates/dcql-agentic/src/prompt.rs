//! Prompt rendering for DCQL generation
//!
//! Prompts are pure functions of their inputs: identical credentials and query give
//! byte-identical text, which keeps tests reproducible and lets the serving side reuse
//! its prompt cache.

use dcql_retrieval::VerifiableCredential;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    /// Training-format prompt for the fine-tuned model
    #[default]
    FineTuned,
    /// Explicit JSON-only instructions with an example shape
    StrictJson,
}

impl PromptStyle {
    pub fn render(self, formatted_credentials: &str, query: &str) -> String {
        match self {
            // Wording the fine-tuned model was trained on; do not edit
            PromptStyle::FineTuned => format!(
                "Given the following Verifiable Credentials and a natural language query, \
                 generate a DCQL query to retrieve the requested information.\n\n\
                 Available Verifiable Credentials:\n{formatted_credentials}\n\n\
                 Natural Language Query: {query}\n\n\
                 Generate a DCQL query that selects the appropriate credentials and fields:"
            ),
            PromptStyle::StrictJson => format!(
                "You are a DCQL generator. Given the following Verifiable Credentials and a \
                 natural language query, output ONLY a valid JSON object representing the DCQL. \
                 Do not include explanations or markdown fences.\n\n\
                 Available Verifiable Credentials:\n{formatted_credentials}\n\n\
                 Natural Language Query: {query}\n\n\
                 Generate a DCQL query that selects the appropriate credentials and fields. \
                 Output strictly a JSON object like this:\n\
                 {{\"credentials\":[{{\"id\":\"<snake_case_type>_credential\",\"format\":\"ldp_vc\",\
                 \"meta\":{{\"type_values\":[[\"VerifiableCredential\",\"<ExactCredentialType>\"]]}},\
                 \"claims\":[{{\"path\":[\"credentialSubject\",\"<field>\"]}}]}}]}}"
            ),
        }
    }
}

/// Render credentials one per line as `VC <n>: <compact json>`, numbered from 1
pub fn format_credentials<'a, I>(credentials: I) -> Result<String, serde_json::Error>
where
    I: IntoIterator<Item = &'a VerifiableCredential>,
{
    let mut lines = Vec::new();
    for (index, vc) in credentials.into_iter().enumerate() {
        lines.push(format!("VC {}: {}", index + 1, vc.to_compact_json()?));
    }
    Ok(lines.join("\n"))
}

/// The fine-tuned generation prompt
pub fn build_prompt(formatted_credentials: &str, query: &str) -> String {
    PromptStyle::FineTuned.render(formatted_credentials, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credential(id: &str, kind: &str) -> VerifiableCredential {
        serde_json::from_value(json!({
            "id": id,
            "type": ["VerifiableCredential", kind],
            "issuer": {"id": "did:example:issuer", "name": "Issuer"},
            "credentialSubject": {"fullName": "Alice"}
        }))
        .unwrap()
    }

    #[test]
    fn test_format_credentials_numbered_lines() {
        let a = credential("a", "PassportCredential");
        let b = credential("b", "DriverLicenseCredential");
        let formatted = format_credentials([&a, &b]).unwrap();

        let lines: Vec<&str> = formatted.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(r#"VC 1: {"id":"a","type":["VerifiableCredential","PassportCredential"]"#));
        assert!(lines[1].starts_with("VC 2: "));
        assert!(!formatted.ends_with('\n'));
    }

    #[test]
    fn test_build_prompt_exact_text() {
        let prompt = build_prompt("VC 1: {}", "Show my passport");
        assert_eq!(
            prompt,
            "Given the following Verifiable Credentials and a natural language query, generate a DCQL query to retrieve the requested information.\n\nAvailable Verifiable Credentials:\nVC 1: {}\n\nNatural Language Query: Show my passport\n\nGenerate a DCQL query that selects the appropriate credentials and fields:"
        );
    }

    #[test]
    fn test_prompt_deterministic() {
        let a = credential("a", "PassportCredential");
        let formatted = format_credentials([&a]).unwrap();
        assert_eq!(
            build_prompt(&formatted, "passport number"),
            build_prompt(&formatted, "passport number")
        );
    }

    #[test]
    fn test_placeholders_in_inputs_are_not_expanded() {
        let prompt = build_prompt("VC 1: {\"note\":\"{query}\"}", "hello");
        assert!(prompt.contains("{\"note\":\"{query}\"}"));
        assert!(prompt.contains("Natural Language Query: hello"));
    }

    #[test]
    fn test_strict_style_includes_schema_example() {
        let prompt = PromptStyle::StrictJson.render("VC 1: {}", "q");
        assert!(prompt.starts_with("You are a DCQL generator."));
        assert!(prompt.ends_with(r#""claims":[{"path":["credentialSubject","<field>"]}]}]}"#));
    }
}
