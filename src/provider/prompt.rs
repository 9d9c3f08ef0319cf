//! Prompt construction for review requests.

use super::ProviderRequest;

/// System prompt fixing the response contract.
pub fn system_prompt() -> String {
    r#"You are a rigorous code reviewer. You receive one source file and a set
of review rules. Report only concrete problems that violate one of the given
rules; do not invent rules and do not restate style preferences.

Respond with a single JSON object, no prose and no markdown fences:
{"issues": [{"rule_id": "<id of the violated rule>",
             "level": "blocker|critical|major|minor|info",
             "line": <1-based start line>,
             "end_line": <1-based end line>,
             "message": "<what is wrong and why it matters>",
             "suggestion": "<optional concrete fix>"}]}

If the file violates none of the rules, respond with {"issues": []}."#
        .to_string()
}

/// User prompt carrying the file and the candidate rules.
pub fn user_prompt(request: &ProviderRequest) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "Review the following {} file. Line numbers are 1-based.\n",
        request.language
    ));
    prompt.push_str(&format!(
        "Write issue messages in language code {:?}.\n\n",
        request.response_language
    ));

    prompt.push_str("Rules to check:\n");
    for rule in &request.rules {
        prompt.push_str(&format!("- {} [{}]: {}\n", rule.id, rule.level, rule.name));
        if !rule.description.is_empty() {
            prompt.push_str(&format!("  {}\n", rule.description.trim()));
        }
        for item in &rule.checklist {
            prompt.push_str(&format!("  * {}\n", item));
        }
        if let Some(fix) = &rule.fix {
            prompt.push_str(&format!("  Fix: {}\n", fix));
        }
    }

    prompt.push_str(&format!("\nFile: {}\n```{}\n", request.file, request.language));
    prompt.push_str(&request.content);
    if !request.content.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str("```\n");

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rule, RuleTriggers};
    use crate::types::{IssueLevel, Language};

    #[test]
    fn test_user_prompt_includes_rules_and_content() {
        let request = ProviderRequest {
            file: "views.py".to_string(),
            language: Language::Python,
            content: "def view(request): pass".to_string(),
            response_language: "en".to_string(),
            rules: vec![Rule {
                id: "python/bare-except".to_string(),
                name: "Bare except".to_string(),
                level: IssueLevel::Major,
                category: String::new(),
                description: "Catches too much.".to_string(),
                checklist: vec!["Is it bare?".to_string()],
                fix: Some("Narrow it.".to_string()),
                tags: Vec::new(),
                triggers: RuleTriggers::default(),
            }],
        };

        let prompt = user_prompt(&request);
        assert!(prompt.contains("python/bare-except"));
        assert!(prompt.contains("Catches too much."));
        assert!(prompt.contains("def view(request): pass"));
        assert!(prompt.contains("views.py"));
    }
}
