use serde::{Deserialize, Serialize};

/// Input key carrying the judge's suggested corrections into a retry.
pub const CORRECTIONS: &str = "corrections";
/// Input key carrying a later stage's request for more information.
pub const CLARIFICATION_REQUEST: &str = "clarification_request";
/// Input key carrying the predecessor's answer to a clarification request.
pub const CLARIFICATION_RESPONSE: &str = "clarification_response";

/// Static definition of one reasoning stage.
///
/// Specs are built once per pipeline and never mutated; every call renders a
/// fresh prompt from the template instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stable key, e.g. `symptom_analysis`.
    pub id: String,
    /// Display name used in logs and failure messages, e.g. `Symptom Analyzer`.
    pub name: String,
    /// Prompt text with `{placeholder}` tokens.
    pub prompt_template: String,
    /// Id of the stage that can answer this stage's clarification requests.
    #[serde(default)]
    pub predecessor: Option<String>,
}

impl StageSpec {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt_template: prompt_template.into(),
            predecessor: None,
        }
    }

    pub fn with_predecessor(mut self, predecessor: impl Into<String>) -> Self {
        self.predecessor = Some(predecessor.into());
        self
    }

    /// Render this stage's prompt for one call without modifying the stage.
    pub fn render(&self, inputs: &StageInputs) -> String {
        render_template(&self.prompt_template, inputs)
    }
}

/// Named inputs for a stage call, kept in insertion order.
///
/// Setting an existing key replaces its value in place, so the order of the
/// appended instructions stays stable across retries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInputs {
    entries: Vec<(String, String)>,
}

impl StageInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::fmt::Display for StageInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        write!(f, "{}", serde_json::Value::Object(map))
    }
}

/// Substitute `{name}` tokens in one pass over `template`.
///
/// Substituted values are never scanned again, so a value that itself looks
/// like a placeholder is left alone. Tokens without a matching input stay as
/// they are. Inputs with no placeholder are appended as instructions when they
/// are corrections or clarification traffic, and dropped otherwise.
pub fn render_template(template: &str, inputs: &StageInputs) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut used: Vec<&str> = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let token = after
            .find('}')
            .map(|close| &after[..close])
            .filter(|name| is_placeholder_name(name));

        match token.and_then(|name| inputs.get(name).map(|value| (name, value))) {
            Some((name, value)) => {
                rendered.push_str(value);
                if !used.contains(&name) {
                    used.push(name);
                }
                rest = &after[name.len() + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);

    for (key, value) in inputs.iter() {
        if used.contains(&key) {
            continue;
        }
        match key {
            CORRECTIONS => {
                rendered.push_str(&format!("\nApply the following corrections: {value}"))
            }
            CLARIFICATION_REQUEST => {
                rendered.push_str(&format!("\nAddress this clarification request: {value}"))
            }
            CLARIFICATION_RESPONSE => {
                rendered.push_str(&format!("\nUse this clarification response: {value}"))
            }
            _ => {}
        }
    }

    rendered
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Completed,
    Failed,
}

/// One attempt at running a stage. Lives only for the duration of that attempt.
#[derive(Debug, Clone)]
pub struct StageInvocation<'a> {
    pub stage: &'a StageSpec,
    pub inputs: StageInputs,
    pub raw_output: String,
    pub status: InvocationStatus,
}

impl<'a> StageInvocation<'a> {
    pub fn new(stage: &'a StageSpec, inputs: StageInputs) -> Self {
        Self {
            stage,
            inputs,
            raw_output: String::new(),
            status: InvocationStatus::Pending,
        }
    }

    pub fn complete(&mut self, raw_output: String) {
        self.raw_output = raw_output;
        self.status = InvocationStatus::Completed;
    }

    pub fn fail(&mut self, raw_output: String) {
        self.raw_output = raw_output;
        self.status = InvocationStatus::Failed;
    }
}
