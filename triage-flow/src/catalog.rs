use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::{
    error::{Result, TriageError},
    stage::StageSpec,
};

pub mod stage_ids {
    pub const INFORMATION: &str = "information";
    pub const SYMPTOM_ANALYSIS: &str = "symptom_analysis";
    pub const DIAGNOSIS: &str = "diagnosis";
    pub const TREATMENT: &str = "treatment";
    pub const JUDGE: &str = "judge";
    pub const COMMUNICATION: &str = "communication";
}

pub mod input_keys {
    pub const USER_INPUT: &str = "user_input";
    pub const CHUNK_DATA: &str = "chunkdata";
    pub const CONVERSATION_CONTEXT: &str = "conversation_context";
    pub const CONVERSATION_HISTORY: &str = "conversation_history";
    pub const EXTRACTED_INFO: &str = "extracted_info";
    pub const SYMPTOM_ANALYSIS: &str = "symptom_analysis";
    pub const DIAGNOSES: &str = "diagnoses";
    pub const VALIDATED_OUTPUT: &str = "validated_output";
}

const INFORMATION_PROMPT: &str = r#"You are an Information Agent, an expert in parsing medical queries.
Extract key medical information from the input: {user_input}
Supporting reference material: {chunkdata}
Known patient context: {conversation_context}
Identify symptoms, duration, severity, and context.
Return a JSON object with fields: symptoms (list), duration (string), severity (string), context (string), chunkdata (string)."#;

const SYMPTOM_ANALYSIS_PROMPT: &str = r#"You are a Symptom Analyzer specialising in symptom analysis.
Analyze the extracted information: {extracted_info}
Known patient context: {conversation_context}
Identify symptom patterns and potential causes.
If the information is insufficient, reply with a clarification request addressed to the Information Agent that states exactly what is missing.
Return the analysis or a clarification request."#;

const DIAGNOSIS_PROMPT: &str = r#"You are a Diagnosis Reasoner, a diagnostic expert.
Reason possible diagnoses based on the symptom analysis: {symptom_analysis}
Known patient context: {conversation_context}
If the analysis is unclear, reply with a clarification request addressed to the Symptom Analyzer that states exactly what is missing.
Return a list of differential diagnoses with reasoning."#;

const TREATMENT_PROMPT: &str = r#"You are a Treatment Suggester who provides evidence-based treatment suggestions.
Suggest treatments for the diagnoses: {diagnoses}
Known patient context: {conversation_context}
Return treatment suggestions, precautions, and advice."#;

const JUDGE_PROMPT: &str = r#"You are a Judge Agent who ensures medical accuracy and consistency.
Validate the output from stage: {stage_name}
Content: {stage_output}
Original user input: {original_user_input}
Check for medical accuracy, relevance, and safety.
Respond **only** with JSON.
If invalid, return {"error": "<what is wrong>", "suggested_corrections": "<how to fix it>"}.
If valid, return {"validated_output": "<the validated content>"}."#;

const COMMUNICATION_PROMPT: &str = r#"You are a Communicator who translates complex medical information into clear language.
Format the validated information: {validated_output}
Known patient context: {conversation_context}
Conversation so far: {conversation_history}
Write a clear, empathetic, user-friendly response.
If the information contains an error or is empty, return: 'We couldn't process your request due to insufficient information. Please provide more details about your symptoms.'
Otherwise, summarize symptoms, diagnoses, treatments, and precautions in plain language, and finish with a JSON object with fields: symptoms (list), diagnoses (list), treatments (list), precautions (list), severity (string), duration (string)."#;

/// Prompt template overrides, keyed by stage id.
#[derive(Debug, Default, Deserialize)]
struct CatalogOverrides {
    #[serde(default)]
    stages: HashMap<String, StageOverride>,
}

#[derive(Debug, Deserialize)]
struct StageOverride {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    prompt_template: Option<String>,
}

/// The six stage definitions a pipeline is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCatalog {
    pub information: StageSpec,
    pub symptom_analysis: StageSpec,
    pub diagnosis: StageSpec,
    pub treatment: StageSpec,
    pub judge: StageSpec,
    pub communication: StageSpec,
}

impl Default for StageCatalog {
    fn default() -> Self {
        use stage_ids::*;
        Self {
            information: StageSpec::new(INFORMATION, "Information Agent", INFORMATION_PROMPT),
            symptom_analysis: StageSpec::new(
                SYMPTOM_ANALYSIS,
                "Symptom Analyzer",
                SYMPTOM_ANALYSIS_PROMPT,
            )
            .with_predecessor(INFORMATION),
            diagnosis: StageSpec::new(DIAGNOSIS, "Diagnosis Reasoner", DIAGNOSIS_PROMPT)
                .with_predecessor(SYMPTOM_ANALYSIS),
            treatment: StageSpec::new(TREATMENT, "Treatment Suggester", TREATMENT_PROMPT),
            judge: StageSpec::new(JUDGE, "Judge Agent", JUDGE_PROMPT),
            communication: StageSpec::new(COMMUNICATION, "Communicator", COMMUNICATION_PROMPT),
        }
    }
}

impl StageCatalog {
    /// Default catalog with names and templates replaced from a YAML document:
    ///
    /// ```yaml
    /// stages:
    ///   judge:
    ///     prompt_template: "Validate {stage_output} ..."
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let overrides: CatalogOverrides = serde_yaml::from_str(yaml)?;
        let mut catalog = Self::default();

        for (id, stage_override) in overrides.stages {
            let spec = catalog
                .get_mut(&id)
                .ok_or_else(|| TriageError::Config(format!("unknown stage id '{id}'")))?;
            if let Some(name) = stage_override.name {
                spec.name = name;
            }
            if let Some(template) = stage_override.prompt_template {
                if template.trim().is_empty() {
                    return Err(TriageError::Template(format!(
                        "empty prompt template for stage '{id}'"
                    )));
                }
                spec.prompt_template = template;
            }
        }

        Ok(catalog)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            TriageError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn get(&self, id: &str) -> Option<&StageSpec> {
        self.iter().find(|spec| spec.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut StageSpec> {
        [
            &mut self.information,
            &mut self.symptom_analysis,
            &mut self.diagnosis,
            &mut self.treatment,
            &mut self.judge,
            &mut self.communication,
        ]
        .into_iter()
        .find(|spec| spec.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageSpec> {
        [
            &self.information,
            &self.symptom_analysis,
            &self.diagnosis,
            &self.treatment,
            &self.judge,
            &self.communication,
        ]
        .into_iter()
    }

    /// The stage that answers this stage's clarification requests, if any.
    pub fn predecessor_of(&self, spec: &StageSpec) -> Option<&StageSpec> {
        spec.predecessor.as_deref().and_then(|id| self.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_links_predecessors() {
        let catalog = StageCatalog::default();

        assert!(catalog.information.predecessor.is_none());
        assert_eq!(
            catalog.predecessor_of(&catalog.symptom_analysis).map(|s| s.id.as_str()),
            Some(stage_ids::INFORMATION)
        );
        assert_eq!(
            catalog.predecessor_of(&catalog.diagnosis).map(|s| s.id.as_str()),
            Some(stage_ids::SYMPTOM_ANALYSIS)
        );
        assert!(catalog.treatment.predecessor.is_none());
        assert!(catalog.judge.predecessor.is_none());
    }

    #[test]
    fn every_stage_template_references_its_inputs() {
        let catalog = StageCatalog::default();

        assert!(catalog.information.prompt_template.contains("{user_input}"));
        assert!(catalog.information.prompt_template.contains("{chunkdata}"));
        assert!(catalog.judge.prompt_template.contains("{stage_output}"));
        assert!(catalog.judge.prompt_template.contains("{original_user_input}"));
        for spec in catalog.iter().filter(|s| s.id != stage_ids::JUDGE) {
            assert!(
                spec.prompt_template.contains("{conversation_context}"),
                "{} is missing the context placeholder",
                spec.id
            );
        }
    }

    #[test]
    fn yaml_overrides_replace_templates() {
        let catalog = StageCatalog::from_yaml(
            r#"
stages:
  judge:
    prompt_template: "Judge {stage_output}"
  communication:
    name: "Patient Liaison"
"#,
        )
        .unwrap();

        assert_eq!(catalog.judge.prompt_template, "Judge {stage_output}");
        assert_eq!(catalog.communication.name, "Patient Liaison");
        assert_eq!(
            catalog.information,
            StageCatalog::default().information
        );
    }

    #[test]
    fn unknown_stage_in_yaml_is_rejected() {
        let err = StageCatalog::from_yaml("stages:\n  triage:\n    name: x\n").unwrap_err();
        assert!(matches!(err, TriageError::Config(_)));
    }

    #[test]
    fn empty_template_is_rejected() {
        let err =
            StageCatalog::from_yaml("stages:\n  judge:\n    prompt_template: \"  \"\n").unwrap_err();
        assert!(matches!(err, TriageError::Template(_)));
    }
}
