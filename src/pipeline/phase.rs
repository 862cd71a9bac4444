//! Phase definitions.
//!
//! A phase plan is immutable configuration shared by every job: the root
//! agent plus an ordered list of phases, each naming the agents it invokes.
//! Plans are either built in or loaded from YAML, and are validated against
//! the agent registry before any job runs.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::catalog::{phases, ROOT_AGENT};
use crate::agents::{AgentRegistry, AgentRole};
use crate::error::RegistryError;
use crate::jobs::GenerationRequest;
use crate::mindmap::PhaseRef;

use super::config::ConfigError;

/// When a phase agent is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCondition {
    #[default]
    Always,
    /// Only when the request enables adversarial testing.
    AdversarialTesting,
    /// Only when the request requires clinical review.
    ClinicalReview,
}

impl AgentCondition {
    pub fn applies(&self, request: &GenerationRequest) -> bool {
        match self {
            AgentCondition::Always => true,
            AgentCondition::AdversarialTesting => request.enable_adversarial_testing,
            AgentCondition::ClinicalReview => request.require_clinical_review,
        }
    }
}

/// One agent entry of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseAgent {
    pub agent: String,
    #[serde(default)]
    pub condition: AgentCondition,
}

impl PhaseAgent {
    pub fn always(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            condition: AgentCondition::Always,
        }
    }

    pub fn when(agent: impl Into<String>, condition: AgentCondition) -> Self {
        Self {
            agent: agent.into(),
            condition,
        }
    }
}

/// A fixed-index pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    /// 1-based position in the plan.
    pub index: u32,
    pub name: String,
    /// Agents in declaration order; the runner groups them by role.
    pub agents: Vec<PhaseAgent>,
    /// Duration hint used for completion estimates.
    #[serde(default)]
    pub estimated_duration_secs: u64,
}

impl PhaseDefinition {
    pub fn new(index: u32, name: impl Into<String>, agents: Vec<PhaseAgent>) -> Self {
        Self {
            index,
            name: name.into(),
            agents,
            estimated_duration_secs: 0,
        }
    }

    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration_secs = duration.as_secs();
        self
    }

    pub fn phase_ref(&self) -> PhaseRef {
        PhaseRef::new(self.index, self.name.clone())
    }

    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.estimated_duration_secs)
    }

    /// Agent ids whose condition holds for `request`, in declaration order.
    pub fn scheduled_agents(&self, request: &GenerationRequest) -> Vec<&str> {
        self.agents
            .iter()
            .filter(|a| a.condition.applies(request))
            .map(|a| a.agent.as_str())
            .collect()
    }
}

/// The root agent and ordered phases of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePlan {
    pub root_agent: String,
    pub phases: Vec<PhaseDefinition>,
}

impl PhasePlan {
    /// The six-phase synthetic cohort pipeline.
    pub fn builtin() -> Self {
        use AgentCondition::*;

        let phase = |index: u32, name: &str, agents: Vec<PhaseAgent>, secs: u64| {
            PhaseDefinition::new(index, name, agents)
                .with_estimated_duration(Duration::from_secs(secs))
        };

        Self {
            root_agent: ROOT_AGENT.to_string(),
            phases: vec![
                phase(
                    1,
                    phases::LITERATURE_RESEARCH,
                    vec![
                        PhaseAgent::always("literature_miner"),
                        PhaseAgent::always("guideline_extractor"),
                        PhaseAgent::always("evidence_synthesizer"),
                        PhaseAgent::when("evidence_skeptic", AdversarialTesting),
                    ],
                    30,
                ),
                phase(
                    2,
                    phases::COHORT_DESIGN,
                    vec![
                        PhaseAgent::always("demographic_modeler"),
                        PhaseAgent::always("comorbidity_modeler"),
                        PhaseAgent::always("cohort_architect"),
                        PhaseAgent::when("edge_case_challenger", AdversarialTesting),
                    ],
                    20,
                ),
                phase(
                    3,
                    phases::RECORD_SYNTHESIS,
                    vec![
                        PhaseAgent::always("patient_generator"),
                        PhaseAgent::always("lab_panel_generator"),
                        PhaseAgent::always("temporal_consistency_checker"),
                        PhaseAgent::when("outlier_injector", AdversarialTesting),
                    ],
                    60,
                ),
                phase(
                    4,
                    phases::PRIVACY_PROTECTION,
                    vec![
                        PhaseAgent::always("privacy_guard"),
                        PhaseAgent::always("anonymity_validator"),
                        PhaseAgent::when("reidentification_attacker", AdversarialTesting),
                    ],
                    20,
                ),
                phase(
                    5,
                    phases::CLINICAL_REVIEW,
                    vec![
                        PhaseAgent::when("clinical_reviewer", ClinicalReview),
                        PhaseAgent::always("qa_coordinator"),
                        PhaseAgent::when("plausibility_challenger", AdversarialTesting),
                    ],
                    30,
                ),
                phase(
                    6,
                    phases::EXPORT,
                    vec![
                        PhaseAgent::always("fhir_encoder"),
                        PhaseAgent::always("report_writer"),
                        PhaseAgent::always("export_validator"),
                    ],
                    15,
                ),
            ],
        }
    }

    /// Parses a plan from YAML.
    ///
    /// The plan is structurally checked; agent ids are checked later by
    /// [`PhasePlan::validate`].
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let plan: PhasePlan = serde_yaml::from_str(yaml)?;
        plan.check_structure()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;
        Ok(plan)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn total_phases(&self) -> usize {
        self.phases.len()
    }

    /// Sum of the phase duration hints.
    pub fn estimated_total(&self) -> Duration {
        self.phases.iter().map(|p| p.estimated_duration()).sum()
    }

    /// Checks indices, names and agent lists.
    fn check_structure(&self) -> Result<(), RegistryError> {
        if self.phases.is_empty() {
            return Err(RegistryError::InvalidPlan("plan has no phases".to_string()));
        }
        let mut names = HashSet::new();
        for (position, phase) in self.phases.iter().enumerate() {
            let expected = position as u32 + 1;
            if phase.index != expected {
                return Err(RegistryError::InvalidPlan(format!(
                    "phase '{}' has index {}, expected {}",
                    phase.name, phase.index, expected
                )));
            }
            if !names.insert(phase.name.as_str()) {
                return Err(RegistryError::InvalidPlan(format!(
                    "phase name '{}' is used twice",
                    phase.name
                )));
            }
            if phase.agents.is_empty() {
                return Err(RegistryError::InvalidPlan(format!(
                    "phase '{}' has no agents",
                    phase.name
                )));
            }
            let mut agents = HashSet::new();
            for entry in &phase.agents {
                if !agents.insert(entry.agent.as_str()) {
                    return Err(RegistryError::InvalidPlan(format!(
                        "agent '{}' appears twice in phase '{}'",
                        entry.agent, phase.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Checks the plan against the registry.
    ///
    /// # Errors
    ///
    /// - `InvalidPlan` for non-contiguous indices, duplicate names or empty phases
    /// - `UnknownAgentInPlan` for agent ids missing from the registry
    pub fn validate(&self, registry: &AgentRegistry) -> Result<(), RegistryError> {
        self.check_structure()?;

        if !registry.contains(&self.root_agent) {
            return Err(RegistryError::UnknownAgentInPlan {
                phase: "root".to_string(),
                agent: self.root_agent.clone(),
            });
        }

        for phase in &self.phases {
            for entry in &phase.agents {
                let descriptor = registry.descriptor(&entry.agent).map_err(|_| {
                    RegistryError::UnknownAgentInPlan {
                        phase: phase.name.clone(),
                        agent: entry.agent.clone(),
                    }
                })?;
                if descriptor.role == AgentRole::Adversarial
                    && entry.condition == AgentCondition::ClinicalReview
                {
                    return Err(RegistryError::InvalidPlan(format!(
                        "adversarial agent '{}' cannot be gated on clinical review",
                        entry.agent
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::register_builtin;

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        register_builtin(&mut registry).expect("register");
        registry
    }

    #[test]
    fn test_builtin_plan_is_valid() {
        let plan = PhasePlan::builtin();
        assert_eq!(plan.total_phases(), 6);
        plan.validate(&registry()).expect("valid");
        assert_eq!(plan.estimated_total(), Duration::from_secs(175));
    }

    #[test]
    fn test_conditions_filter_scheduled_agents() {
        let plan = PhasePlan::builtin();
        let review = &plan.phases[4];

        let plain = GenerationRequest::new(5, "CKD");
        assert_eq!(review.scheduled_agents(&plain), vec!["qa_coordinator"]);

        let full = GenerationRequest::new(5, "CKD")
            .with_adversarial_testing(true)
            .with_clinical_review(true);
        assert_eq!(
            review.scheduled_agents(&full),
            vec!["clinical_reviewer", "qa_coordinator", "plausibility_challenger"]
        );
    }

    #[test]
    fn test_yaml_round_trip_and_defaults() {
        let yaml = r#"
root_agent: master_orchestrator
phases:
  - index: 1
    name: literature_research
    agents:
      - agent: literature_miner
      - agent: guideline_extractor
      - agent: evidence_synthesizer
      - agent: evidence_skeptic
        condition: adversarial_testing
"#;
        let plan = PhasePlan::from_yaml(yaml).expect("parse");
        assert_eq!(plan.phases[0].agents[0].condition, AgentCondition::Always);
        assert_eq!(
            plan.phases[0].agents[3].condition,
            AgentCondition::AdversarialTesting
        );
        plan.validate(&registry()).expect("valid");

        let again = PhasePlan::from_yaml(&plan.to_yaml().expect("yaml")).expect("parse");
        assert_eq!(again, plan);
    }

    #[test]
    fn test_non_contiguous_indices_are_rejected() {
        let yaml = r#"
root_agent: master_orchestrator
phases:
  - index: 2
    name: cohort_design
    agents:
      - agent: demographic_modeler
"#;
        let err = PhasePlan::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("expected 1"));
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let mut plan = PhasePlan::builtin();
        plan.phases[2].agents.push(PhaseAgent::always("ghost_writer"));
        let err = plan.validate(&registry()).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::UnknownAgentInPlan { ref phase, ref agent }
                if phase == "record_synthesis" && agent == "ghost_writer"
        ));
    }
}
