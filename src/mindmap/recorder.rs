//! Chain-of-thought recorder for a single agent invocation.
//!
//! The `ThoughtRecorder` accumulates structured reasoning steps while an
//! agent works, the same way a trajectory collector accumulates
//! state-action-observation steps.

use super::node::{DecisionCriterion, ReasoningStep};

/// Builder for the ordered reasoning steps of one invocation.
///
/// # Usage Pattern
///
/// For each reasoning step:
/// 1. Call `consider()` for every input looked at
/// 2. Call `weigh()` for every hypothesis or option
/// 3. Call `criterion()` for every decision criterion and its weight
/// 4. Call `choose()` to close the step with the final choice
///
/// When the agent is done, call `finish()` to take the steps.
#[derive(Debug, Default)]
pub struct ThoughtRecorder {
    steps: Vec<ReasoningStep>,
    pending_inputs: Vec<String>,
    pending_hypotheses: Vec<String>,
    pending_criteria: Vec<DecisionCriterion>,
}

impl ThoughtRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an input considered in the current step.
    pub fn consider(&mut self, input: impl Into<String>) -> &mut Self {
        self.pending_inputs.push(input.into());
        self
    }

    /// Records a hypothesis or option weighed in the current step.
    pub fn weigh(&mut self, hypothesis: impl Into<String>) -> &mut Self {
        self.pending_hypotheses.push(hypothesis.into());
        self
    }

    /// Records a decision criterion and its relative weight.
    pub fn criterion(&mut self, name: impl Into<String>, weight: f64) -> &mut Self {
        self.pending_criteria.push(DecisionCriterion {
            name: name.into(),
            weight,
        });
        self
    }

    /// Closes the current step with its final choice.
    ///
    /// Pending inputs, hypotheses and criteria are moved into the step.
    pub fn choose(&mut self, choice: impl Into<String>) -> &mut Self {
        let step = ReasoningStep {
            inputs_considered: std::mem::take(&mut self.pending_inputs),
            hypotheses: std::mem::take(&mut self.pending_hypotheses),
            criteria: std::mem::take(&mut self.pending_criteria),
            choice: choice.into(),
        };
        self.steps.push(step);
        self
    }

    /// Records a complete step in one call.
    pub fn record_step(&mut self, step: ReasoningStep) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Returns the steps closed so far.
    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    pub fn has_steps(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Takes the recorded steps.
    ///
    /// Any half-built step (inputs recorded but no choice) is closed with an
    /// "undecided" choice so no considered input is lost.
    pub fn finish(mut self) -> Vec<ReasoningStep> {
        if !self.pending_inputs.is_empty()
            || !self.pending_hypotheses.is_empty()
            || !self.pending_criteria.is_empty()
        {
            self.choose("undecided");
        }
        self.steps
    }

    /// Builds the single step recorded for an invocation that did not finish.
    pub fn failure_step(agent_id: &str, reason: &str) -> ReasoningStep {
        ReasoningStep {
            inputs_considered: vec![format!("invocation of {}", agent_id)],
            hypotheses: vec!["output produced".to_string(), "no output".to_string()],
            criteria: vec![DecisionCriterion {
                name: "invocation result".to_string(),
                weight: 1.0,
            }],
            choice: format!("no output: {}", reason),
        }
    }
}
