//! Built-in synthetic cohort agents.
//!
//! Each built-in agent is a deterministic function of its invocation
//! context: the same request always yields the same outputs, decisions and
//! reasoning. Agents read upstream work through the context only.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::RegistryError;
use crate::jobs::PrivacyLevel;
use crate::mindmap::ThoughtRecorder;

use super::error::{AgentError, AgentResult};
use super::registry::{Agent, AgentRegistry};
use super::types::{
    AgentCategory, AgentDescriptor, AgentOutcome, AgentRole, ClinicalAssessment, Finding,
    FindingSeverity, InvocationContext, PrivacyAssessment, RiskLevel,
};

/// Id of the agent whose invocation becomes every job's root node.
pub const ROOT_AGENT: &str = "master_orchestrator";

/// Names of the built-in phases.
pub mod phases {
    pub const LITERATURE_RESEARCH: &str = "literature_research";
    pub const COHORT_DESIGN: &str = "cohort_design";
    pub const RECORD_SYNTHESIS: &str = "record_synthesis";
    pub const PRIVACY_PROTECTION: &str = "privacy_protection";
    pub const CLINICAL_REVIEW: &str = "clinical_review";
    pub const EXPORT: &str = "export";
}

type Behavior = fn(&InvocationContext, &mut ThoughtRecorder) -> AgentResult<AgentOutcome>;

/// An agent backed by a plain function.
pub struct BuiltinAgent {
    descriptor: AgentDescriptor,
    behavior: Behavior,
}

impl BuiltinAgent {
    pub fn new(descriptor: AgentDescriptor, behavior: Behavior) -> Self {
        Self {
            descriptor,
            behavior,
        }
    }
}

#[async_trait]
impl Agent for BuiltinAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, ctx: &InvocationContext) -> AgentResult<AgentOutcome> {
        if ctx.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let mut recorder = ThoughtRecorder::new();
        let outcome = (self.behavior)(ctx, &mut recorder)?;
        Ok(outcome.with_reasoning(recorder.finish()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Splits a compound condition such as "CKD+Diabetes" into its parts.
fn conditions(ctx: &InvocationContext) -> Vec<String> {
    ctx.request
        .condition
        .replace(" and ", "+")
        .split(['+', ',', '/'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn sibling<'a>(ctx: &'a InvocationContext, agent: &str) -> AgentResult<&'a Value> {
    ctx.sibling(agent)
        .ok_or_else(|| AgentError::MissingInput(agent.to_string()))
}

fn upstream<'a>(ctx: &'a InvocationContext, phase: &str, agent: &str) -> AgentResult<&'a Value> {
    ctx.upstream(phase, agent)
        .ok_or_else(|| AgentError::MissingInput(format!("{}.{}", phase, agent)))
}

fn labs_for(condition: &str) -> Vec<&'static str> {
    let lower = condition.to_lowercase();
    if lower.contains("ckd") || lower.contains("kidney") {
        vec!["eGFR", "creatinine", "urine albumin"]
    } else if lower.contains("diabet") {
        vec!["HbA1c", "fasting glucose"]
    } else if lower.contains("heart") || lower.contains("hypertension") {
        vec!["BNP", "lipid panel"]
    } else {
        vec!["CBC", "metabolic panel"]
    }
}

// ============================================================================
// Root
// ============================================================================

fn master_orchestrator(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let request = &ctx.request;
    r.consider(format!("condition={}", request.condition))
        .consider(format!("population_size={}", request.population_size))
        .consider(format!("privacy_level={}", request.privacy_level))
        .weigh("full pipeline")
        .weigh("pipeline without adversarial review")
        .criterion("requested adversarial testing", 0.6)
        .criterion("requested clinical review", 0.4);
    let plan = if request.enable_adversarial_testing {
        "full pipeline"
    } else {
        "pipeline without adversarial review"
    };
    r.choose(plan);

    Ok(AgentOutcome::new(
        json!({
            "condition": request.condition,
            "population_size": request.population_size,
            "adversarial_testing": request.enable_adversarial_testing,
            "clinical_review": request.require_clinical_review,
            "privacy_level": request.privacy_level,
        }),
        format!("Planned {} for {}", plan, request.condition),
    ))
}

// ============================================================================
// Phase 1: literature research
// ============================================================================

fn literature_miner(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let conds = conditions(ctx);
    r.consider(format!("condition string '{}'", ctx.request.condition))
        .weigh("treat as a single condition")
        .weigh("split into comorbid conditions")
        .criterion("separator present", 1.0)
        .choose(format!("{} condition(s): {}", conds.len(), conds.join(", ")));

    let sources: Vec<String> = conds
        .iter()
        .map(|c| format!("{} cohort studies", c))
        .collect();
    Ok(AgentOutcome::new(
        json!({ "conditions": conds, "sources": sources }),
        format!("Mined {} literature sources", sources.len()),
    ))
}

fn guideline_extractor(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let conds = conditions(ctx);
    r.consider("clinical practice guidelines")
        .weigh("one guideline per condition")
        .weigh("combined comorbidity guideline")
        .criterion("coverage", 0.7)
        .criterion("specificity", 0.3)
        .choose("one guideline per condition");

    let guidelines: Vec<String> = conds
        .iter()
        .map(|c| format!("{} management guideline", c))
        .collect();
    Ok(AgentOutcome::new(
        json!({ "guidelines": guidelines }),
        format!("Extracted {} guidelines", guidelines.len()),
    ))
}

fn evidence_synthesizer(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let mined = sibling(ctx, "literature_miner")?;
    let guidelines = sibling(ctx, "guideline_extractor")?;
    let source_count = mined["sources"].as_array().map_or(0, Vec::len);
    let guideline_count = guidelines["guidelines"].as_array().map_or(0, Vec::len);

    r.consider(format!("{} literature sources", source_count))
        .consider(format!("{} guidelines", guideline_count))
        .weigh("evidence sufficient")
        .weigh("evidence insufficient")
        .criterion("every condition has a guideline", 1.0);
    let sufficient = source_count > 0 && guideline_count >= source_count;
    r.choose(if sufficient {
        "evidence sufficient"
    } else {
        "evidence insufficient"
    });

    if !sufficient {
        return Err(AgentError::Failure(
            "no usable evidence for the requested condition".to_string(),
        ));
    }
    Ok(AgentOutcome::new(
        json!({
            "conditions": mined["conditions"],
            "source_count": source_count,
            "guideline_count": guideline_count,
        }),
        "Evidence base validated",
    ))
}

fn evidence_skeptic(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let evidence = sibling(ctx, "evidence_synthesizer")?;
    let sources = evidence["source_count"].as_u64().unwrap_or(0);
    let conds = evidence["conditions"].as_array().map_or(0, Vec::len) as u64;

    r.consider(format!("{} sources for {} conditions", sources, conds))
        .weigh("evidence is redundant")
        .weigh("evidence relies on single sources")
        .criterion("sources per condition", 1.0);
    let mut findings = Vec::new();
    if sources <= conds {
        r.choose("evidence relies on single sources");
        findings.push(
            Finding::new(
                FindingSeverity::Minor,
                "each condition is backed by a single literature source",
            )
            .targeting("literature_miner"),
        );
    } else {
        r.choose("evidence is redundant");
    }

    Ok(AgentOutcome::new(
        json!({ "challenged": "evidence_synthesizer", "findings": findings.len() }),
        format!("Raised {} evidence finding(s)", findings.len()),
    )
    .with_findings(findings))
}

// ============================================================================
// Phase 2: cohort design
// ============================================================================

fn demographic_modeler(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let population = ctx.request.population_size;
    let band_count = population.min(5);
    r.consider(format!("population_size={}", population))
        .weigh("five age bands")
        .weigh("fewer bands than patients")
        .criterion("every band populated", 1.0)
        .choose(format!("{} age band(s)", band_count));

    let width = 80 / band_count.max(1);
    let bands: Vec<String> = (0..band_count)
        .map(|i| format!("{}-{}", 18 + i * width, 18 + (i + 1) * width - 1))
        .collect();
    Ok(AgentOutcome::new(
        json!({ "age_bands": bands, "sex_ratio": 0.5 }),
        format!("Modeled {} age bands", bands.len()),
    ))
}

fn comorbidity_modeler(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let evidence = upstream(ctx, phases::LITERATURE_RESEARCH, "evidence_synthesizer")?;
    let conds: Vec<String> = evidence["conditions"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    r.consider(format!("validated conditions: {}", conds.join(", ")))
        .weigh("independent prevalence")
        .weigh("primary condition with decaying comorbidity")
        .criterion("clinical co-occurrence", 0.8)
        .criterion("simplicity", 0.2)
        .choose("primary condition with decaying comorbidity");

    let comorbidities: Vec<Value> = conds
        .iter()
        .enumerate()
        .map(|(i, c)| json!({ "condition": c, "prevalence": 1.0 / (i as f64 + 1.0) }))
        .collect();
    Ok(AgentOutcome::new(
        json!({ "comorbidities": comorbidities }),
        format!("Modeled {} comorbidities", comorbidities.len()),
    ))
}

fn cohort_architect(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let demographics = sibling(ctx, "demographic_modeler")?;
    let comorbidities = sibling(ctx, "comorbidity_modeler")?;
    let bands = demographics["age_bands"].as_array().map_or(0, Vec::len);
    let conds = comorbidities["comorbidities"].as_array().map_or(0, Vec::len);
    let strata = (bands * conds.max(1)) as u64;

    r.consider(format!("{} age bands", bands))
        .consider(format!("{} comorbidities", conds))
        .weigh("cross every band with every condition")
        .criterion("stratification coverage", 1.0)
        .choose(format!("{} strata", strata));

    Ok(AgentOutcome::new(
        json!({
            "strata": strata,
            "population_size": ctx.request.population_size,
            "age_bands": demographics["age_bands"],
            "comorbidities": comorbidities["comorbidities"],
        }),
        format!("Designed cohort with {} strata", strata),
    ))
}

fn edge_case_challenger(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let design = sibling(ctx, "cohort_architect")?;
    let strata = design["strata"].as_u64().unwrap_or(0);
    let population = ctx.request.population_size;

    r.consider(format!("{} strata for {} patients", strata, population))
        .weigh("some strata will be empty")
        .weigh("all strata can be filled")
        .criterion("patients per stratum", 1.0);
    let mut findings = Vec::new();
    if population < strata.saturating_mul(2) {
        r.choose("some strata will be sparse");
        findings.push(
            Finding::new(
                FindingSeverity::Major,
                format!(
                    "{} patients cannot fill {} strata with at least two patients each",
                    population, strata
                ),
            )
            .targeting("cohort_architect"),
        );
    } else {
        r.choose("all strata can be filled");
    }

    Ok(AgentOutcome::new(
        json!({ "challenged": "cohort_architect", "findings": findings.len() }),
        format!("Raised {} design finding(s)", findings.len()),
    )
    .with_findings(findings))
}

// ============================================================================
// Phase 3: record synthesis
// ============================================================================

fn patient_generator(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let design = upstream(ctx, phases::COHORT_DESIGN, "cohort_architect")?;
    let population = ctx.request.population_size;
    let strata = design["strata"].as_u64().unwrap_or(1).max(1);

    r.consider(format!("{} strata", strata))
        .consider(format!("population_size={}", population))
        .weigh("proportional allocation")
        .weigh("equal allocation")
        .criterion("matches prevalence", 0.7)
        .criterion("balanced strata", 0.3)
        .choose("proportional allocation");

    let sample: Vec<String> = (1..=population.min(3))
        .map(|i| format!("P-{:06}", i))
        .collect();
    Ok(AgentOutcome::new(
        json!({
            "records": population,
            "per_stratum": population / strata,
            "sample_ids": sample,
        }),
        format!("Generated {} patient records", population),
    ))
}

fn lab_panel_generator(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let conds = conditions(ctx);
    r.consider(format!("conditions: {}", conds.join(", ")))
        .weigh("condition-specific panels")
        .weigh("generic panel for everyone")
        .criterion("diagnostic relevance", 1.0)
        .choose("condition-specific panels");

    let panels: Vec<Value> = conds
        .iter()
        .map(|c| json!({ "condition": c, "labs": labs_for(c) }))
        .collect();
    Ok(AgentOutcome::new(
        json!({ "panels": panels }),
        format!("Assigned {} lab panels", panels.len()),
    ))
}

fn temporal_consistency_checker(
    ctx: &InvocationContext,
    r: &mut ThoughtRecorder,
) -> AgentResult<AgentOutcome> {
    let patients = sibling(ctx, "patient_generator")?;
    let labs = sibling(ctx, "lab_panel_generator")?;
    let records = patients["records"].as_u64().unwrap_or(0);
    let panels = labs["panels"].as_array().map_or(0, Vec::len);

    r.consider(format!("{} records", records))
        .consider(format!("{} lab panels", panels))
        .weigh("labs follow diagnosis dates")
        .weigh("labs precede diagnosis dates")
        .criterion("temporal order", 1.0)
        .choose("labs follow diagnosis dates");

    Ok(AgentOutcome::new(
        json!({ "checked_records": records, "panels": panels, "consistent": true }),
        format!("Sequenced {} records consistently", records),
    ))
}

fn outlier_injector(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let checked = sibling(ctx, "temporal_consistency_checker")?;
    let records = checked["checked_records"].as_u64().unwrap_or(0);
    let injected = (records / 20).max(1);

    r.consider(format!("{} consistent records", records))
        .weigh("outliers are detected")
        .weigh("outliers pass unnoticed")
        .criterion("detection rate", 1.0)
        .choose("outliers pass unnoticed");

    let finding = Finding::new(
        FindingSeverity::Minor,
        format!("{} injected lab outlier(s) passed consistency checks", injected),
    )
    .targeting("lab_panel_generator");
    Ok(AgentOutcome::new(
        json!({ "injected": injected, "detected": 0 }),
        format!("Injected {} outliers", injected),
    )
    .with_findings(vec![finding]))
}

// ============================================================================
// Phase 4: privacy protection
// ============================================================================

fn privacy_guard(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let population = ctx.request.population_size;
    let level = ctx.request.privacy_level;
    let (k, mut score, mut safeguards) = match level {
        PrivacyLevel::Low => (2, 0.70, vec!["pseudonymized identifiers"]),
        PrivacyLevel::Medium => (5, 0.85, vec!["pseudonymized identifiers", "date shifting"]),
        PrivacyLevel::High => (
            10,
            0.95,
            vec!["pseudonymized identifiers", "date shifting", "generalized zip codes"],
        ),
    };
    if population < 50 {
        safeguards.push("small cohort suppression");
        score -= 0.05;
    }
    let risk = match (level, population < 50) {
        (PrivacyLevel::High, _) => RiskLevel::Low,
        (PrivacyLevel::Medium, false) => RiskLevel::Low,
        (PrivacyLevel::Medium, true) | (PrivacyLevel::Low, false) => RiskLevel::Medium,
        (PrivacyLevel::Low, true) => RiskLevel::High,
    };

    r.consider(format!("privacy_level={}", level))
        .consider(format!("population_size={}", population))
        .weigh("k-anonymity only")
        .weigh("k-anonymity with generalization")
        .criterion("re-identification risk", 0.7)
        .criterion("data utility", 0.3)
        .choose(format!("k={} with {} safeguards", k, safeguards.len()));

    let assessment = PrivacyAssessment {
        risk,
        anonymity_score: score,
        safeguards: safeguards.iter().map(|s| s.to_string()).collect(),
    };
    Ok(AgentOutcome::new(
        json!({ "k_anonymity": k, "risk": risk, "anonymity_score": score }),
        format!("Applied k={} anonymization", k),
    )
    .with_privacy(assessment))
}

fn anonymity_validator(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let guard = sibling(ctx, "privacy_guard")?;
    let k = guard["k_anonymity"].as_u64().unwrap_or(0);

    r.consider(format!("k={}", k))
        .weigh("accept anonymization")
        .weigh("reject anonymization")
        .criterion("k >= 2", 1.0);
    if k < 2 {
        r.choose("reject anonymization");
        return Err(AgentError::Failure(format!("k-anonymity {} is below 2", k)));
    }
    r.choose("accept anonymization");

    Ok(AgentOutcome::new(
        json!({ "validated_k": k, "accepted": true }),
        format!("Validated k={} anonymity", k),
    ))
}

fn reidentification_attacker(
    ctx: &InvocationContext,
    r: &mut ThoughtRecorder,
) -> AgentResult<AgentOutcome> {
    let guard = sibling(ctx, "privacy_guard")?;
    let risk: RiskLevel =
        serde_json::from_value(guard["risk"].clone()).unwrap_or(RiskLevel::Medium);

    r.consider(format!("risk={:?}", risk))
        .weigh("linkage attack succeeds")
        .weigh("linkage attack fails")
        .criterion("quasi-identifier uniqueness", 1.0);
    let severity = match risk {
        RiskLevel::Low => None,
        RiskLevel::Medium => Some(FindingSeverity::Minor),
        RiskLevel::High => Some(FindingSeverity::Major),
    };
    let findings: Vec<Finding> = match severity {
        Some(severity) => {
            r.choose("linkage attack succeeds on some records");
            vec![Finding::new(
                severity,
                "quasi-identifiers allow linkage of some records",
            )
            .targeting("privacy_guard")]
        }
        None => {
            r.choose("linkage attack fails");
            Vec::new()
        }
    };

    Ok(AgentOutcome::new(
        json!({ "attack": "linkage", "succeeded": !findings.is_empty() }),
        format!("Re-identification attack raised {} finding(s)", findings.len()),
    )
    .with_findings(findings))
}

// ============================================================================
// Phase 5: clinical review
// ============================================================================

fn clinical_reviewer(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let records = upstream(ctx, phases::RECORD_SYNTHESIS, "temporal_consistency_checker")?;
    let consistent = records["consistent"].as_bool().unwrap_or(false);
    let plausibility = if consistent { 0.9 } else { 0.5 };

    r.consider(format!("temporal consistency={}", consistent))
        .weigh("approve cohort")
        .weigh("request revision")
        .criterion("clinical plausibility", 1.0)
        .choose(if consistent {
            "approve cohort"
        } else {
            "request revision"
        });

    let assessment = ClinicalAssessment {
        approved: consistent,
        plausibility_score: plausibility,
        notes: vec![format!("reviewed {} cohort", ctx.request.condition)],
    };
    Ok(AgentOutcome::new(
        json!({ "approved": consistent, "plausibility_score": plausibility }),
        if consistent {
            "Cohort clinically approved"
        } else {
            "Cohort needs revision"
        },
    )
    .with_clinical(assessment))
}

fn qa_coordinator(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let privacy = upstream(ctx, phases::PRIVACY_PROTECTION, "anonymity_validator")?;
    let privacy_ok = privacy["accepted"].as_bool().unwrap_or(false);
    let clinical_ok = ctx
        .sibling("clinical_reviewer")
        .map(|v| v["approved"].as_bool().unwrap_or(false));

    r.consider(format!("privacy accepted={}", privacy_ok))
        .consider(match clinical_ok {
            Some(approved) => format!("clinical approved={}", approved),
            None => "clinical review not requested".to_string(),
        })
        .weigh("release for export")
        .weigh("hold for rework")
        .criterion("privacy", 0.5)
        .criterion("clinical plausibility", 0.5);
    let release = privacy_ok && clinical_ok.unwrap_or(true);
    r.choose(if release {
        "release for export"
    } else {
        "hold for rework"
    });

    if !release {
        return Err(AgentError::Failure(
            "quality gate not met for export".to_string(),
        ));
    }
    Ok(AgentOutcome::new(
        json!({ "released": true, "clinical_review": clinical_ok.is_some() }),
        "Quality gate passed",
    ))
}

fn plausibility_challenger(
    ctx: &InvocationContext,
    r: &mut ThoughtRecorder,
) -> AgentResult<AgentOutcome> {
    let conds = conditions(ctx);
    r.consider(format!("{} comorbid conditions", conds.len()))
        .weigh("interaction effects modeled")
        .weigh("interaction effects ignored")
        .criterion("comorbidity interactions", 1.0);
    let findings = if conds.len() > 1 {
        r.choose("interaction effects ignored");
        vec![Finding::new(
            FindingSeverity::Info,
            format!("lab values do not model interactions between {}", conds.join(" and ")),
        )
        .targeting("lab_panel_generator")]
    } else {
        r.choose("interaction effects not applicable");
        Vec::new()
    };

    Ok(AgentOutcome::new(
        json!({ "challenged": "qa_coordinator", "findings": findings.len() }),
        format!("Raised {} plausibility finding(s)", findings.len()),
    )
    .with_findings(findings))
}

// ============================================================================
// Phase 6: export
// ============================================================================

fn fhir_encoder(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let population = ctx.request.population_size;
    r.consider(format!("{} records", population))
        .weigh("FHIR R4 bundle")
        .weigh("flat CSV")
        .criterion("interoperability", 1.0)
        .choose("FHIR R4 bundle");

    Ok(AgentOutcome::new(
        json!({ "format": "FHIR R4", "bundle_entries": population }),
        format!("Encoded {} patients as FHIR", population),
    ))
}

fn report_writer(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let mut sections = vec!["methods", "cohort characteristics", "privacy"];
    if ctx.request.require_clinical_review {
        sections.push("clinical review");
    }
    if ctx.request.enable_adversarial_testing {
        sections.push("robustness findings");
    }
    r.consider("job request flags")
        .weigh("full report")
        .criterion("reproducibility", 1.0)
        .choose(format!("{} sections", sections.len()));

    Ok(AgentOutcome::new(
        json!({ "sections": sections }),
        format!("Wrote report with {} sections", sections.len()),
    ))
}

fn export_validator(ctx: &InvocationContext, r: &mut ThoughtRecorder) -> AgentResult<AgentOutcome> {
    let bundle = sibling(ctx, "fhir_encoder")?;
    let report = sibling(ctx, "report_writer")?;
    let entries = bundle["bundle_entries"].as_u64().unwrap_or(0);

    r.consider(format!("{} bundle entries", entries))
        .consider(format!(
            "{} report sections",
            report["sections"].as_array().map_or(0, Vec::len)
        ))
        .weigh("export matches population")
        .weigh("export incomplete")
        .criterion("entry count", 1.0);
    if entries != ctx.request.population_size {
        r.choose("export incomplete");
        return Err(AgentError::Failure(format!(
            "bundle has {} entries, expected {}",
            entries, ctx.request.population_size
        )));
    }
    r.choose("export matches population");

    Ok(AgentOutcome::new(
        json!({ "valid": true, "entries": entries }),
        "Export validated",
    ))
}

// ============================================================================
// Catalog
// ============================================================================

fn builtin(descriptor: AgentDescriptor, behavior: Behavior) -> Arc<dyn Agent> {
    Arc::new(BuiltinAgent::new(descriptor, behavior))
}

/// Returns every built-in agent.
pub fn builtin_agents() -> Vec<Arc<dyn Agent>> {
    use AgentCategory::*;
    use AgentRole::*;

    vec![
        builtin(
            AgentDescriptor::new(ROOT_AGENT, Coordinator, Orchestration, "Plans the job"),
            master_orchestrator,
        ),
        builtin(
            AgentDescriptor::new("literature_miner", Doer, Research, "Collects literature sources"),
            literature_miner,
        ),
        builtin(
            AgentDescriptor::new("guideline_extractor", Doer, Research, "Extracts practice guidelines"),
            guideline_extractor,
        ),
        builtin(
            AgentDescriptor::new("evidence_synthesizer", Coordinator, Research, "Validates the evidence base")
                .consuming(&["literature_miner", "guideline_extractor"]),
            evidence_synthesizer,
        ),
        builtin(
            AgentDescriptor::new("evidence_skeptic", Adversarial, QualityAssurance, "Challenges evidence depth")
                .consuming(&["evidence_synthesizer"]),
            evidence_skeptic,
        ),
        builtin(
            AgentDescriptor::new("demographic_modeler", Doer, Modeling, "Models age and sex distribution"),
            demographic_modeler,
        ),
        builtin(
            AgentDescriptor::new("comorbidity_modeler", Doer, Modeling, "Models comorbidity prevalence")
                .consuming(&["literature_research.evidence_synthesizer"]),
            comorbidity_modeler,
        ),
        builtin(
            AgentDescriptor::new("cohort_architect", Coordinator, Modeling, "Stratifies the cohort")
                .consuming(&["demographic_modeler", "comorbidity_modeler"]),
            cohort_architect,
        ),
        builtin(
            AgentDescriptor::new("edge_case_challenger", Adversarial, QualityAssurance, "Probes sparse strata")
                .consuming(&["cohort_architect"]),
            edge_case_challenger,
        ),
        builtin(
            AgentDescriptor::new("patient_generator", Doer, Synthesis, "Generates patient records")
                .consuming(&["cohort_design.cohort_architect"]),
            patient_generator,
        ),
        builtin(
            AgentDescriptor::new("lab_panel_generator", Doer, Synthesis, "Assigns lab panels"),
            lab_panel_generator,
        ),
        builtin(
            AgentDescriptor::new("temporal_consistency_checker", Coordinator, QualityAssurance, "Orders clinical events")
                .consuming(&["patient_generator", "lab_panel_generator"]),
            temporal_consistency_checker,
        ),
        builtin(
            AgentDescriptor::new("outlier_injector", Adversarial, QualityAssurance, "Injects implausible values")
                .consuming(&["temporal_consistency_checker"]),
            outlier_injector,
        ),
        builtin(
            AgentDescriptor::new("privacy_guard", Doer, Privacy, "Anonymizes records"),
            privacy_guard,
        ),
        builtin(
            AgentDescriptor::new("anonymity_validator", Coordinator, Privacy, "Validates anonymity level")
                .consuming(&["privacy_guard"]),
            anonymity_validator,
        ),
        builtin(
            AgentDescriptor::new("reidentification_attacker", Adversarial, QualityAssurance, "Attempts linkage attacks")
                .consuming(&["privacy_guard"]),
            reidentification_attacker,
        ),
        builtin(
            AgentDescriptor::new("clinical_reviewer", Doer, Clinical, "Reviews clinical plausibility")
                .consuming(&["record_synthesis.temporal_consistency_checker"]),
            clinical_reviewer,
        ),
        builtin(
            AgentDescriptor::new("qa_coordinator", Coordinator, QualityAssurance, "Gates release for export")
                .consuming(&["privacy_protection.anonymity_validator", "clinical_reviewer"]),
            qa_coordinator,
        ),
        builtin(
            AgentDescriptor::new("plausibility_challenger", Adversarial, QualityAssurance, "Challenges comorbidity realism"),
            plausibility_challenger,
        ),
        builtin(
            AgentDescriptor::new("fhir_encoder", Doer, Export, "Encodes FHIR bundles"),
            fhir_encoder,
        ),
        builtin(
            AgentDescriptor::new("report_writer", Doer, Export, "Writes the cohort report"),
            report_writer,
        ),
        builtin(
            AgentDescriptor::new("export_validator", Coordinator, Export, "Validates export artifacts")
                .consuming(&["fhir_encoder", "report_writer"]),
            export_validator,
        ),
    ]
}

/// Registers every built-in agent.
pub fn register_builtin(registry: &mut AgentRegistry) -> Result<(), RegistryError> {
    registry.register_all(builtin_agents())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::GenerationRequest;
    use crate::mindmap::PhaseRef;
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx(request: GenerationRequest) -> InvocationContext {
        InvocationContext {
            job_id: Uuid::new_v4(),
            phase: PhaseRef::new(1, phases::LITERATURE_RESEARCH),
            attempt: 1,
            request: Arc::new(request),
            phase_input: Arc::new(json!({})),
            sibling_outputs: Arc::new(BTreeMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_catalog_registers_without_duplicates() {
        let mut registry = AgentRegistry::new();
        register_builtin(&mut registry).expect("register");
        assert!(registry.contains(ROOT_AGENT));
        assert_eq!(registry.len(), builtin_agents().len());
    }

    #[test]
    fn test_conditions_split_compound_names() {
        let c = ctx(GenerationRequest::new(5, "CKD+Diabetes"));
        assert_eq!(conditions(&c), vec!["CKD", "Diabetes"]);
        let c = ctx(GenerationRequest::new(5, "Asthma and COPD, Heart failure"));
        assert_eq!(conditions(&c), vec!["Asthma", "COPD", "Heart failure"]);
    }

    #[tokio::test]
    async fn test_builtin_agents_are_deterministic() {
        let agent = BuiltinAgent::new(
            AgentDescriptor::new("literature_miner", AgentRole::Doer, AgentCategory::Research, ""),
            literature_miner,
        );
        let c = ctx(GenerationRequest::new(5, "CKD+Diabetes"));
        let a = agent.invoke(&c).await.expect("invoke");
        let b = agent.invoke(&c).await.expect("invoke");
        assert_eq!(a.output, b.output);
        assert_eq!(a.reasoning, b.reasoning);
        assert!(!a.reasoning.is_empty());
    }

    #[tokio::test]
    async fn test_coordinator_reports_missing_sibling() {
        let agent = BuiltinAgent::new(
            AgentDescriptor::new("evidence_synthesizer", AgentRole::Coordinator, AgentCategory::Research, ""),
            evidence_synthesizer,
        );
        let err = agent
            .invoke(&ctx(GenerationRequest::new(5, "CKD")))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MissingInput(name) if name == "literature_miner"));
    }

    #[tokio::test]
    async fn test_builtin_agent_stops_when_cancelled() {
        let agent = BuiltinAgent::new(
            AgentDescriptor::new("literature_miner", AgentRole::Doer, AgentCategory::Research, ""),
            literature_miner,
        );
        let c = ctx(GenerationRequest::new(5, "CKD"));
        c.cancel.cancel();
        let err = agent.invoke(&c).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[test]
    fn test_privacy_guard_scales_with_level_and_size() {
        let mut r = ThoughtRecorder::new();
        let small_low = privacy_guard(
            &ctx(GenerationRequest::new(10, "CKD").with_privacy_level(PrivacyLevel::Low)),
            &mut r,
        )
        .expect("guard");
        assert_eq!(small_low.privacy.as_ref().map(|p| p.risk), Some(RiskLevel::High));

        let large_high = privacy_guard(
            &ctx(GenerationRequest::new(500, "CKD").with_privacy_level(PrivacyLevel::High)),
            &mut r,
        )
        .expect("guard");
        assert_eq!(large_high.privacy.as_ref().map(|p| p.risk), Some(RiskLevel::Low));
        assert_eq!(large_high.output["k_anonymity"], 10);
    }
}
