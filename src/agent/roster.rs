//! Agent roster construction.
//!
//! Maps configured agent names to concrete strategies via a tagged
//! registry; no reflection, no capability probing. An unknown name is a
//! configuration error, never a silent fallback.

use std::sync::Arc;

use crate::agent::Agent;
use crate::agent::mock::{
    DocsAuditor, LogicAuditor, PatchFixer, PerformanceOracle, RefactorAdvisor, RobustnessAuditor,
    SnippetGenerator, StyleAuditor,
};
use crate::config::AgentsSection;
use crate::errors::ConfigError;

/// The agents taking part in one run, by role.
pub struct Roster {
    pub generator: Arc<dyn Agent>,
    pub detectors: Vec<Arc<dyn Agent>>,
    pub fixer: Arc<dyn Agent>,
    pub refactorer: Arc<dyn Agent>,
    pub performance: Arc<dyn Agent>,
    pub documentation: Arc<dyn Agent>,
}

impl Roster {
    /// Build the roster from configuration.
    ///
    /// Each agent gets its own RNG seed derived from the configured base
    /// seed by position, so a seeded run is reproducible while agents stay
    /// mutually independent.
    pub fn from_config(config: &AgentsSection) -> Result<Self, ConfigError> {
        if config.detectors.is_empty() {
            return Err(ConfigError::NoDetectors);
        }

        let mut next_seed = {
            let mut counter = 0u64;
            move || {
                counter += 1;
                config.seed.map(|seed| seed.wrapping_add(counter))
            }
        };

        let generator = build_agent(&config.generator, config, next_seed())?;
        let detectors = config
            .detectors
            .iter()
            .map(|name| build_agent(name, config, next_seed()))
            .collect::<Result<Vec<_>, _>>()?;
        let fixer = build_agent(&config.fixer, config, next_seed())?;
        let refactorer = build_agent(&config.refactorer, config, next_seed())?;
        let performance = build_agent(&config.performance, config, next_seed())?;
        let documentation = build_agent(&config.documentation, config, next_seed())?;

        Ok(Self {
            generator,
            detectors,
            fixer,
            refactorer,
            performance,
            documentation,
        })
    }

    /// (name, role) pairs for the ledger's agent registry.
    pub fn registry(&self) -> Vec<(String, &'static str)> {
        let mut entries = vec![(self.generator.name().to_string(), "generation")];
        for detector in &self.detectors {
            entries.push((detector.name().to_string(), "detection"));
        }
        entries.push((self.fixer.name().to_string(), "fixing"));
        entries.push((self.refactorer.name().to_string(), "refactoring"));
        entries.push((self.performance.name().to_string(), "performance"));
        entries.push((self.documentation.name().to_string(), "documentation"));
        entries
    }
}

fn build_agent(
    name: &str,
    config: &AgentsSection,
    seed: Option<u64>,
) -> Result<Arc<dyn Agent>, ConfigError> {
    let latency = config.latency();
    let agent: Arc<dyn Agent> = match name {
        "snippet-generator" => Arc::new(SnippetGenerator::new(latency)),
        "style-auditor" => Arc::new(StyleAuditor::new(latency, config.hallucination_rate, seed)),
        "logic-auditor" => Arc::new(LogicAuditor::new(latency, config.hallucination_rate, seed)),
        "robustness-auditor" => Arc::new(RobustnessAuditor::new(
            latency,
            config.hallucination_rate,
            seed,
        )),
        "patch-fixer" => Arc::new(PatchFixer::new(latency, config.fix_failure_rate, seed)),
        "refactor-advisor" => Arc::new(RefactorAdvisor::new(latency)),
        "performance-oracle" => Arc::new(PerformanceOracle::new(latency, seed)),
        "docs-auditor" => Arc::new(DocsAuditor::new(latency)),
        other => {
            return Err(ConfigError::UnknownAgent {
                name: other.to_string(),
            });
        }
    };
    Ok(agent)
}
