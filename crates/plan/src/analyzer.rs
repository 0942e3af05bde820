use anyhow::{Context as _, Result};
use log::debug;

use crate::{errors::PlanError, AnalyzerConfig, Context, Node};

/// A plan rewrite.
/// Receives the whole plan and returns the rewritten plan.
pub type RuleFn = fn(&Context, &Analyzer, Node) -> Result<Node>;

/// A named plan rewrite
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub apply: RuleFn,
}

/// Runs an ordered list of rules over a resolved plan
pub struct Analyzer {
    config: AnalyzerConfig,
    rules: Vec<Rule>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config, rules: vec![] }
    }

    /// The number of workers a parallel operator may use
    pub fn parallelism(&self) -> usize {
        self.config.parallelism
    }

    /// Append a rule.
    /// Rule names are unique.
    pub fn add_rule(&mut self, name: &'static str, apply: RuleFn) -> Result<(), PlanError> {
        if self.rules.iter().any(|rule| rule.name == name) {
            return Err(PlanError::DuplicateRule(name.to_owned()));
        }
        self.rules.push(Rule { name, apply });
        Ok(())
    }

    /// The names of the registered rules, in order of application
    pub fn rules(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.name)
    }

    /// Apply every rule in order.
    /// The first failing rule aborts the analysis.
    pub fn analyze(&self, ctx: &Context, mut plan: Node) -> Result<Node> {
        for rule in &self.rules {
            debug!("applying rule {}", rule.name);
            plan = (rule.apply)(ctx, self, plan).with_context(|| format!("rule `{}` failed", rule.name))?;
        }
        Ok(plan)
    }
}
