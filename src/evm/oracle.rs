/// Findings and the detector interface
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::trace::{FrameId, TraceFacts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VulnerabilityKind {
    Reentrancy,
    TxOriginAuth,
}

impl Display for VulnerabilityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VulnerabilityKind::Reentrancy => write!(f, "REENTRANCY"),
            VulnerabilityKind::TxOriginAuth => write!(f, "TX_ORIGIN_AUTH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: VulnerabilityKind,
    pub severity: Severity,
    pub description: String,
    pub member: String,
    pub round: usize,
    pub frame: FrameId,
    /// Sequence index of the step that triggered the finding
    pub seq: usize,
}

impl Display for Finding {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} in `{}` (round {}): {}",
            self.severity, self.kind, self.member, self.round, self.description
        )
    }
}

/// The invocation a trace belongs to
#[derive(Debug, Clone, Copy)]
pub struct DetectionCtx<'a> {
    pub round: usize,
    pub member: &'a str,
}

impl<'a> DetectionCtx<'a> {
    pub fn new(round: usize, member: &'a str) -> Self {
        Self { round, member }
    }

    pub fn finding(
        &self,
        kind: VulnerabilityKind,
        severity: Severity,
        frame: FrameId,
        seq: usize,
        description: String,
    ) -> Finding {
        Finding {
            kind,
            severity,
            description,
            member: self.member.to_string(),
            round: self.round,
            frame,
            seq,
        }
    }
}

/// A trace-level analyzer. Implementations hold no per-trace state, so running one
/// twice on the same facts yields the same findings.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, facts: &TraceFacts, ctx: &DetectionCtx<'_>) -> Vec<Finding>;
}

/// Run every detector over one trace and concatenate their findings
pub fn run_detectors(detectors: &[Box<dyn Detector>], facts: &TraceFacts, ctx: &DetectionCtx<'_>) -> Vec<Finding> {
    detectors
        .iter()
        .flat_map(|detector| detector.detect(facts, ctx))
        .collect()
}
