/// Run results: per-round records, the summary, and their renderings
use std::{fmt::Write as _, fs, path::Path};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    evm::oracle::{Finding, Severity},
    fuzzers::evm_fuzzer::{Round, RoundStatus, TxOutcome},
};

pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_CRITICAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Rounds that started, whatever their outcome
    pub rounds_attempted: usize,
    pub rounds_completed: usize,
    pub rounds_failed: usize,
    pub rounds_cancelled: usize,
    pub calls_analyzed: usize,
    pub calls_reverted: usize,
    pub calls_inconclusive: usize,
    pub calls_errored: usize,
    pub critical: usize,
    pub warnings: usize,
}

impl Summary {
    fn of(rounds: &[Round]) -> Self {
        let mut summary = Summary::default();
        for round in rounds {
            match round.status {
                RoundStatus::Completed => summary.rounds_completed += 1,
                RoundStatus::Failed { .. } => summary.rounds_failed += 1,
                RoundStatus::Cancelled => summary.rounds_cancelled += 1,
            }
            for call in &round.calls {
                match call.outcome {
                    TxOutcome::Analyzed { .. } => summary.calls_analyzed += 1,
                    TxOutcome::Reverted { .. } => summary.calls_reverted += 1,
                    TxOutcome::Inconclusive { .. } => summary.calls_inconclusive += 1,
                    TxOutcome::Failed { .. } => summary.calls_errored += 1,
                }
            }
            for finding in &round.findings {
                match finding.severity {
                    Severity::Critical => summary.critical += 1,
                    Severity::Warning => summary.warnings += 1,
                }
            }
        }
        summary.rounds_attempted = rounds.len() - summary.rounds_cancelled;
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub contract: String,
    pub seed: u64,
    /// In round order
    pub rounds: Vec<Round>,
    pub summary: Summary,
}

impl RunReport {
    pub fn new(contract: String, seed: u64, mut rounds: Vec<Round>) -> Self {
        rounds.sort_by_key(|r| r.index);
        let summary = Summary::of(&rounds);
        Self {
            contract,
            seed,
            rounds,
            summary,
        }
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.rounds.iter().flat_map(|r| r.findings.iter())
    }

    pub fn has_critical(&self) -> bool {
        self.findings().any(|f| f.severity == Severity::Critical)
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_critical() {
            EXIT_CRITICAL
        } else {
            EXIT_CLEAN
        }
    }

    /// Human readable report: one line per finding, then the run summary
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Contract {} (seed {})", self.contract, self.seed);
        for round in &self.rounds {
            if let RoundStatus::Failed { phase, reason } = &round.status {
                let _ = writeln!(out, "  round {} failed while {:?}: {}", round.index, phase, reason);
            }
        }
        if self.findings().next().is_none() {
            let _ = writeln!(out, "No findings");
        } else {
            // one line per (kind, member) with the rounds it showed up in
            let grouped = self
                .findings()
                .sorted_by(|a, b| {
                    b.severity
                        .cmp(&a.severity)
                        .then_with(|| a.kind.to_string().cmp(&b.kind.to_string()))
                        .then_with(|| a.member.cmp(&b.member))
                        .then_with(|| a.round.cmp(&b.round))
                })
                .group_by(|f| (f.severity, f.kind, f.member.clone()));
            for ((severity, kind, member), group) in &grouped {
                let group = group.collect_vec();
                let _ = writeln!(
                    out,
                    "[{}] {} in `{}` ({} occurrence(s), rounds {})",
                    severity,
                    kind,
                    member,
                    group.len(),
                    group.iter().map(|f| f.round).dedup().join(", ")
                );
                let _ = writeln!(out, "    {}", group[0].description);
            }
        }
        let s = &self.summary;
        let _ = writeln!(
            out,
            "Rounds: {} attempted, {} completed, {} failed, {} cancelled",
            s.rounds_attempted, s.rounds_completed, s.rounds_failed, s.rounds_cancelled
        );
        let _ = writeln!(
            out,
            "Calls: {} analyzed, {} reverted, {} inconclusive, {} errored",
            s.calls_analyzed, s.calls_reverted, s.calls_inconclusive, s.calls_errored
        );
        let _ = writeln!(out, "Findings: {} critical, {} warning(s)", s.critical, s.warnings);
        out
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
    }
}
