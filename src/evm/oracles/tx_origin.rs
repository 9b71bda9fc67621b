use crate::evm::{
    oracle::{DetectionCtx, Detector, Finding, Severity, VulnerabilityKind},
    trace::TraceFacts,
};

/// Flags any read of `tx.origin`.
///
/// This over-approximates origin-based authorization: it does not check whether the
/// value reaches a comparison that guards anything.
#[derive(Debug, Clone, Default)]
pub struct TxOriginDetector;

impl TxOriginDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for TxOriginDetector {
    fn name(&self) -> &'static str {
        "tx-origin"
    }

    fn detect(&self, facts: &TraceFacts, ctx: &DetectionCtx<'_>) -> Vec<Finding> {
        let Some(first) = facts.origins.first() else {
            return vec![];
        };
        vec![ctx.finding(
            VulnerabilityKind::TxOriginAuth,
            Severity::Warning,
            first.frame,
            first.seq,
            format!(
                "ORIGIN read {} time(s), first in frame {} at step {}; use msg.sender for authorization",
                facts.origins.len(),
                first.frame,
                first.seq
            ),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::trace::{
        interpret,
        tests::{call_step, op_step, sstore_step},
    };

    fn ctx() -> DetectionCtx<'static> {
        DetectionCtx::new(2, "onlyOwner")
    }

    #[test]
    fn test_single_origin_read() {
        let steps = vec![
            op_step("CALLER", 0),
            sstore_step(0, 0, 1),
            op_step("ORIGIN", 0),
            op_step("EQ", 0),
            call_step(0, 0xbeef, 0),
            op_step("STOP", 1),
            op_step("STOP", 0),
        ];
        let findings = TxOriginDetector::new().detect(&interpret(&steps), &ctx());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, VulnerabilityKind::TxOriginAuth);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].seq, 2);
        assert_eq!(findings[0].round, 2);
    }

    #[test]
    fn test_many_reads_one_finding() {
        let steps = vec![op_step("ORIGIN", 0), op_step("ORIGIN", 0), op_step("ORIGIN", 0)];
        let findings = TxOriginDetector::new().detect(&interpret(&steps), &ctx());
        assert_eq!(findings.len(), 1);
        assert!(findings[0].description.contains("3 time(s)"));
    }

    #[test]
    fn test_origin_in_nested_frame() {
        let steps = vec![call_step(0, 0xbeef, 0), op_step("ORIGIN", 1), op_step("STOP", 1)];
        let findings = TxOriginDetector::new().detect(&interpret(&steps), &ctx());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].frame, 1);
    }

    #[test]
    fn test_empty_trace() {
        let findings = TxOriginDetector::new().detect(&interpret(&[]), &ctx());
        assert!(findings.is_empty());
    }

    #[test]
    fn test_idempotent() {
        let facts = interpret(&[op_step("ORIGIN", 0)]);
        let detector = TxOriginDetector::new();
        assert_eq!(detector.detect(&facts, &ctx()), detector.detect(&facts, &ctx()));
    }
}
