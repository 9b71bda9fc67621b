use tracing::debug;

use crate::evm::{
    oracle::{DetectionCtx, Detector, Finding, Severity, VulnerabilityKind},
    trace::{CallKind, ExternalCall, TraceFacts},
    types::checksum,
};

/// Checks-effects-interactions violation: a frame writes storage after it handed
/// control to another contract.
#[derive(Debug, Clone, Default)]
pub struct ReentrancyDetector;

impl ReentrancyDetector {
    pub fn new() -> Self {
        Self
    }
}

fn describe_target(call: &ExternalCall) -> String {
    match call.target {
        Some(target) => checksum(&target),
        None => "a newly created contract".to_string(),
    }
}

/// Calls that can run foreign code able to change state. Precompiles run no
/// contract code and nothing below a STATICCALL may write.
fn is_interaction(call: &ExternalCall) -> bool {
    !call.is_precompile && call.kind != CallKind::StaticCall
}

// Reentrancy: (Read), Call, Write in the same frame
impl Detector for ReentrancyDetector {
    fn name(&self) -> &'static str {
        "reentrancy"
    }

    fn detect(&self, facts: &TraceFacts, ctx: &DetectionCtx<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for call in facts.calls.iter().filter(|c| is_interaction(c)) {
            // writes in frames nested under the call belong to those frames
            let Some(write) = facts.writes_in(call.frame).find(|w| w.seq > call.seq) else {
                continue;
            };
            let slot = write
                .slot
                .map(|s| format!("{:#x}", s))
                .unwrap_or_else(|| "<unknown>".to_string());
            let read_before = write.slot.is_some() &&
                facts
                    .reads_in(call.frame)
                    .any(|r| r.seq < call.seq && r.slot == write.slot);
            debug!(
                "reentrancy: frame {} calls at step {} and writes slot {} at step {}",
                call.frame, call.seq, slot, write.seq
            );
            findings.push(ctx.finding(
                VulnerabilityKind::Reentrancy,
                Severity::Critical,
                call.frame,
                call.seq,
                format!(
                    "frame {} writes storage slot {} at step {} after a {:?} to {} at step {}{}",
                    call.frame,
                    slot,
                    write.seq,
                    call.kind,
                    describe_target(call),
                    call.seq,
                    if read_before {
                        " (slot was read before the call)"
                    } else {
                        ""
                    }
                ),
            ));
        }
        findings
    }
}
