/// Execution trace records and the facts derived from them
use serde::{Deserialize, Serialize};

use super::types::{convert_u256_to_h160, EVMAddress, EVMU256};

/// Only the topmost stack entries are kept per step; no tracked opcode reads deeper.
pub const STACK_WINDOW: usize = 7;

/// Highest precompile address (blake2f)
const MAX_PRECOMPILE: u64 = 0x0a;

/// One executed instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub pc: u64,
    pub op: String,
    pub depth: usize,
    /// Top of the operand stack, top-of-stack last
    pub stack: Vec<EVMU256>,
}

impl TraceStep {
    pub fn new(pc: u64, op: &str, depth: usize, stack: Vec<EVMU256>) -> Self {
        Self {
            pc,
            op: op.to_string(),
            depth,
            stack,
        }
    }

    /// `n`-th entry from the top of the stack
    pub fn peek(&self, n: usize) -> Option<EVMU256> {
        self.stack.len().checked_sub(n + 1).map(|idx| self.stack[idx])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameExit {
    Return,
    Stop,
    Revert,
    SelfDestruct,
    Invalid,
}

/// The opcodes the detectors care about. Everything else is [`OpcodeClass::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeClass {
    StorageWrite,
    StorageRead,
    ExternalCall(CallKind),
    OriginRead,
    CallReturn(FrameExit),
    Other,
}

impl OpcodeClass {
    pub fn of(op: &str) -> Self {
        match op {
            "SSTORE" => OpcodeClass::StorageWrite,
            "SLOAD" => OpcodeClass::StorageRead,
            "CALL" => OpcodeClass::ExternalCall(CallKind::Call),
            "CALLCODE" => OpcodeClass::ExternalCall(CallKind::CallCode),
            "DELEGATECALL" => OpcodeClass::ExternalCall(CallKind::DelegateCall),
            "STATICCALL" => OpcodeClass::ExternalCall(CallKind::StaticCall),
            "CREATE" => OpcodeClass::ExternalCall(CallKind::Create),
            "CREATE2" => OpcodeClass::ExternalCall(CallKind::Create2),
            "ORIGIN" => OpcodeClass::OriginRead,
            "RETURN" => OpcodeClass::CallReturn(FrameExit::Return),
            "STOP" => OpcodeClass::CallReturn(FrameExit::Stop),
            "REVERT" => OpcodeClass::CallReturn(FrameExit::Revert),
            "SELFDESTRUCT" | "SUICIDE" => OpcodeClass::CallReturn(FrameExit::SelfDestruct),
            "INVALID" => OpcodeClass::CallReturn(FrameExit::Invalid),
            _ => OpcodeClass::Other,
        }
    }
}

pub type FrameId = usize;

/// Execution context between entering and leaving a call. The root frame is id 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallFrame {
    pub id: FrameId,
    pub parent: Option<FrameId>,
    pub depth: usize,
    /// Sequence index of the first step executed inside this frame
    pub entered_at: usize,
    /// Index into [`TraceFacts::calls`] of the call that opened this frame
    pub opened_by: Option<usize>,
    pub callee: Option<EVMAddress>,
    pub kind: Option<CallKind>,
    pub exit: Option<FrameExit>,
    /// Indices into [`TraceFacts::events`], in execution order
    pub events: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageWrite {
    pub frame: FrameId,
    pub seq: usize,
    pub slot: Option<EVMU256>,
    pub value: Option<EVMU256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageRead {
    pub frame: FrameId,
    pub seq: usize,
    pub slot: Option<EVMU256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalCall {
    pub frame: FrameId,
    pub seq: usize,
    pub kind: CallKind,
    /// `None` for contract creation
    pub target: Option<EVMAddress>,
    pub value: EVMU256,
    pub is_precompile: bool,
    /// The frame the call opened, if the callee executed any code
    pub child: Option<FrameId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginRead {
    pub frame: FrameId,
    pub seq: usize,
}

/// Events in trace order; each variant indexes into its typed list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Event {
    Write(usize),
    Read(usize),
    Call(usize),
    Origin(usize),
}

/// Derived, queryable view of one transaction's trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceFacts {
    pub frames: Vec<CallFrame>,
    pub writes: Vec<StorageWrite>,
    pub reads: Vec<StorageRead>,
    pub calls: Vec<ExternalCall>,
    pub origins: Vec<OriginRead>,
    pub events: Vec<Event>,
    pub steps: usize,
}

impl TraceFacts {
    pub fn root(&self) -> &CallFrame {
        &self.frames[0]
    }

    pub fn frame(&self, id: FrameId) -> &CallFrame {
        &self.frames[id]
    }

    pub fn writes_in(&self, frame: FrameId) -> impl Iterator<Item = &StorageWrite> {
        self.writes.iter().filter(move |w| w.frame == frame)
    }

    pub fn reads_in(&self, frame: FrameId) -> impl Iterator<Item = &StorageRead> {
        self.reads.iter().filter(move |r| r.frame == frame)
    }

    pub fn calls_in(&self, frame: FrameId) -> impl Iterator<Item = &ExternalCall> {
        self.calls.iter().filter(move |c| c.frame == frame)
    }

    /// Depth of the deepest frame relative to the root
    pub fn max_nesting(&self) -> usize {
        let root = self.root().depth;
        self.frames.iter().map(|f| f.depth - root).max().unwrap_or(0)
    }
}

fn new_frame(
    frames: &mut Vec<CallFrame>,
    parent: Option<FrameId>,
    depth: usize,
    entered_at: usize,
) -> FrameId {
    let id = frames.len();
    frames.push(CallFrame {
        id,
        parent,
        depth,
        entered_at,
        opened_by: None,
        callee: None,
        kind: None,
        exit: None,
        events: Vec::new(),
    });
    id
}

fn is_precompile(target: &EVMAddress) -> bool {
    let bytes = target.as_bytes();
    bytes[..19].iter().all(|b| *b == 0) && bytes[19] != 0 && (bytes[19] as u64) <= MAX_PRECOMPILE
}

/// Rebuild the call tree and extract events from a step sequence.
///
/// The root frame takes the depth of the first step, so traces counting depth from
/// either 0 or 1 are handled alike. Malformed steps never abort interpretation: a
/// missing operand is recorded as `None`.
pub fn interpret(steps: &[TraceStep]) -> TraceFacts {
    let root_depth = steps.first().map(|s| s.depth).unwrap_or(0);
    let mut facts = TraceFacts {
        frames: Vec::new(),
        writes: Vec::new(),
        reads: Vec::new(),
        calls: Vec::new(),
        origins: Vec::new(),
        events: Vec::new(),
        steps: steps.len(),
    };
    let mut current = new_frame(&mut facts.frames, None, root_depth, 0);

    for (seq, step) in steps.iter().enumerate() {
        let depth = step.depth.max(root_depth);
        let active_depth = facts.frames[current].depth;

        if depth > active_depth {
            let child = new_frame(&mut facts.frames, Some(current), depth, seq);
            // link the call issued by the parent on the step just before
            if let Some(call_idx) = facts
                .calls
                .iter()
                .rposition(|c| c.frame == current && c.child.is_none() && c.seq + 1 == seq)
            {
                let call = &mut facts.calls[call_idx];
                call.child = Some(child);
                let frame = &mut facts.frames[child];
                frame.opened_by = Some(call_idx);
                frame.callee = call.target;
                frame.kind = Some(call.kind);
            }
            current = child;
        } else if depth < active_depth {
            while facts.frames[current].depth > depth {
                match facts.frames[current].parent {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }

        let event = match OpcodeClass::of(&step.op) {
            OpcodeClass::StorageWrite => {
                facts.writes.push(StorageWrite {
                    frame: current,
                    seq,
                    slot: step.peek(0),
                    value: step.peek(1),
                });
                Some(Event::Write(facts.writes.len() - 1))
            }
            OpcodeClass::StorageRead => {
                facts.reads.push(StorageRead {
                    frame: current,
                    seq,
                    slot: step.peek(0),
                });
                Some(Event::Read(facts.reads.len() - 1))
            }
            OpcodeClass::ExternalCall(kind) => {
                let (target, value) = match kind {
                    CallKind::Call | CallKind::CallCode => (step.peek(1).map(convert_u256_to_h160), step.peek(2)),
                    CallKind::DelegateCall | CallKind::StaticCall => {
                        (step.peek(1).map(convert_u256_to_h160), Some(EVMU256::zero()))
                    }
                    CallKind::Create | CallKind::Create2 => (None, step.peek(0)),
                };
                facts.calls.push(ExternalCall {
                    frame: current,
                    seq,
                    kind,
                    is_precompile: target.as_ref().map(is_precompile).unwrap_or(false),
                    target,
                    value: value.unwrap_or_default(),
                    child: None,
                });
                Some(Event::Call(facts.calls.len() - 1))
            }
            OpcodeClass::OriginRead => {
                facts.origins.push(OriginRead { frame: current, seq });
                Some(Event::Origin(facts.origins.len() - 1))
            }
            OpcodeClass::CallReturn(exit) => {
                facts.frames[current].exit = Some(exit);
                None
            }
            OpcodeClass::Other => None,
        };
        if let Some(event) = event {
            facts.events.push(event);
            let idx = facts.events.len() - 1;
            facts.frames[current].events.push(idx);
        }
    }
    facts
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn word(v: u64) -> EVMU256 {
        EVMU256::from(v)
    }

    /// `CALL` step with the stack laid out as gas, target, value (top first)
    pub fn call_step(depth: usize, target: u64, value: u64) -> TraceStep {
        TraceStep::new(
            0,
            "CALL",
            depth,
            vec![word(0), word(0), word(0), word(0), word(value), word(target), word(100_000)],
        )
    }

    pub fn sstore_step(depth: usize, slot: u64, value: u64) -> TraceStep {
        TraceStep::new(0, "SSTORE", depth, vec![word(value), word(slot)])
    }

    pub fn op_step(op: &str, depth: usize) -> TraceStep {
        TraceStep::new(0, op, depth, vec![])
    }

    #[test]
    fn test_empty_trace() {
        let facts = interpret(&[]);
        assert_eq!(facts.frames.len(), 1);
        assert!(facts.events.is_empty());
        assert_eq!(facts.steps, 0);
    }

    #[test]
    fn test_call_tree_reconstruction() {
        // depth 1 based, as geth reports it
        let steps = vec![
            op_step("PUSH1", 1),
            call_step(1, 0xbeef, 5),
            op_step("PUSH1", 2),
            sstore_step(2, 9, 1),
            op_step("STOP", 2),
            op_step("POP", 1),
            sstore_step(1, 0, 0),
            op_step("STOP", 1),
        ];
        let facts = interpret(&steps);
        assert_eq!(facts.frames.len(), 2);
        let child = facts.frame(1);
        assert_eq!(child.parent, Some(0));
        assert_eq!(child.entered_at, 2);
        assert_eq!(child.callee, Some(EVMAddress::from_low_u64_be(0xbeef)));
        assert_eq!(child.kind, Some(CallKind::Call));
        assert_eq!(child.exit, Some(FrameExit::Stop));
        assert_eq!(facts.calls[0].child, Some(1));
        assert_eq!(facts.calls[0].value, word(5));

        assert_eq!(facts.writes[0].frame, 1);
        assert_eq!(facts.writes[0].slot, Some(word(9)));
        assert_eq!(facts.writes[1].frame, 0);
        assert_eq!(facts.writes[1].seq, 6);
        assert_eq!(facts.root().events, vec![0, 2]);
        assert_eq!(facts.max_nesting(), 1);
    }

    #[test]
    fn test_sibling_frames() {
        let steps = vec![
            call_step(0, 0xa, 0),
            op_step("STOP", 1),
            call_step(0, 0xb, 0),
            op_step("STOP", 1),
            op_step("STOP", 0),
        ];
        let facts = interpret(&steps);
        assert_eq!(facts.frames.len(), 3);
        assert_eq!(facts.frame(1).parent, Some(0));
        assert_eq!(facts.frame(2).parent, Some(0));
        assert_eq!(facts.calls[1].child, Some(2));
    }

    #[test]
    fn test_multi_level_return() {
        let steps = vec![
            call_step(0, 0xa, 0),
            call_step(1, 0xb, 0),
            op_step("ORIGIN", 2),
            // returns straight to the root, e.g. a trace with elided steps
            op_step("POP", 0),
        ];
        let facts = interpret(&steps);
        assert_eq!(facts.frames.len(), 3);
        assert_eq!(facts.frame(2).parent, Some(1));
        assert_eq!(facts.origins[0].frame, 2);
        assert_eq!(facts.root().events, vec![0]);
    }

    #[test]
    fn test_precompile_and_create() {
        let steps = vec![
            TraceStep::new(
                0,
                "STATICCALL",
                0,
                vec![word(0), word(0), word(0), word(0), word(1), word(3000)],
            ),
            TraceStep::new(0, "CREATE", 0, vec![word(0x20), word(0), word(7)]),
        ];
        let facts = interpret(&steps);
        assert!(facts.calls[0].is_precompile);
        assert_eq!(facts.calls[0].kind, CallKind::StaticCall);
        assert_eq!(facts.calls[1].target, None);
        assert_eq!(facts.calls[1].value, word(7));
        assert!(!facts.calls[1].is_precompile);
    }

    #[test]
    fn test_malformed_steps_tolerated() {
        let steps = vec![op_step("SSTORE", 0), op_step("CALL", 0), op_step("SLOAD", 0)];
        let facts = interpret(&steps);
        assert_eq!(facts.writes[0].slot, None);
        assert_eq!(facts.calls[0].target, None);
        assert_eq!(facts.calls[0].value, EVMU256::zero());
        assert_eq!(facts.reads[0].slot, None);
    }

    #[test]
    fn test_peek() {
        let step = TraceStep::new(0, "SSTORE", 0, vec![word(2), word(1)]);
        assert_eq!(step.peek(0), Some(word(1)));
        assert_eq!(step.peek(1), Some(word(2)));
        assert_eq!(step.peek(2), None);
    }
}
