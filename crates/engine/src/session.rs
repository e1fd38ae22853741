// Retrace - EVM Time-Travel Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Time-travel navigation over a completed [`Trace`].
//!
//! The session flattens the frame tree into a globally indexed sequence
//! of cursor positions: every real step of every frame, in execution
//! order, plus one virtual frame-end marker per frame placed after its
//! last step and nested children. The marker gives the frame's result
//! (return data, exit reason) a cursor position of its own.
//!
//! All navigation is a pure function of the immutable trace and the
//! integer cursor; nothing here performs I/O or suspends.

use std::sync::Arc;

use retrace_common::types::{
    Breakpoint, BreakpointCondition, BreakpointId, Frame, Step, Trace,
};

/// One cursor position in the flattened trace.
#[derive(Debug, Clone)]
pub struct FlatStep<'a> {
    /// Frame this position belongs to.
    pub frame: &'a Frame,
    /// Index into `frame.steps`, or `None` for the frame-end marker.
    pub step_index: Option<usize>,
    /// Frames from the root down to (and including) `frame`.
    pub call_stack: Arc<Vec<&'a Frame>>,
}

impl<'a> FlatStep<'a> {
    /// Whether this position is the virtual frame-end marker.
    pub fn is_frame_end(&self) -> bool {
        self.step_index.is_none()
    }

    /// The step at this position, `None` at a frame-end marker.
    pub fn step(&self) -> Option<&'a Step> {
        self.step_index.map(|i| &self.frame.steps[i])
    }
}

/// A navigable debugging session over one trace.
#[derive(Debug)]
pub struct DebugSession<'a> {
    trace: &'a Trace,
    flat_steps: Vec<FlatStep<'a>>,
    cursor: usize,
    breakpoints: Vec<Breakpoint>,
    next_breakpoint_id: usize,
}

impl<'a> DebugSession<'a> {
    /// Flatten the trace and place the cursor at the first position.
    pub fn new(trace: &'a Trace) -> Self {
        let mut flat_steps = Vec::with_capacity(trace.root.total_steps() + trace.frame_count());
        flatten(&trace.root, &[], &mut flat_steps);
        Self { trace, flat_steps, cursor: 0, breakpoints: Vec::new(), next_breakpoint_id: 0 }
    }

    /// The trace this session navigates.
    pub fn trace(&self) -> &'a Trace {
        self.trace
    }

    /// The whole flattened sequence.
    pub fn flat_steps(&self) -> &[FlatStep<'a>] {
        &self.flat_steps
    }

    /// Current cursor position.
    pub fn global_step_index(&self) -> usize {
        self.cursor
    }

    /// The flat step under the cursor.
    pub fn current(&self) -> &FlatStep<'a> {
        &self.flat_steps[self.cursor]
    }

    /// Frame the cursor is in.
    pub fn current_frame(&self) -> &'a Frame {
        self.current().frame
    }

    /// Index of the cursor's step within its frame, `None` at a
    /// frame-end marker.
    pub fn current_step_index(&self) -> Option<usize> {
        self.current().step_index
    }

    /// Step under the cursor, `None` at a frame-end marker.
    pub fn current_step(&self) -> Option<&'a Step> {
        self.current().step()
    }

    /// Whether the cursor sits on a frame-end marker.
    pub fn is_at_frame_end(&self) -> bool {
        self.current().is_frame_end()
    }

    /// Call stack at the cursor, root first.
    pub fn call_stack(&self) -> &[&'a Frame] {
        &self.current().call_stack
    }

    fn last_index(&self) -> usize {
        self.flat_steps.len() - 1
    }

    /// Advance one position, saturating at the end.
    pub fn step_forward(&mut self) {
        self.cursor = (self.cursor + 1).min(self.last_index());
    }

    /// Retreat one position, saturating at the start.
    pub fn step_backward(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// Move the cursor to `index`, clamped to the valid range.
    pub fn jump_to(&mut self, index: usize) {
        self.cursor = index.min(self.last_index());
    }

    /// Move the cursor to the first position.
    pub fn jump_to_start(&mut self) {
        self.cursor = 0;
    }

    /// Move the cursor to the last position.
    pub fn jump_to_end(&mut self) {
        self.cursor = self.last_index();
    }

    /// Whether the cursor sits on an opcode that opens a child frame.
    pub fn can_step_over(&self) -> bool {
        self.current_step().is_some_and(|step| step.spawns_frame())
    }

    /// Skip past the sub-trace spawned by the current opcode: advance
    /// until the cursor is back in the same frame at a different
    /// position (or its frame-end marker). Plain `step_forward` when
    /// the current opcode spawns nothing.
    pub fn step_over(&mut self) {
        if !self.can_step_over() {
            self.step_forward();
            return;
        }
        let origin = self.current_frame();
        let origin_index = self.current_step_index();
        let last = self.last_index();
        while self.cursor < last {
            self.cursor += 1;
            let flat = &self.flat_steps[self.cursor];
            if std::ptr::eq(flat.frame, origin) && flat.step_index != origin_index {
                break;
            }
        }
    }

    /// Whether the cursor is inside a nested frame.
    pub fn can_step_out(&self) -> bool {
        self.call_stack().len() > 1
    }

    /// Advance until the current frame has been exited. Jumps to the
    /// end when already at the root.
    pub fn step_out(&mut self) {
        if !self.can_step_out() {
            self.jump_to_end();
            return;
        }
        let depth = self.call_stack().len();
        let last = self.last_index();
        while self.cursor < last {
            self.cursor += 1;
            if self.flat_steps[self.cursor].call_stack.len() < depth {
                break;
            }
        }
    }

    /// Register a breakpoint and return its handle.
    pub fn add_breakpoint(&mut self, condition: BreakpointCondition) -> BreakpointId {
        let id = BreakpointId(self.next_breakpoint_id);
        self.next_breakpoint_id += 1;
        self.breakpoints.push(Breakpoint { id, condition });
        id
    }

    /// Remove a breakpoint. Returns whether it existed.
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|bp| bp.id != id);
        self.breakpoints.len() != before
    }

    /// All registered breakpoints.
    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Scan forward from the cursor to the next matching position.
    /// Lands on the last position and returns `false` when nothing
    /// matches.
    pub fn continue_forward(&mut self) -> bool {
        let last = self.last_index();
        let mut index = self.cursor;
        while index < last {
            index += 1;
            if self.matches_any_breakpoint(index) {
                self.cursor = index;
                return true;
            }
        }
        self.cursor = last;
        false
    }

    /// Scan backward from the cursor to the previous matching position.
    /// Lands on the first position and returns `false` when nothing
    /// matches.
    pub fn continue_backward(&mut self) -> bool {
        let mut index = self.cursor;
        while index > 0 {
            index -= 1;
            if self.matches_any_breakpoint(index) {
                self.cursor = index;
                return true;
            }
        }
        self.cursor = 0;
        false
    }

    fn matches_any_breakpoint(&self, index: usize) -> bool {
        // Frame-end markers carry no step and never match.
        let Some(step) = self.flat_steps[index].step() else {
            return false;
        };
        self.breakpoints.iter().any(|bp| condition_matches(&bp.condition, step, index))
    }
}

fn condition_matches(condition: &BreakpointCondition, step: &Step, index: usize) -> bool {
    if condition.is_empty() {
        return false;
    }
    condition.pc.map_or(true, |pc| step.pc == pc)
        && condition.opcode.map_or(true, |opcode| step.opcode == opcode)
        && condition
            .storage_slot
            .map_or(true, |slot| step.storage_changes.iter().any(|change| change.slot == slot))
        && condition.global_step_index.map_or(true, |i| i == index)
}

/// Depth-first flattening: every step of `frame` in order, recursing
/// into each child right after the step that spawned it, then one
/// trailing frame-end marker.
fn flatten<'a>(frame: &'a Frame, parent_stack: &[&'a Frame], out: &mut Vec<FlatStep<'a>>) {
    let mut stack = parent_stack.to_vec();
    stack.push(frame);
    let call_stack = Arc::new(stack);

    let mut child_idx = 0;
    for i in 0..frame.steps.len() {
        out.push(FlatStep { frame, step_index: Some(i), call_stack: call_stack.clone() });
        while child_idx < frame.children.len() && frame.children[child_idx].step_index == i {
            flatten(&frame.children[child_idx].frame, &call_stack, out);
            child_idx += 1;
        }
    }
    // Children whose spawn index was never reached (a frame that halted
    // mid-call) still appear in the flattening.
    while child_idx < frame.children.len() {
        flatten(&frame.children[child_idx].frame, &call_stack, out);
        child_idx += 1;
    }

    out.push(FlatStep { frame, step_index: None, call_stack });
}
