//! Per-thread execution context: the active handler list and the circular
//! trace buffer. Each `Machine` owns one, so independent machines on
//! different threads never share either.

use crate::condition::{handler_values, HandlerList};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TracePoint {
    Invalid,
    Eval { expr: Value, env: Value },
    Apply { proc: Value, args: Value },
}

/// Fixed-size ring of the most recent eval/apply steps.
#[derive(Debug)]
pub struct TraceBuffer {
    entries: Vec<TracePoint>,
    /// Index of the next slot to overwrite.
    next: usize,
    mask: usize,
}

impl TraceBuffer {
    /// `depth` is rounded up to a power of two. Zero disables tracing.
    pub fn new(depth: usize) -> Self {
        let size = if depth == 0 { 0 } else { depth.next_power_of_two() };
        TraceBuffer {
            entries: vec![TracePoint::Invalid; size],
            next: 0,
            mask: size.saturating_sub(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn record(&mut self, point: TracePoint) {
        if self.entries.is_empty() {
            return;
        }
        self.entries[self.next] = point;
        self.next = (self.next + 1) & self.mask;
    }

    /// Valid entries, oldest first.
    pub fn snapshot(&self) -> Vec<TracePoint> {
        let n = self.entries.len();
        (0..n)
            .map(|i| self.entries[(self.next + i) & self.mask])
            .filter(|p| *p != TracePoint::Invalid)
            .collect()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.entries {
            *slot = TracePoint::Invalid;
        }
        self.next = 0;
    }

    pub fn trace(&self, out: &mut Vec<Value>) {
        for point in &self.entries {
            match *point {
                TracePoint::Invalid => {}
                TracePoint::Eval { expr, env } => {
                    out.push(expr);
                    out.push(env);
                }
                TracePoint::Apply { proc, args } => {
                    out.push(proc);
                    out.push(args);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct ThreadContext {
    pub handlers: HandlerList,
    pub trace: TraceBuffer,
    /// Procedure given each unhandled error before the policy applies, or
    /// nil.
    pub debugger: Value,
    /// Give the debugger every signalled condition, handled or not.
    pub debug_all_conditions: bool,
}

impl ThreadContext {
    pub fn new(trace_depth: usize) -> Self {
        ThreadContext {
            handlers: None,
            trace: TraceBuffer::new(trace_depth),
            debugger: Value::Nil,
            debug_all_conditions: false,
        }
    }

    /// Values the collector must keep alive.
    pub fn roots(&self) -> Vec<Value> {
        let mut out = handler_values(&self.handlers);
        self.trace.trace(&mut out);
        out.push(self.debugger);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(n: i64) -> TracePoint {
        TracePoint::Apply {
            proc: Value::Int(n),
            args: Value::Nil,
        }
    }

    #[test]
    fn depth_rounds_up_to_power_of_two() {
        assert_eq!(TraceBuffer::new(20).capacity(), 32);
        assert_eq!(TraceBuffer::new(32).capacity(), 32);
        assert_eq!(TraceBuffer::new(0).capacity(), 0);
    }

    #[test]
    fn keeps_most_recent_entries_in_order() {
        let mut buf = TraceBuffer::new(4);
        for i in 0..6 {
            buf.record(apply(i));
        }
        assert_eq!(buf.snapshot(), vec![apply(2), apply(3), apply(4), apply(5)]);
    }

    #[test]
    fn partially_filled_buffer_skips_invalid_slots() {
        let mut buf = TraceBuffer::new(8);
        buf.record(apply(1));
        buf.record(apply(2));
        assert_eq!(buf.snapshot(), vec![apply(1), apply(2)]);
        buf.clear();
        assert!(buf.snapshot().is_empty());
    }

    #[test]
    fn disabled_buffer_records_nothing() {
        let mut buf = TraceBuffer::new(0);
        buf.record(apply(1));
        assert!(buf.snapshot().is_empty());
    }
}
