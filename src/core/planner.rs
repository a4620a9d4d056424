use crate::core::modbus::{Address, Quantity, MAX_READ_QUANTITY};
use crate::core::RegisterDescriptor;

/// Limits applied when coalescing registers into shared read requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Largest run of unused words allowed between two coalesced registers.
    pub max_gap: u16,
    /// Largest number of words a single request may span.
    pub max_span: Quantity,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            max_gap: 0,
            max_span: MAX_READ_QUANTITY,
        }
    }
}

/// One read request covering one or more registers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSpan<'a> {
    pub address: Address,
    pub quantity: Quantity,
    /// Registers served by this span, with their position in the planner input.
    pub registers: Vec<(usize, &'a RegisterDescriptor)>,
}

impl ReadSpan<'_> {
    /// Offset of `register` from the start of the span, in words.
    pub fn offset_of(&self, register: &RegisterDescriptor) -> usize {
        (register.address - self.address) as usize
    }
}

/// Groups registers into as few read requests as the limits allow.
///
/// Registers are sorted by address and merged while the gap to the next register stays
/// within `max_gap` and the merged span stays within `max_span`. A register wider than
/// `max_span` gets a span of its own. Performs no I/O.
pub struct ReadPlanner;

impl ReadPlanner {
    pub fn plan<'a>(config: PlannerConfig, registers: &[&'a RegisterDescriptor]) -> Vec<ReadSpan<'a>> {
        let mut ordered: Vec<(usize, &'a RegisterDescriptor)> =
            registers.iter().copied().enumerate().collect();
        ordered.sort_by_key(|(_, r)| r.address);

        let max_span = config.max_span.clamp(1, MAX_READ_QUANTITY) as u32;
        let mut spans: Vec<ReadSpan<'a>> = Vec::with_capacity(ordered.len());

        let mut iter = ordered.into_iter();
        let Some(first) = iter.next() else {
            return spans;
        };

        let mut start = first.1.address as u32;
        let mut end = first.1.end();
        let mut members = vec![first];

        for (index, register) in iter {
            let gap = (register.address as u32).saturating_sub(end);
            let merged_end = end.max(register.end());

            if gap <= config.max_gap as u32 && merged_end - start <= max_span {
                end = merged_end;
                members.push((index, register));
                continue;
            }

            spans.push(ReadSpan {
                address: start as Address,
                quantity: (end - start) as Quantity,
                registers: std::mem::take(&mut members),
            });

            start = register.address as u32;
            end = register.end();
            members.push((index, register));
        }

        spans.push(ReadSpan {
            address: start as Address,
            quantity: (end - start) as Quantity,
            registers: members,
        });

        spans
    }
}
