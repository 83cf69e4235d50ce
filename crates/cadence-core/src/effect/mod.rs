//! Processor system - trait, chains, and parameter mapping
//!
//! Every effect that can sit on a channel, a group, or the master bus
//! implements [`Processor`]. Processors come in two kinds:
//!
//! - **Insert**: `process()` transforms the buffer in place
//! - **Bus**: `apply()` reads a dry copy and accumulates its output into
//!   the buffer (sends such as delay or reverb)
//!
//! Processors also report whether they are *cacheable*: a cacheable
//! processor's output for a fixed input is deterministic, so a channel
//! that replays a cached buffer can skip it entirely.

pub mod chain;
pub mod native;

pub use chain::ProcessingChain;

use std::sync::atomic::{AtomicU32, Ordering};

use crate::buffer::AudioBuffer;
use crate::types::{ChainId, ProcessorId};

static NEXT_PROCESSOR_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-wide unique processor id
pub fn next_processor_id() -> ProcessorId {
    ProcessorId(NEXT_PROCESSOR_ID.fetch_add(1, Ordering::Relaxed))
}

/// How a processor writes its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    /// Replaces the buffer content in place
    Insert,
    /// Accumulates into the buffer from a dry copy
    Bus,
}

/// Information about a processor parameter
#[derive(Debug, Clone)]
pub struct ParamInfo {
    /// Parameter name for display
    pub name: String,
    /// Default value (0.0-1.0)
    pub default: f32,
    /// Value at normalized 0.0
    pub min: f32,
    /// Value at normalized 1.0
    pub max: f32,
    /// Unit label (e.g., "ms", "dB", "%")
    pub unit: String,
}

impl ParamInfo {
    pub fn new(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default,
            min: 0.0,
            max: 1.0,
            unit: String::new(),
        }
    }

    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// Current parameter value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamValue {
    /// Normalized value (0.0-1.0)
    pub normalized: f32,
    /// Value after range mapping
    pub actual: f32,
}

impl ParamValue {
    /// Map a normalized value through the parameter's range
    pub fn from_normalized(normalized: f32, info: &ParamInfo) -> Self {
        let normalized = normalized.clamp(0.0, 1.0);
        let actual = info.min + normalized * (info.max - info.min);
        Self { normalized, actual }
    }
}

/// Static description of a processor
#[derive(Debug, Clone)]
pub struct ProcessorInfo {
    pub name: String,
    /// Category (e.g., "Dynamics", "Delay", "Utility")
    pub category: String,
    pub params: Vec<ParamInfo>,
    pub kind: ProcessorKind,
}

impl ProcessorInfo {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            params: Vec::new(),
            kind: ProcessorKind::Insert,
        }
    }

    pub fn with_param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_kind(mut self, kind: ProcessorKind) -> Self {
        self.kind = kind;
        self
    }
}

/// The contract every channel, group and master effect satisfies
///
/// Processors are owned by whoever holds the box: a [`ProcessingChain`]
/// while attached, the caller once removed. The chain back-reference
/// (`chain()`) is informational and set by the chain itself.
pub trait Processor: Send {
    /// Process the buffer in place
    ///
    /// `is_mono_source` tells the processor only the first channel carries
    /// distinct content, so it may process channel 0 and copy.
    fn process(&mut self, buffer: &mut AudioBuffer, is_mono_source: bool);

    /// Accumulate output computed from `source` into `output`
    ///
    /// Bus processors override this. The default treats the processor as
    /// an insert on `output`.
    fn apply(&mut self, source: &AudioBuffer, output: &mut AudioBuffer, is_mono_source: bool) {
        let _ = source;
        self.process(output, is_mono_source);
    }

    /// Whether the output for a fixed input is deterministic and may be
    /// captured once and replayed
    fn is_cacheable(&self) -> bool;

    fn kind(&self) -> ProcessorKind {
        self.info().kind
    }

    fn info(&self) -> &ProcessorInfo;

    fn id(&self) -> ProcessorId;

    /// Chain currently holding this processor
    fn chain(&self) -> Option<ChainId>;

    fn set_chain(&mut self, chain: Option<ChainId>);

    fn get_params(&self) -> &[ParamValue];

    /// Set a parameter by index (normalized value 0.0-1.0)
    fn set_param(&mut self, index: usize, value: f32);

    fn set_bypass(&mut self, bypass: bool);

    fn is_bypassed(&self) -> bool;

    /// Clear internal state (delay lines, envelopes)
    fn reset(&mut self);

    /// Tempo changed; tempo-synced processors update their timing
    fn set_tempo(&mut self, _tempo: f64, _sample_rate: u32) {}
}

/// Shared bookkeeping for processor implementations
#[derive(Debug, Clone)]
pub struct ProcessorBase {
    id: ProcessorId,
    info: ProcessorInfo,
    params: Vec<ParamValue>,
    chain: Option<ChainId>,
    bypassed: bool,
}

impl ProcessorBase {
    pub fn new(info: ProcessorInfo) -> Self {
        let params = info
            .params
            .iter()
            .map(|p| ParamValue::from_normalized(p.default, p))
            .collect();
        Self {
            id: next_processor_id(),
            info,
            params,
            chain: None,
            bypassed: false,
        }
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn info(&self) -> &ProcessorInfo {
        &self.info
    }

    pub fn chain(&self) -> Option<ChainId> {
        self.chain
    }

    pub fn set_chain(&mut self, chain: Option<ChainId>) {
        self.chain = chain;
    }

    pub fn get_params(&self) -> &[ParamValue] {
        &self.params
    }

    pub fn set_param(&mut self, index: usize, value: f32) {
        if let (Some(param), Some(info)) = (self.params.get_mut(index), self.info.params.get(index)) {
            *param = ParamValue::from_normalized(value, info);
        }
    }

    /// A parameter's mapped value
    pub fn param_actual(&self, index: usize) -> f32 {
        self.params.get(index).map(|p| p.actual).unwrap_or(0.0)
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypassed = bypass;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }
}

/// Run a single processor against `buffer`, dispatching on its kind
///
/// Bus processors need the dry signal, which is copied into `scratch`
/// first. `scratch` must already have the buffer's channel layout.
pub fn run_processor(
    processor: &mut dyn Processor,
    buffer: &mut AudioBuffer,
    scratch: &mut AudioBuffer,
    is_mono_source: bool,
) {
    match processor.kind() {
        ProcessorKind::Insert => processor.process(buffer, is_mono_source),
        ProcessorKind::Bus => {
            scratch.resize(buffer.size());
            scratch.copy_from(buffer);
            processor.apply(scratch, buffer, is_mono_source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_mapping() {
        let info = ParamInfo::new("Time", 0.5).with_range(10.0, 110.0).with_unit("ms");
        let value = ParamValue::from_normalized(0.5, &info);
        assert_eq!(value.actual, 60.0);
        let clamped = ParamValue::from_normalized(2.0, &info);
        assert_eq!(clamped.normalized, 1.0);
        assert_eq!(clamped.actual, 110.0);
    }

    #[test]
    fn test_processor_ids_are_unique() {
        let a = ProcessorBase::new(ProcessorInfo::new("A", "Test"));
        let b = ProcessorBase::new(ProcessorInfo::new("B", "Test"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_base_ignores_unknown_param() {
        let mut base = ProcessorBase::new(
            ProcessorInfo::new("A", "Test").with_param(ParamInfo::new("Amount", 0.25)),
        );
        base.set_param(3, 1.0);
        assert_eq!(base.param_actual(0), 0.25);
        assert_eq!(base.param_actual(3), 0.0);
    }
}
