//! Ordered processor lists
//!
//! A [`ProcessingChain`] holds the boxed processors of one channel, group
//! or the master bus in processing order. Attaching stamps the chain id
//! into the processor; detaching (single removal or a full reset) clears
//! it and hands the box back to the caller, who decides where it gets
//! dropped.

use crate::buffer::AudioBuffer;
use crate::effect::{run_processor, Processor};
use crate::types::{ChainId, ProcessorId};

pub struct ProcessingChain {
    id: ChainId,
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessingChain {
    pub fn new(id: ChainId) -> Self {
        Self {
            id,
            processors: Vec::new(),
        }
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    /// Append a processor
    ///
    /// Rejected (and returned) when a processor with the same id is
    /// already attached or the processor claims another chain.
    pub fn add(&mut self, mut processor: Box<dyn Processor>) -> Result<(), Box<dyn Processor>> {
        if self.contains(processor.id()) {
            return Err(processor);
        }
        if let Some(other) = processor.chain() {
            if other != self.id {
                return Err(processor);
            }
        }
        processor.set_chain(Some(self.id));
        self.processors.push(processor);
        Ok(())
    }

    /// Detach a processor, returning ownership to the caller
    pub fn remove(&mut self, id: ProcessorId) -> Option<Box<dyn Processor>> {
        let index = self.processors.iter().position(|p| p.id() == id)?;
        let mut processor = self.processors.remove(index);
        processor.set_chain(None);
        Some(processor)
    }

    pub fn contains(&self, id: ProcessorId) -> bool {
        self.processors.iter().any(|p| p.id() == id)
    }

    /// Processors in processing order
    pub fn active_processors(&mut self) -> &mut [Box<dyn Processor>] {
        &mut self.processors
    }

    pub fn get_mut(&mut self, id: ProcessorId) -> Option<&mut (dyn Processor + 'static)> {
        self.processors
            .iter_mut()
            .find(|p| p.id() == id)
            .map(|p| p.as_mut())
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Detach every processor
    ///
    /// The chain is empty once the returned iterator is dropped; the
    /// processors themselves are handed to the caller.
    pub fn reset(&mut self) -> impl Iterator<Item = Box<dyn Processor>> + '_ {
        self.processors.drain(..).map(|mut p| {
            p.set_chain(None);
            p
        })
    }

    /// Run every non-bypassed processor in order
    pub fn run(&mut self, buffer: &mut AudioBuffer, scratch: &mut AudioBuffer, is_mono_source: bool) {
        for processor in self.processors.iter_mut() {
            if processor.is_bypassed() {
                continue;
            }
            run_processor(processor.as_mut(), buffer, scratch, is_mono_source);
        }
    }

    /// Forward a tempo change to every processor
    pub fn set_tempo(&mut self, tempo: f64, sample_rate: u32) {
        for processor in self.processors.iter_mut() {
            processor.set_tempo(tempo, sample_rate);
        }
    }
}

impl std::fmt::Debug for ProcessingChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingChain")
            .field("id", &self.id)
            .field(
                "processors",
                &self.processors.iter().map(|p| p.info().name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::native::{DelayProcessor, GainProcessor};

    #[test]
    fn test_add_sets_back_reference() {
        let mut chain = ProcessingChain::new(ChainId(10));
        let gain = Box::new(GainProcessor::with_gain(0.5));
        let id = gain.id();
        assert!(chain.add(gain).is_ok());
        assert!(chain.contains(id));
        assert_eq!(chain.active_processors()[0].chain(), Some(ChainId(10)));
    }

    #[test]
    fn test_processor_in_at_most_one_chain() {
        let mut first = ProcessingChain::new(ChainId(10));
        let mut second = ProcessingChain::new(ChainId(11));

        let gain = Box::new(GainProcessor::with_gain(0.5));
        let id = gain.id();
        first.add(gain).ok();

        // moving requires detaching first
        let gain = first.remove(id).unwrap();
        assert_eq!(gain.chain(), None);
        assert!(second.add(gain).is_ok());
        assert!(!first.contains(id));

        // a processor still stamped with another chain is refused
        let mut stale = Box::new(GainProcessor::with_gain(1.0));
        stale.set_chain(Some(ChainId(99)));
        assert!(second.add(stale).is_err());
    }

    #[test]
    fn test_reset_returns_processors() {
        let mut chain = ProcessingChain::new(ChainId(3));
        chain.add(Box::new(GainProcessor::with_gain(0.5))).ok();
        chain.add(Box::new(DelayProcessor::new(44100))).ok();

        let detached: Vec<_> = chain.reset().collect();
        assert_eq!(detached.len(), 2);
        assert!(detached.iter().all(|p| p.chain().is_none()));
        assert!(chain.is_empty());
    }

    #[test]
    fn test_run_applies_in_order_and_skips_bypassed() {
        let mut chain = ProcessingChain::new(ChainId(3));
        let mut bypassed = Box::new(GainProcessor::with_gain(0.0));
        bypassed.set_bypass(true);
        chain.add(Box::new(GainProcessor::with_gain(0.5))).ok();
        chain.add(bypassed).ok();

        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0; 4], vec![1.0; 4]]);
        let mut scratch = AudioBuffer::new(2, 4);
        chain.run(&mut buffer, &mut scratch, false);
        assert!(buffer.channel(0).unwrap().iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }
}
