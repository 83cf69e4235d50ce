//! Channel groups
//!
//! Member channels are summed (with their own pan and volume) into the
//! group's mix buffer instead of master. The group chain then runs once
//! over the sum, and the result is merged into master at the group volume.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::buffer::AudioBuffer;
use crate::channel::AudioChannel;
use crate::effect::ProcessingChain;
use crate::types::{next_chain_id, to_linear, to_log, GroupId, InstrumentId};

static NEXT_GROUP_ID: AtomicU32 = AtomicU32::new(1);

pub struct ChannelGroup {
    id: GroupId,
    /// Logarithmically scaled volume
    volume: f32,
    chain: ProcessingChain,
    members: Vec<InstrumentId>,
    mix: AudioBuffer,
    scratch: AudioBuffer,
}

impl ChannelGroup {
    pub fn new(amount_of_channels: usize, buffer_size: usize) -> Self {
        Self {
            id: GroupId(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed)),
            volume: to_log(1.0),
            chain: ProcessingChain::new(next_chain_id()),
            members: Vec::new(),
            mix: AudioBuffer::new(amount_of_channels, buffer_size),
            scratch: AudioBuffer::new(amount_of_channels, buffer_size),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn set_volume(&mut self, linear: f32) {
        self.volume = to_log(linear);
    }

    pub fn volume(&self) -> f32 {
        to_linear(self.volume)
    }

    pub fn chain(&self) -> &ProcessingChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut ProcessingChain {
        &mut self.chain
    }

    pub fn members(&self) -> &[InstrumentId] {
        &self.members
    }

    pub fn add_member(&mut self, instrument: InstrumentId) {
        if !self.members.contains(&instrument) {
            self.members.push(instrument);
        }
    }

    pub fn remove_member(&mut self, instrument: InstrumentId) -> bool {
        let before = self.members.len();
        self.members.retain(|&m| m != instrument);
        before != self.members.len()
    }

    pub fn set_buffer_size(&mut self, amount_of_channels: usize, buffer_size: usize) {
        self.mix = AudioBuffer::new(amount_of_channels, buffer_size);
        self.scratch = AudioBuffer::new(amount_of_channels, buffer_size);
    }

    /// Size and silence the mix buffer for this cycle
    pub fn prepare(&mut self, frames: usize) {
        self.mix.resize(frames);
        self.mix.silence();
        self.scratch.resize(frames);
    }

    /// Sum a member channel into the group
    pub fn accumulate(&mut self, channel: &AudioChannel, gain: f32) {
        channel.mix_into(&mut self.mix, gain);
    }

    /// Run the group chain over the summed members
    pub fn process(&mut self) {
        self.chain.run(&mut self.mix, &mut self.scratch, false);
    }

    /// Merge the processed group into `master` at the group volume
    pub fn mix_into(&self, master: &mut AudioBuffer) {
        master.merge(&self.mix, 0, 0, self.volume);
    }

    pub fn output(&self) -> &AudioBuffer {
        &self.mix
    }
}

impl std::fmt::Debug for ChannelGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGroup")
            .field("id", &self.id)
            .field("members", &self.members)
            .field("volume", &self.volume())
            .field("chain", &self.chain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::native::GainProcessor;

    #[test]
    fn test_group_sums_members_then_processes_once() {
        let mut group = ChannelGroup::new(2, 4);
        assert!(group.chain_mut().add(Box::new(GainProcessor::with_gain(0.5))).is_ok());
        group.set_volume(1.0);

        let mut a = AudioChannel::new(InstrumentId(1), 2, 4);
        a.output_mut().channel_mut(0).unwrap().fill(0.4);
        let mut b = AudioChannel::new(InstrumentId(2), 2, 4);
        b.output_mut().channel_mut(0).unwrap().fill(0.6);

        group.prepare(4);
        group.accumulate(&a, 1.0);
        group.accumulate(&b, 1.0);
        group.process();

        let mut master = AudioBuffer::new(2, 4);
        group.mix_into(&mut master);
        for &s in master.channel(0).unwrap() {
            assert!((s - 0.5).abs() < 1e-6);
        }
        assert!(master.channel(1).unwrap().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_members_are_unique() {
        let mut group = ChannelGroup::new(2, 4);
        group.add_member(InstrumentId(3));
        group.add_member(InstrumentId(3));
        assert_eq!(group.members(), &[InstrumentId(3)]);
        assert!(group.remove_member(InstrumentId(3)));
        assert!(!group.remove_member(InstrumentId(3)));
    }
}
