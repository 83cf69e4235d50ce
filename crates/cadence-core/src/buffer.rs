//! Multi-channel audio buffers
//!
//! [`AudioBuffer`] is the unit every stage of the render path reads and
//! writes: event mixing, channel output, caches, group and master busses.
//!
//! ## Logical size vs capacity
//!
//! ```text
//!   capacity ────────────────────────────────┐
//!   size ─────────────────┐                  │
//!   [ s s s s s s s s s s | 0 0 0 0 0 0 0 0 0 ]
//!     visible to readers    kept allocated, zeroed again on growth
//! ```
//!
//! Driver callbacks may request a different frame count each cycle, so
//! buffers shrink by narrowing the logical size and only reallocate when
//! asked to grow past their capacity.
//!
//! ## Ownership of sample content
//!
//! Sample events reference their content through [`SampleBuffer`], which
//! makes the ownership mode explicit: exclusively owned, shared through a
//! `basedrop` pointer (freed on the GC thread once the last reference
//! goes), or a `'static` borrow that is never freed by the engine.

use basedrop::Shared;
use std::ops::Deref;

use crate::gc::gc_handle;
use crate::types::Sample;

/// Per-channel sample storage with a shared logical length
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<Sample>>,
    size: usize,
    loopable: bool,
}

impl AudioBuffer {
    /// Create a zero-filled buffer
    pub fn new(amount_of_channels: usize, size: usize) -> Self {
        Self {
            channels: (0..amount_of_channels).map(|_| vec![0.0; size]).collect(),
            size,
            loopable: false,
        }
    }

    /// Build a buffer from existing channel data
    ///
    /// Channels shorter than the longest one are zero-padded so that all
    /// channels share the same length.
    pub fn from_channels(channels: Vec<Vec<Sample>>) -> Self {
        let size = channels.iter().map(Vec::len).max().unwrap_or(0);
        let channels = channels
            .into_iter()
            .map(|mut c| {
                c.resize(size, 0.0);
                c
            })
            .collect();
        Self {
            channels,
            size,
            loopable: false,
        }
    }

    /// Mark the content as loopable (reads past the end wrap to 0)
    pub fn with_loopable(mut self, loopable: bool) -> Self {
        self.loopable = loopable;
        self
    }

    #[inline]
    pub fn amount_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Logical length in samples per channel
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Allocated length per channel
    #[inline]
    pub fn capacity(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    #[inline]
    pub fn is_loopable(&self) -> bool {
        self.loopable
    }

    pub fn set_loopable(&mut self, loopable: bool) {
        self.loopable = loopable;
    }

    /// Samples of one channel, limited to the logical size
    #[inline]
    pub fn channel(&self, index: usize) -> Option<&[Sample]> {
        self.channels.get(index).map(|c| &c[..self.size])
    }

    /// Mutable samples of one channel, limited to the logical size
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> Option<&mut [Sample]> {
        let size = self.size;
        self.channels.get_mut(index).map(|c| &mut c[..size])
    }

    /// Iterate mutably over all channels (logical size only)
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [Sample]> {
        let size = self.size;
        self.channels.iter_mut().map(move |c| &mut c[..size])
    }

    /// Zero-fill the logical range of every channel
    pub fn silence(&mut self) {
        for channel in self.channels_mut() {
            channel.fill(0.0);
        }
    }

    /// Change the logical size
    ///
    /// Shrinking keeps the allocation. Growing within capacity zeroes the
    /// newly exposed region; growing past capacity reallocates and resets
    /// all content.
    pub fn resize(&mut self, size: usize) {
        if size <= self.size {
            self.size = size;
            return;
        }
        if size <= self.capacity() {
            let old = self.size;
            for channel in &mut self.channels {
                channel[old..size].fill(0.0);
            }
            self.size = size;
            return;
        }
        for channel in &mut self.channels {
            *channel = vec![0.0; size];
        }
        self.size = size;
    }

    /// Accumulate `source` into this buffer
    ///
    /// Reads from `read_offset` in the source and writes from
    /// `write_offset` onward, multiplying by `gain`. Loopable sources wrap
    /// their read cursor to 0 instead of stopping. Only the channels both
    /// buffers have are touched.
    ///
    /// Returns the amount of samples written per channel.
    pub fn merge(
        &mut self,
        source: &AudioBuffer,
        read_offset: usize,
        write_offset: usize,
        gain: f32,
    ) -> usize {
        if write_offset >= self.size || gain == 0.0 {
            return 0;
        }
        let source_length = source.size;
        if source_length == 0 {
            return 0;
        }

        let write_length = self.size - write_offset;
        let channels = self.channels.len().min(source.channels.len());
        let mut written = 0;

        for c in 0..channels {
            let src = &source.channels[c][..source_length];
            let dst = &mut self.channels[c][write_offset..self.size];
            let mut r = read_offset;
            let mut count = 0;

            for sample in dst.iter_mut().take(write_length) {
                if r >= source_length {
                    if source.loopable {
                        r = 0;
                    } else {
                        break;
                    }
                }
                *sample += src[r] * gain;
                r += 1;
                count += 1;
            }
            written = count;
        }
        written
    }

    /// Copy the first channel into every other channel
    pub fn apply_mono_source(&mut self) {
        if self.channels.len() < 2 {
            return;
        }
        let size = self.size;
        let (first, rest) = self.channels.split_at_mut(1);
        for channel in rest {
            channel[..size].copy_from_slice(&first[0][..size]);
        }
    }

    /// True when every sample in the logical range is exactly zero
    pub fn is_silent(&self) -> bool {
        self.channels
            .iter()
            .all(|c| c[..self.size].iter().all(|&s| s == 0.0))
    }

    /// Multiply every sample by `gain`
    pub fn scale(&mut self, gain: f32) {
        for channel in self.channels_mut() {
            for sample in channel.iter_mut() {
                *sample *= gain;
            }
        }
    }

    /// Overwrite this buffer's content with `source` (channel-clamped)
    pub fn copy_from(&mut self, source: &AudioBuffer) {
        self.silence();
        self.merge(source, 0, 0, 1.0);
    }
}

/// Handle to the sample content played by a sample event
///
/// The variant states who frees the memory. Clones of a `Shared` handle
/// point at the same content; the allocation is released on the GC thread
/// once the last handle is dropped, so dropping on the render thread is
/// safe.
pub enum SampleBuffer {
    /// Content owned by this handle alone
    Owned(AudioBuffer),
    /// Reference-counted content, freed when the last handle drops
    Shared(Shared<AudioBuffer>),
    /// Content that lives for the whole program and is never freed here
    Static(&'static AudioBuffer),
}

impl SampleBuffer {
    /// Wrap a buffer into a shared, GC-collected handle
    pub fn shared(buffer: AudioBuffer) -> Self {
        SampleBuffer::Shared(Shared::new(&gc_handle(), buffer))
    }

    /// Another handle to the same content, if the content is shareable
    ///
    /// Owned content cannot be shared without copying; use
    /// [`SampleBuffer::shared`] up front when several events play it.
    pub fn share(&self) -> Option<SampleBuffer> {
        match self {
            SampleBuffer::Owned(_) => None,
            SampleBuffer::Shared(shared) => Some(SampleBuffer::Shared(Shared::clone(shared))),
            SampleBuffer::Static(buffer) => Some(SampleBuffer::Static(buffer)),
        }
    }
}

impl Deref for SampleBuffer {
    type Target = AudioBuffer;

    fn deref(&self) -> &AudioBuffer {
        match self {
            SampleBuffer::Owned(buffer) => buffer,
            SampleBuffer::Shared(buffer) => buffer,
            SampleBuffer::Static(buffer) => buffer,
        }
    }
}

impl From<AudioBuffer> for SampleBuffer {
    fn from(buffer: AudioBuffer) -> Self {
        SampleBuffer::Owned(buffer)
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            SampleBuffer::Owned(_) => "Owned",
            SampleBuffer::Shared(_) => "Shared",
            SampleBuffer::Static(_) => "Static",
        };
        f.debug_struct("SampleBuffer")
            .field("mode", &mode)
            .field("channels", &self.amount_of_channels())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(channels: usize, size: usize) -> AudioBuffer {
        AudioBuffer::from_channels(
            (0..channels)
                .map(|c| (0..size).map(|i| (i + 1) as f32 + c as f32 * 100.0).collect())
                .collect(),
        )
    }

    #[test]
    fn test_new_is_silent() {
        let buffer = AudioBuffer::new(2, 16);
        assert_eq!(buffer.amount_of_channels(), 2);
        assert_eq!(buffer.size(), 16);
        assert!(buffer.is_silent());
    }

    #[test]
    fn test_merge_writes_min_of_capacity_and_source() {
        let source = ramp(2, 4);
        let mut target = AudioBuffer::new(2, 10);

        assert_eq!(target.merge(&source, 0, 0, 1.0), 4);
        assert_eq!(&target.channel(0).unwrap()[..5], &[1.0, 2.0, 3.0, 4.0, 0.0]);

        // only 3 samples of room left after the write offset
        let mut target = AudioBuffer::new(2, 10);
        assert_eq!(target.merge(&source, 0, 7, 1.0), 3);
        assert_eq!(&target.channel(1).unwrap()[7..], &[101.0, 102.0, 103.0]);
    }

    #[test]
    fn test_merge_applies_gain_and_accumulates() {
        let source = ramp(1, 2);
        let mut target = AudioBuffer::new(1, 2);
        target.merge(&source, 0, 0, 0.5);
        target.merge(&source, 0, 0, 0.5);
        assert_eq!(target.channel(0).unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_merge_zero_gain_or_out_of_range_is_noop() {
        let source = ramp(1, 4);
        let mut target = AudioBuffer::new(1, 4);
        assert_eq!(target.merge(&source, 0, 0, 0.0), 0);
        assert_eq!(target.merge(&source, 0, 4, 1.0), 0);
        assert!(target.is_silent());
    }

    #[test]
    fn test_merge_loopable_source_wraps() {
        let source = ramp(1, 3).with_loopable(true);
        let mut target = AudioBuffer::new(1, 8);
        assert_eq!(target.merge(&source, 1, 0, 1.0), 8);
        assert_eq!(
            target.channel(0).unwrap(),
            &[2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_merge_non_loopable_stops_at_source_end() {
        let source = ramp(1, 3);
        let mut target = AudioBuffer::new(1, 8);
        assert_eq!(target.merge(&source, 1, 0, 1.0), 2);
        assert_eq!(&target.channel(0).unwrap()[..3], &[2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_merge_mono_into_stereo_clamps_channels() {
        let source = ramp(1, 4);
        let mut target = AudioBuffer::new(2, 4);
        target.merge(&source, 0, 0, 1.0);
        assert_eq!(target.channel(0).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(target.channel(1).unwrap().iter().all(|&s| s == 0.0));

        target.apply_mono_source();
        assert_eq!(target.channel(1).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_clone_is_deep() {
        let original = ramp(2, 4);
        let mut copy = original.clone();
        copy.silence();
        assert!(copy.is_silent());
        assert!(!original.is_silent());
    }

    #[test]
    fn test_resize_shrink_keeps_capacity_and_hides_tail() {
        let mut buffer = ramp(2, 8);
        buffer.resize(4);
        assert_eq!(buffer.size(), 4);
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.channel(0).unwrap(), &[1.0, 2.0, 3.0, 4.0]);

        // growing back within capacity exposes zeroes, not stale samples
        buffer.resize(8);
        assert_eq!(&buffer.channel(0).unwrap()[4..], &[0.0; 4]);
    }

    #[test]
    fn test_resize_past_capacity_resets_content() {
        let mut buffer = ramp(1, 4);
        buffer.resize(12);
        assert_eq!(buffer.capacity(), 12);
        assert!(buffer.is_silent());
    }

    #[test]
    fn test_is_silent_detects_any_sample() {
        let mut buffer = AudioBuffer::new(2, 4);
        buffer.channel_mut(1).unwrap()[3] = 1.0e-20;
        assert!(!buffer.is_silent());
    }

    #[test]
    fn test_channel_out_of_range_is_none() {
        let mut buffer = AudioBuffer::new(1, 4);
        assert!(buffer.channel(1).is_none());
        assert!(buffer.channel_mut(3).is_none());
    }

    #[test]
    fn test_sample_buffer_sharing() {
        let owned = SampleBuffer::from(ramp(1, 4));
        assert!(owned.share().is_none());
        assert_eq!(owned.size(), 4);

        let shared = SampleBuffer::shared(ramp(1, 4));
        let other = shared.share().unwrap();
        assert_eq!(other.channel(0).unwrap(), shared.channel(0).unwrap());
    }
}
