//! Floating-point mix accumulator
//!
//! Every voice in a mix pass is *added* into one scratch buffer; the sum is
//! then converted once to the output format. Writes go to a caller-chosen
//! sample offset with independent source and destination strides, so a
//! caller can place a mono stream into one channel of an interleaved buffer
//! or skip frames of scheduled silence.
//!
//! ```text
//! voice A ──write()──┐
//! voice B ──write()──┼──> [f32 scratch] ──read_i16()/read_f32()/read_planar()──> device
//! voice C ──write()──┘         (cleared after every read)
//! ```

/// Scale applied when converting a clamped float sample to i16
const I16_SCALE: f32 = 32767.0;

/// Additive scratch buffer for mixing
///
/// The backing storage grows lazily to the highest sample index written and
/// is never shrunk, so after the first few mix passes no allocation happens.
#[derive(Debug, Default)]
pub struct MixAccumulator {
    /// Accumulated samples; entries past `used` are always zero
    buf: Vec<f32>,

    /// High-water mark in samples since the last read
    used: usize,

    /// Sample index where the next write starts
    offset: usize,
}

impl MixAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an accumulator with `samples` of storage preallocated
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            buf: vec![0.0; samples],
            used: 0,
            offset: 0,
        }
    }

    /// Set the sample index where the next `write` starts
    pub fn set_write_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// Current write offset in samples
    pub fn write_offset(&self) -> usize {
        self.offset
    }

    /// Number of samples accumulated since the last read
    pub fn len(&self) -> usize {
        self.used
    }

    /// True when nothing has been written since the last read
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Allocated storage in samples
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Raise the high-water mark to `samples` without writing anything
    ///
    /// Used to guarantee a full-length (silent) read even when no voice
    /// contributed to the tail of the buffer.
    pub fn extend(&mut self, samples: usize) {
        self.grow(samples);
        self.used = self.used.max(samples);
    }

    /// Add samples into the buffer at the current write offset
    ///
    /// Reads every `src_stride`-th sample of `src` and adds it to every
    /// `dst_stride`-th position starting at the write offset. Writing twice
    /// at the same offset sums the two signals.
    pub fn write(&mut self, src: &[f32], src_stride: usize, dst_stride: usize) {
        let src_stride = src_stride.max(1);
        let dst_stride = dst_stride.max(1);
        let count = src.len().div_ceil(src_stride);
        if count == 0 {
            return;
        }

        let needed = self.offset + (count - 1) * dst_stride + 1;
        self.grow(needed);

        let dst = &mut self.buf[self.offset..needed];
        for (d, s) in dst
            .iter_mut()
            .step_by(dst_stride)
            .zip(src.iter().step_by(src_stride))
        {
            *d += *s;
        }

        self.used = self.used.max(needed);
    }

    /// Convert accumulated samples to clamped, rounded i16 and clear
    ///
    /// Samples beyond the accumulated length are written as silence.
    /// Returns the number of accumulated samples copied.
    pub fn read_i16(&mut self, out: &mut [i16]) -> usize {
        let n = self.used.min(out.len());
        for (o, s) in out[..n].iter_mut().zip(&self.buf[..n]) {
            *o = (s.clamp(-1.0, 1.0) * I16_SCALE).round() as i16;
        }
        out[n..].fill(0);
        self.clear();
        n
    }

    /// Copy accumulated samples as interleaved f32 and clear
    ///
    /// Float output is not clamped; devices accept headroom above unity.
    pub fn read_f32(&mut self, out: &mut [f32]) -> usize {
        let n = self.used.min(out.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        out[n..].fill(0.0);
        self.clear();
        n
    }

    /// Deinterleave accumulated `stride`-channel frames into one slice per
    /// channel and clear
    ///
    /// Slices past `stride` are filled with silence. A single slice receives
    /// the mean of all channels. Returns the number of frames copied.
    pub fn read_planar(&mut self, channels: &mut [&mut [f32]], stride: usize) -> usize {
        let stride = stride.max(1);
        let frames = self.used.div_ceil(stride);
        let sample = |buf: &[f32], frame: usize, ch: usize| {
            buf.get(frame * stride + ch).copied().unwrap_or(0.0)
        };

        let mut copied = 0;
        if let [mono] = channels {
            let n = frames.min(mono.len());
            for (frame, o) in mono[..n].iter_mut().enumerate() {
                let sum: f32 = (0..stride).map(|ch| sample(&self.buf, frame, ch)).sum();
                *o = sum / stride as f32;
            }
            mono[n..].fill(0.0);
            copied = n;
        } else {
            for (ch, out) in channels.iter_mut().enumerate() {
                if ch >= stride {
                    out.fill(0.0);
                    continue;
                }
                let n = frames.min(out.len());
                for (frame, o) in out[..n].iter_mut().enumerate() {
                    *o = sample(&self.buf, frame, ch);
                }
                out[n..].fill(0.0);
                copied = copied.max(n);
            }
        }

        self.clear();
        copied
    }

    /// Discard accumulated samples without reading them
    pub fn clear(&mut self) {
        self.buf[..self.used].fill(0.0);
        self.used = 0;
        self.offset = 0;
    }

    fn grow(&mut self, samples: usize) {
        if self.buf.len() < samples {
            self.buf.resize(samples, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (i as f32 * 0.05).sin())
            .collect()
    }

    #[test]
    fn test_two_writes_sum() {
        let a = sine(256, 0.3);
        let b = sine(256, 0.2);

        let mut acc = MixAccumulator::new();
        acc.write(&a, 1, 1);
        acc.write(&b, 1, 1);

        let mut out = vec![0.0f32; 256];
        assert_eq!(acc.read_f32(&mut out), 256);
        for i in 0..256 {
            assert!((out[i] - (a[i] + b[i])).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sum_is_clamped_before_i16_conversion() {
        let loud = vec![0.9f32; 8];
        let mut acc = MixAccumulator::new();
        acc.write(&loud, 1, 1);
        acc.write(&loud, 1, 1);

        let mut out = vec![0i16; 8];
        acc.read_i16(&mut out);
        assert!(out.iter().all(|&s| s == 32767), "0.9 + 0.9 must clamp to full scale");

        acc.write(&[-0.9, -0.9], 1, 1);
        acc.write(&[-0.9, -0.9], 1, 1);
        let mut out = vec![0i16; 2];
        acc.read_i16(&mut out);
        assert_eq!(out, vec![-32767, -32767]);
    }

    #[test]
    fn test_i16_conversion_rounds() {
        let mut acc = MixAccumulator::new();
        // 0.5 * 32767 = 16383.5 rounds away from zero
        acc.write(&[0.5, -0.5, 0.00002], 1, 1);
        let mut out = vec![0i16; 3];
        acc.read_i16(&mut out);
        assert_eq!(out, vec![16384, -16384, 1]);
    }

    #[test]
    fn test_read_clears_buffer() {
        let mut acc = MixAccumulator::new();
        acc.write(&[0.25; 4], 1, 1);
        let mut out = vec![0.0f32; 4];
        acc.read_f32(&mut out);
        assert!(acc.is_empty());

        acc.write(&[0.25; 4], 1, 1);
        acc.read_f32(&mut out);
        assert_eq!(out, vec![0.25; 4], "previous pass must not leak into the next");
    }

    #[test]
    fn test_offset_and_stride() {
        let mut acc = MixAccumulator::new();
        // Mono source into the right channel of interleaved stereo, starting at frame 1
        acc.set_write_offset(3);
        acc.write(&[0.1, 0.2, 0.3], 1, 2);

        let mut out = vec![9.0f32; 8];
        let n = acc.read_f32(&mut out);
        assert_eq!(n, 8);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.1, 0.0, 0.2, 0.0, 0.3]);
    }

    #[test]
    fn test_source_stride_picks_one_channel() {
        let mut acc = MixAccumulator::new();
        let stereo = [1.0, -1.0, 0.5, -0.5];
        acc.write(&stereo, 2, 1);
        let mut out = vec![0.0f32; 2];
        acc.read_f32(&mut out);
        assert_eq!(out, vec![1.0, 0.5]);
    }

    #[test]
    fn test_short_mix_reads_as_silence_tail() {
        let mut acc = MixAccumulator::new();
        acc.write(&[0.5, 0.5], 1, 1);
        let mut out = vec![7i16; 6];
        assert_eq!(acc.read_i16(&mut out), 2);
        assert_eq!(&out[2..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_extend_forces_length() {
        let mut acc = MixAccumulator::new();
        acc.extend(16);
        assert_eq!(acc.len(), 16);
        let mut out = vec![1.0f32; 16];
        acc.read_f32(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_storage_never_shrinks() {
        let mut acc = MixAccumulator::new();
        acc.write(&vec![0.1; 4096], 1, 1);
        let cap = acc.capacity();
        let mut out = vec![0.0f32; 4096];
        acc.read_f32(&mut out);
        acc.write(&[0.1; 4], 1, 1);
        assert_eq!(acc.capacity(), cap);
    }

    #[test]
    fn test_read_planar_deinterleaves() {
        let mut acc = MixAccumulator::new();
        acc.write(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3], 1, 1);

        let mut left = vec![0.0f32; 4];
        let mut right = vec![0.0f32; 4];
        let frames = {
            let mut channels: [&mut [f32]; 2] = [left.as_mut_slice(), right.as_mut_slice()];
            acc.read_planar(&mut channels, 2)
        };
        assert_eq!(frames, 3);
        assert_eq!(left, vec![0.1, 0.2, 0.3, 0.0]);
        assert_eq!(right, vec![-0.1, -0.2, -0.3, 0.0]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_read_planar_silences_extra_channels() {
        let mut acc = MixAccumulator::new();
        acc.write(&[0.5, -0.5, 0.5, -0.5], 1, 1);

        let mut left = vec![0.0f32; 2];
        let mut right = vec![0.0f32; 2];
        let mut center = vec![9.0f32; 2];
        let frames = {
            let mut channels: [&mut [f32]; 3] =
                [left.as_mut_slice(), right.as_mut_slice(), center.as_mut_slice()];
            acc.read_planar(&mut channels, 2)
        };
        assert_eq!(frames, 2);
        assert_eq!(left, vec![0.5, 0.5]);
        assert_eq!(right, vec![-0.5, -0.5]);
        assert_eq!(center, vec![0.0, 0.0]);
    }

    #[test]
    fn test_read_planar_folds_to_mono() {
        let mut acc = MixAccumulator::new();
        acc.write(&[0.5, 0.25, 1.0, 0.0], 1, 1);

        let mut mono = vec![0.0f32; 3];
        let frames = {
            let mut channels: [&mut [f32]; 1] = [mono.as_mut_slice()];
            acc.read_planar(&mut channels, 2)
        };
        assert_eq!(frames, 2);
        assert_eq!(mono, vec![0.375, 0.5, 0.0]);
    }
}
