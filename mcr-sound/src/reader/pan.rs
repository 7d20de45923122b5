//! Stereo panning and mono upmix

use super::{Property, ReadError, SeekResult, SoundReader};

/// Balance pan around a mono or stereo reader; output is always stereo
///
/// Pan is in [-1, 1]: negative attenuates the right channel, positive the
/// left. At 0 both channels pass unchanged.
pub struct PanReader {
    inner: Box<dyn SoundReader>,
    pan: f32,
}

impl PanReader {
    /// Wrap `inner`; returns `inner` back if it has more than two channels
    pub fn new(inner: Box<dyn SoundReader>) -> Result<Self, Box<dyn SoundReader>> {
        if inner.num_channels() > 2 || inner.num_channels() == 0 {
            return Err(inner);
        }
        Ok(Self { inner, pan: 0.0 })
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    fn gains(&self) -> (f32, f32) {
        (1.0 - self.pan.max(0.0), 1.0 + self.pan.min(0.0))
    }
}

impl SoundReader for PanReader {
    fn read(&mut self, buf: &mut [f32], frames: usize) -> Result<usize, ReadError> {
        let frames = frames.min(buf.len() / 2);
        let (left, right) = self.gains();

        if self.inner.num_channels() == 1 {
            // Read mono into the front half, then expand backwards in place
            let n = self.inner.read(&mut buf[..frames], frames)?;
            for i in (0..n).rev() {
                let s = buf[i];
                buf[i * 2] = s * left;
                buf[i * 2 + 1] = s * right;
            }
            return Ok(n);
        }

        let n = self.inner.read(buf, frames)?;
        if self.pan != 0.0 {
            for frame in buf[..n * 2].chunks_exact_mut(2) {
                frame[0] *= left;
                frame[1] *= right;
            }
        }
        Ok(n)
    }

    fn set_position(&mut self, frame: i64) -> SeekResult {
        self.inner.set_position(frame)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn num_channels(&self) -> usize {
        2
    }

    fn next_source_frame(&self) -> i64 {
        self.inner.next_source_frame()
    }

    fn stream_to_source_ratio(&self) -> f64 {
        self.inner.stream_to_source_ratio()
    }

    fn length_frames(&self) -> Option<i64> {
        self.inner.length_frames()
    }

    fn error(&self) -> Option<String> {
        self.inner.error()
    }

    fn set_property(&mut self, property: &Property) -> bool {
        match *property {
            Property::Pan(p) => {
                self.set_pan(p as f32);
                true
            }
            _ => self.inner.set_property(property),
        }
    }

    fn try_clone(&self) -> Option<Box<dyn SoundReader>> {
        let mut copy = PanReader::new(self.inner.try_clone()?).ok()?;
        copy.pan = self.pan;
        Some(Box::new(copy))
    }
}
