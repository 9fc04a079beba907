// Capture-path sample math: realignment, downmix, resample, chunking
//
// These helpers sit on the hot path between the OS audio source and the
// wire, so they are pure functions over slices with no allocation beyond
// their outputs.

/// Carries the 0–3 trailing bytes of a stereo 16-bit read so every
/// forwarded buffer is a whole number of L/R sample pairs.
#[derive(Debug, Default)]
pub struct FrameAligner {
    remainder: Vec<u8>,
}

impl FrameAligner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw read and return the aligned prefix (length a multiple
    /// of 4). Trailing bytes are carried into the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut buf = std::mem::take(&mut self.remainder);
        buf.extend_from_slice(bytes);
        let aligned_len = buf.len() - (buf.len() % 4);
        self.remainder = buf.split_off(aligned_len);
        buf
    }

    /// Bytes currently carried.
    pub fn pending(&self) -> usize {
        self.remainder.len()
    }
}

/// Downmix interleaved 16-bit little-endian stereo bytes to mono samples.
///
/// Each 4-byte pair becomes `floor((L + R) / 2)`. Input length must be a
/// multiple of 4 (the aligner guarantees this upstream).
pub fn downmix_stereo_bytes(bytes: &[u8]) -> Vec<i16> {
    let mut mono = Vec::with_capacity(bytes.len() / 4);
    for pair in bytes.chunks_exact(4) {
        let left = i16::from_le_bytes([pair[0], pair[1]]) as i32;
        let right = i16::from_le_bytes([pair[2], pair[3]]) as i32;
        mono.push(((left + right).div_euclid(2)) as i16);
    }
    mono
}

/// Streaming linear-interpolation resampler.
///
/// `out[k] = buf[idx] + (buf[idx+1] - buf[idx]) * frac` where
/// `idx = floor(k * input_rate / target_rate)` over the whole stream:
/// the fractional read position and the last input sample carry across
/// `push` calls, so batch boundaries introduce no resets or dropped
/// samples at non-integer rate ratios.
#[derive(Debug)]
pub struct LinearResampler {
    ratio: f64,
    pos: f64,
    tail: Option<f32>,
    passthrough: bool,
}

impl LinearResampler {
    pub fn new(input_rate: u32, target_rate: u32) -> Self {
        Self {
            ratio: input_rate as f64 / target_rate as f64,
            pos: 0.0,
            tail: None,
            passthrough: input_rate == target_rate,
        }
    }

    /// Feed one batch; returns the output samples it completes. A sample
    /// at the batch edge is held until its interpolation partner arrives.
    pub fn push(&mut self, input: &[f32]) -> Vec<f32> {
        if self.passthrough {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        // Virtual buffer: carried tail sample (index 0) then `input`.
        let offset = usize::from(self.tail.is_some());
        let len = offset + input.len();
        let mut out = Vec::new();
        loop {
            let idx = self.pos.floor() as usize;
            if idx + 1 >= len {
                break;
            }
            let a = if idx < offset {
                self.tail.unwrap_or_default()
            } else {
                input[idx - offset]
            };
            let b = input[idx + 1 - offset];
            let frac = (self.pos - idx as f64) as f32;
            out.push(a + (b - a) * frac);
            self.pos += self.ratio;
        }

        // Keep the last input sample for interpolation across the next
        // batch boundary and rebase the read position onto it.
        let consumed = len - 1;
        self.pos -= consumed as f64;
        self.tail = input.last().copied();
        out
    }
}

/// Convert float samples in [-1, 1] to 16-bit PCM with symmetric
/// clipping.
pub fn f32_to_i16(input: &[f32]) -> Vec<i16> {
    input
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Accumulates mono samples and emits fixed 100 ms chunks.
pub struct SampleChunker {
    buf: Vec<i16>,
    chunk_samples: usize,
}

impl SampleChunker {
    /// `target_rate / 10` samples per chunk.
    pub fn new(target_rate: u32) -> Self {
        Self {
            buf: Vec::new(),
            chunk_samples: (target_rate / 10) as usize,
        }
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Feed samples; returns zero or more complete chunks, retaining the
    /// remainder.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.buf.extend_from_slice(samples);
        let mut out = Vec::new();
        while self.buf.len() >= self.chunk_samples {
            let rest = self.buf.split_off(self.chunk_samples);
            out.push(std::mem::replace(&mut self.buf, rest));
        }
        out
    }

    /// Samples currently buffered below the chunk threshold.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Serialize mono samples to little-endian PCM bytes for the wire.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
