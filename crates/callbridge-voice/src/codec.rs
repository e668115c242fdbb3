//! Audio transcoding between the telephony wire codec and the voice model.
//!
//! The telephony side always carries 8 kHz mono G.711 μ-law, framed in
//! 20 ms units of exactly [`MULAW_FRAME_BYTES`] bytes. That frame size is a
//! wire-format contract: outbound audio is never emitted in any other size,
//! and a trailing partial frame is padded with μ-law silence.
//!
//! The voice model either consumes μ-law directly (no conversion) or 16-bit
//! little-endian PCM at its own sample rate, in which case audio is expanded
//! and linearly resampled in both directions. Conversion works chunk by chunk
//! so the first outbound frame leaves as soon as its bytes arrive.

use serde::{Deserialize, Serialize};

/// Telephony sample rate in Hz.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Duration of one telephony media frame.
pub const FRAME_DURATION_MS: u32 = 20;

/// Bytes in one 20 ms μ-law frame at 8 kHz (one byte per sample).
pub const MULAW_FRAME_BYTES: usize = 160;

/// μ-law encoding of a zero sample.
pub const MULAW_SILENCE: u8 = 0xFF;

/// Audio format expected by the voice model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "codec")]
pub enum AudioFormat {
    /// 8 kHz G.711 μ-law, identical to the telephony wire format.
    #[default]
    G711Ulaw,
    /// 16-bit signed little-endian PCM.
    Pcm16 { sample_rate: u32 },
}

impl AudioFormat {
    /// Name used by realtime model APIs for this format.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::G711Ulaw => "g711_ulaw",
            Self::Pcm16 { .. } => "pcm16",
        }
    }

    pub fn sample_rate(self) -> u32 {
        match self {
            Self::G711Ulaw => TELEPHONY_SAMPLE_RATE,
            Self::Pcm16 { sample_rate } => sample_rate,
        }
    }
}

/// Compresses one 16-bit linear sample to G.711 μ-law (ITU-T reference algorithm).
pub fn ulaw_encode(sample: i16) -> u8 {
    let absno = if sample < 0 {
        (((!sample) as u16) >> 2) as i16 + 33
    } else {
        (sample >> 2) + 33
    };
    let absno = absno.min(0x1FFF);

    let mut segno = 1;
    let mut i = absno >> 6;
    while i != 0 {
        segno += 1;
        i >>= 1;
    }

    let high_nibble = 0x0008 - segno;
    let low_nibble = 0x000F - ((absno >> segno) & 0x000F);
    let mut result = (high_nibble << 4) | low_nibble;
    if sample >= 0 {
        result |= 0x0080;
    }
    result as u8
}

/// Expands one G.711 μ-law byte to a 16-bit linear sample.
pub fn ulaw_decode(byte: u8) -> i16 {
    let sign = if byte < 0x80 { -1 } else { 1 };
    let inverted = (!byte) as i16;
    let exponent = (inverted >> 4) & 0x0007;
    let mantissa = inverted & 0x000F;
    let step = 4 << (exponent + 1);

    sign * ((0x0080 << exponent) + step * mantissa + step / 2 - 4 * 33)
}

/// Decodes inbound telephony bytes to linear PCM samples.
pub fn decode_inbound(wire: &[u8]) -> Vec<i16> {
    wire.iter().map(|&b| ulaw_decode(b)).collect()
}

/// Encodes linear PCM samples to telephony bytes.
pub fn encode_outbound(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().map(|&s| ulaw_encode(s)).collect()
}

/// Size in bytes of a μ-law frame of the given duration.
pub fn frame_bytes(frame_duration_ms: u32) -> usize {
    (TELEPHONY_SAMPLE_RATE / 1000 * frame_duration_ms) as usize
}

/// Splits telephony bytes into fixed-size frames, padding the last one with silence.
pub fn chunk(wire: &[u8], frame_duration_ms: u32) -> Vec<Vec<u8>> {
    let mut chunker = FrameChunker::with_duration(frame_duration_ms);
    let mut frames = chunker.push(wire);
    frames.extend(chunker.flush());
    frames
}

/// Streaming linear resampler.
///
/// Output positions are tracked as exact fractions of the input rate, and
/// the last input sample of each chunk is kept so interpolation continues
/// across chunk boundaries. Feeding audio in pieces yields the same samples
/// as feeding it in one go; the final output sample of a stream waits for
/// the next input sample.
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    /// Position of the next output sample, in units of `1 / to_rate` input
    /// samples, relative to `last` (or to the next chunk's first sample
    /// when nothing is carried).
    next: u64,
    last: Option<i16>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate: from_rate.max(1),
            to_rate: to_rate.max(1),
            next: 0,
            last: None,
        }
    }

    pub fn process(&mut self, samples: &[i16]) -> Vec<i16> {
        if self.from_rate == self.to_rate {
            return samples.to_vec();
        }
        if samples.is_empty() {
            return Vec::new();
        }
        let mut input = Vec::with_capacity(samples.len() + 1);
        input.extend(self.last);
        input.extend_from_slice(samples);

        let from = u64::from(self.from_rate);
        let to = u64::from(self.to_rate);
        let last_index = input.len() as u64 - 1;
        let mut out = Vec::with_capacity((samples.len() as u64 * to / from) as usize + 1);
        while self.next / to < last_index {
            let idx = (self.next / to) as usize;
            let frac = (self.next % to) as f64 / to as f64;
            let (a, b) = (f64::from(input[idx]), f64::from(input[idx + 1]));
            let value = a + (b - a) * frac;
            out.push(value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16);
            self.next += from;
        }
        self.next -= last_index * to;
        self.last = input.last().copied();
        out
    }

    /// Drops the carried sample and phase.
    pub fn reset(&mut self) {
        self.next = 0;
        self.last = None;
    }
}

/// Incremental splitter that turns an arbitrary byte stream into full frames.
///
/// Bytes that do not yet fill a frame are held until the next `push`, or
/// padded out by `flush` when the utterance ends.
#[derive(Debug, Clone)]
pub struct FrameChunker {
    frame_len: usize,
    pending: Vec<u8>,
}

impl Default for FrameChunker {
    fn default() -> Self {
        Self::with_duration(FRAME_DURATION_MS)
    }
}

impl FrameChunker {
    pub fn with_duration(frame_duration_ms: u32) -> Self {
        let frame_len = frame_bytes(frame_duration_ms).max(1);
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Number of buffered bytes not yet emitted.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Appends bytes and returns every frame that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let complete = self.pending.len() / self.frame_len;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete * self.frame_len);
        let full = std::mem::replace(&mut self.pending, rest);
        full.chunks_exact(self.frame_len).map(<[u8]>::to_vec).collect()
    }

    /// Emits the buffered remainder padded with silence, if any.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut frame = std::mem::take(&mut self.pending);
        frame.resize(self.frame_len, MULAW_SILENCE);
        Some(frame)
    }

    /// Drops buffered bytes without emitting them.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Per-call converter between the telephony codec and the model's format.
///
/// Each direction keeps its own resampler state, and a dangling half
/// sample of model PCM is carried to the next chunk.
#[derive(Debug, Clone)]
pub struct Transcoder {
    model_format: AudioFormat,
    odd_byte: Option<u8>,
    inbound: Resampler,
    outbound: Resampler,
}

impl Transcoder {
    pub fn new(model_format: AudioFormat) -> Self {
        let model_rate = model_format.sample_rate();
        Self {
            model_format,
            odd_byte: None,
            inbound: Resampler::new(TELEPHONY_SAMPLE_RATE, model_rate),
            outbound: Resampler::new(model_rate, TELEPHONY_SAMPLE_RATE),
        }
    }

    pub fn model_format(&self) -> AudioFormat {
        self.model_format
    }

    /// Converts caller audio (μ-law) into the model's input format.
    pub fn to_model(&mut self, wire: &[u8]) -> Vec<u8> {
        match self.model_format {
            AudioFormat::G711Ulaw => wire.to_vec(),
            AudioFormat::Pcm16 { .. } => {
                let pcm = self.inbound.process(&decode_inbound(wire));
                let mut out = Vec::with_capacity(pcm.len() * 2);
                for sample in pcm {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
                out
            }
        }
    }

    /// Converts model output audio into telephony μ-law bytes.
    pub fn from_model(&mut self, audio: &[u8]) -> Vec<u8> {
        match self.model_format {
            AudioFormat::G711Ulaw => audio.to_vec(),
            AudioFormat::Pcm16 { .. } => {
                let mut bytes = Vec::with_capacity(audio.len() + 1);
                if let Some(b) = self.odd_byte.take() {
                    bytes.push(b);
                }
                bytes.extend_from_slice(audio);
                if bytes.len() % 2 == 1 {
                    self.odd_byte = bytes.pop();
                }
                let pcm: Vec<i16> = bytes
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                encode_outbound(&self.outbound.process(&pcm))
            }
        }
    }

    /// Forgets carried model output, e.g. after the caller interrupts.
    /// Caller audio keeps flowing, so the inbound resampler is left alone.
    pub fn reset(&mut self) {
        self.odd_byte = None;
        self.outbound.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ulaw_values() {
        assert_eq!(ulaw_encode(0), MULAW_SILENCE);
        assert_eq!(ulaw_decode(MULAW_SILENCE), 0);
        assert_eq!(ulaw_decode(0x00), -32124);
        assert_eq!(ulaw_decode(0x80), 32124);
    }

    #[test]
    fn ulaw_round_trip_stays_within_quantization_error() {
        for sample in (-32000i32..32000).step_by(97) {
            let sample = sample as i16;
            let back = ulaw_decode(ulaw_encode(sample)) as i32;
            let err = (back - sample as i32).abs();
            // Step size grows with magnitude; 1/16 of the value plus a floor bounds it.
            assert!(
                err <= (sample as i32).abs() / 16 + 16,
                "sample {sample} decoded to {back}"
            );
        }
    }

    #[test]
    fn silence_round_trip_keeps_duration() {
        let frames = 25;
        let silence = vec![0i16; MULAW_FRAME_BYTES * frames];
        let wire = encode_outbound(&silence);
        assert_eq!(wire.len(), MULAW_FRAME_BYTES * frames);
        assert!(wire.iter().all(|&b| b == MULAW_SILENCE));

        let decoded = decode_inbound(&wire);
        assert_eq!(decoded.len(), silence.len());
        assert!(decoded.iter().all(|&s| s == 0));
    }

    #[test]
    fn twenty_ms_frame_is_160_bytes() {
        assert_eq!(frame_bytes(FRAME_DURATION_MS), MULAW_FRAME_BYTES);
    }

    #[test]
    fn chunk_pads_trailing_partial_frame() {
        let wire = vec![0x10u8; 400];
        let frames = chunk(&wire, FRAME_DURATION_MS);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == MULAW_FRAME_BYTES));
        assert_eq!(frames[2][79], 0x10);
        assert_eq!(frames[2][80], MULAW_SILENCE);
    }

    #[test]
    fn chunker_emits_frames_as_soon_as_they_fill() {
        let mut chunker = FrameChunker::default();
        assert!(chunker.push(&[1u8; 100]).is_empty());
        assert_eq!(chunker.pending_len(), 100);

        let frames = chunker.push(&[2u8; 100]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), MULAW_FRAME_BYTES);
        assert_eq!(&frames[0][..100], &[1u8; 100][..]);
        assert_eq!(chunker.pending_len(), 40);

        let tail = chunker.flush().expect("remainder");
        assert_eq!(tail.len(), MULAW_FRAME_BYTES);
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn chunker_never_emits_other_sizes_for_uneven_input() {
        let mut chunker = FrameChunker::default();
        let mut total = Vec::new();
        for size in [1usize, 7, 159, 161, 320, 33, 480, 2] {
            total.extend(chunker.push(&vec![0x55; size]));
        }
        total.extend(chunker.flush());
        assert!(total.iter().all(|f| f.len() == MULAW_FRAME_BYTES));
    }

    #[test]
    fn resampler_changes_length_by_rate_ratio() {
        let pcm = vec![100i16; 480];
        let down = Resampler::new(24_000, 8_000).process(&pcm);
        assert_eq!(down.len(), 160);
        assert!(down.iter().all(|&s| s == 100));
        // The last upsampled positions wait for the next input sample.
        assert_eq!(Resampler::new(8_000, 24_000).process(&pcm[..160]).len(), 477);
    }

    #[test]
    fn resampler_keeps_phase_across_uneven_chunks() {
        let ramp: Vec<i16> = (0..30_000).map(|i| (i % 20_000) as i16).collect();
        let whole = Resampler::new(24_000, 8_000).process(&ramp);
        assert_eq!(whole.len(), 10_000);

        let mut chunked = Resampler::new(24_000, 8_000);
        let mut pieces = Vec::new();
        for (i, piece) in ramp.chunks(100).enumerate() {
            // Alternate split points so chunk edges land on every phase.
            let (a, b) = piece.split_at(i % 3);
            pieces.extend(chunked.process(a));
            pieces.extend(chunked.process(b));
        }
        assert_eq!(pieces, whole);
    }

    #[test]
    fn upsampling_does_not_drift_over_many_frames() {
        let mut r = Resampler::new(8_000, 24_000);
        let total: usize = (0..50).map(|_| r.process(&[7i16; 160]).len()).sum();
        assert_eq!(total, 50 * 480 - 3);
    }

    #[test]
    fn pcm16_model_output_is_downsampled_to_ulaw() {
        let mut t = Transcoder::new(AudioFormat::Pcm16 { sample_rate: 24_000 });
        // 20 ms at 24 kHz: 480 samples, 960 bytes of silence.
        let out = t.from_model(&vec![0u8; 960]);
        assert_eq!(out.len(), MULAW_FRAME_BYTES);
        assert!(out.iter().all(|&b| b == MULAW_SILENCE));
    }

    #[test]
    fn odd_pcm_byte_is_carried_to_the_next_chunk() {
        let mut t = Transcoder::new(AudioFormat::Pcm16 { sample_rate: 8_000 });
        let sample = 1000i16.to_le_bytes();
        assert!(t.from_model(&sample[..1]).is_empty());
        let out = t.from_model(&sample[1..]);
        assert_eq!(out, vec![ulaw_encode(1000)]);
    }

    #[test]
    fn pcm16_caller_audio_is_upsampled() {
        let mut t = Transcoder::new(AudioFormat::Pcm16 { sample_rate: 24_000 });
        let first = t.to_model(&[MULAW_SILENCE; MULAW_FRAME_BYTES]);
        let second = t.to_model(&[MULAW_SILENCE; MULAW_FRAME_BYTES]);
        assert_eq!(first.len(), 477 * 2);
        assert_eq!(second.len(), 480 * 2);
        assert!(second.iter().all(|&b| b == 0));
    }

    #[test]
    fn ulaw_model_format_is_passthrough() {
        let mut t = Transcoder::new(AudioFormat::G711Ulaw);
        let bytes = vec![1u8, 2, 3];
        assert_eq!(t.to_model(&bytes), bytes);
        assert_eq!(t.from_model(&bytes), bytes);
    }
}
