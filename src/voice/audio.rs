/// Samples per 100 ms frame of 16 kHz mono input fed to the realtime model.
pub const MODEL_FRAME_SAMPLES: usize = 3200;
/// Samples per channel in one 20 ms Opus frame at 48 kHz.
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// 48 kHz signed-16 interleaved stereo → 16 kHz mono, by nearest-neighbour
/// subsampling at a 3:1 ratio, averaging left and right per kept frame.
pub fn downmix_48k_stereo_to_16k_mono(input: &[i16]) -> Vec<i16> {
    let frames = input.len() / 2;
    let mut out = Vec::with_capacity(frames / 3);
    for group in 0..frames / 3 {
        let frame = group * 3;
        let left = input[frame * 2] as i32;
        let right = input[frame * 2 + 1] as i32;
        out.push(((left + right) / 2) as i16);
    }
    out
}

/// 24 kHz mono model output → 48 kHz interleaved stereo, by duplicating each
/// sample into two stereo frames.
pub fn upsample_24k_mono_to_48k_stereo(input: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(input.len() * 4);
    for &sample in input {
        out.push(sample);
        out.push(sample);
        out.push(sample);
        out.push(sample);
    }
    out
}

pub fn pcm_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

pub fn bytes_to_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Buffers PCM until whole frames are available; a trailing partial frame is
/// dropped on flush, never emitted.
pub struct Framer {
    frame_samples: usize,
    buffer: Vec<i16>,
}

impl Framer {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            buffer: Vec::new(),
        }
    }

    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.buffer.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_samples {
            let rest = self.buffer.split_off(self.frame_samples);
            frames.push(std::mem::replace(&mut self.buffer, rest));
        }
        frames
    }

    pub fn flush(&mut self) {
        self.buffer.clear();
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_length_matches_contract() {
        // for N input bytes: floor(N / (2ch · 2bytes · 3)) · 2 output bytes
        for frames in [0usize, 1, 2, 3, 299, 300, 961] {
            let input = vec![0i16; frames * 2];
            let out = downmix_48k_stereo_to_16k_mono(&input);
            let n_bytes = input.len() * 2;
            assert_eq!(out.len() * 2, (n_bytes / (2 * 2 * 3)) * 2, "frames={frames}");
        }
    }

    #[test]
    fn downmix_averages_channels() {
        // one kept frame per three input frames
        let input: Vec<i16> = vec![100, 200, 0, 0, 0, 0, -50, 50, 0, 0, 0, 0];
        assert_eq!(downmix_48k_stereo_to_16k_mono(&input), vec![150, 0]);
    }

    #[test]
    fn upsample_duplicates_into_stereo() {
        let out = upsample_24k_mono_to_48k_stereo(&[7, -3]);
        assert_eq!(out, vec![7, 7, 7, 7, -3, -3, -3, -3]);
    }

    #[test]
    fn pcm_byte_round_trip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN];
        assert_eq!(bytes_to_pcm(&pcm_to_bytes(&samples)), samples);
    }

    #[test]
    fn framer_emits_exact_frames_only() {
        let mut framer = Framer::new(4);

        assert!(framer.push(&[1, 2, 3]).is_empty());
        let frames = framer.push(&[4, 5]);
        assert_eq!(frames, vec![vec![1, 2, 3, 4]]);
        assert_eq!(framer.pending(), 1);

        let frames = framer.push(&[6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(frames, vec![vec![5, 6, 7, 8], vec![9, 10, 11, 12]]);
    }

    #[test]
    fn framer_flush_drops_partial() {
        let mut framer = Framer::new(4);
        framer.push(&[1, 2, 3]);
        framer.flush();
        assert_eq!(framer.pending(), 0);
        assert!(framer.push(&[4]).is_empty());
    }

    #[test]
    fn model_frame_is_100ms_of_16k_audio() {
        assert_eq!(MODEL_FRAME_SAMPLES, 16_000 / 10);
        assert_eq!(OPUS_FRAME_SAMPLES, 48_000 / 50);
    }
}
