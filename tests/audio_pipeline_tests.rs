// Unit tests for the capture-path sample math
//
// Frame alignment, stereo downmix, resampling, float conversion, and
// fixed-duration chunking.

use voicepipe::audio::chunker::{
    downmix_stereo_bytes, f32_to_i16, samples_to_le_bytes, FrameAligner, LinearResampler,
    SampleChunker,
};

#[test]
fn test_aligner_passes_whole_frames_through() {
    let mut aligner = FrameAligner::new();
    let out = aligner.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(aligner.pending(), 0);
}

#[test]
fn test_aligner_carries_the_tail() {
    let mut aligner = FrameAligner::new();

    // 4001 bytes: 4000 usable now, 1 carried
    let big = vec![0u8; 4001];
    let out = aligner.push(&big);
    assert_eq!(out.len(), 4000);
    assert_eq!(aligner.pending(), 1);

    // 3 more bytes complete the carried frame
    let out = aligner.push(&[1, 2, 3]);
    assert_eq!(out.len(), 4);
    assert_eq!(aligner.pending(), 0);
}

#[test]
fn test_aligner_accumulates_tiny_reads() {
    let mut aligner = FrameAligner::new();
    assert!(aligner.push(&[1]).is_empty());
    assert!(aligner.push(&[2, 3]).is_empty());
    assert_eq!(aligner.push(&[4]), vec![1, 2, 3, 4]);
}

#[test]
fn test_downmix_averages_the_channels() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&100i16.to_le_bytes());
    bytes.extend_from_slice(&200i16.to_le_bytes());
    bytes.extend_from_slice(&(-100i16).to_le_bytes());
    bytes.extend_from_slice(&(-301i16).to_le_bytes());
    // floor division: (-100 + -301) / 2 = -201 (rounds toward negative)
    assert_eq!(downmix_stereo_bytes(&bytes), vec![150, -201]);
}

#[test]
fn test_downmix_does_not_overflow_at_extremes() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&i16::MAX.to_le_bytes());
    bytes.extend_from_slice(&i16::MAX.to_le_bytes());
    bytes.extend_from_slice(&i16::MIN.to_le_bytes());
    bytes.extend_from_slice(&i16::MIN.to_le_bytes());
    assert_eq!(downmix_stereo_bytes(&bytes), vec![i16::MAX, i16::MIN]);
}

#[test]
fn test_resample_identity_when_rates_match() {
    let input = vec![0.1, 0.2, 0.3];
    let mut resampler = LinearResampler::new(16000, 16000);
    assert_eq!(resampler.push(&input), input);
}

#[test]
fn test_resample_thirds_the_rate() {
    let input: Vec<f32> = (0..480).map(|i| i as f32).collect();
    let mut resampler = LinearResampler::new(48000, 16000);
    let out = resampler.push(&input);
    assert_eq!(out.len(), 160);
    // a linear ramp resamples onto the same ramp
    assert!((out[0] - 0.0).abs() < 1e-3);
    assert!((out[1] - 3.0).abs() < 1e-3);
    assert!((out[100] - 300.0).abs() < 1e-3);
}

#[test]
fn test_resample_empty_input() {
    let mut resampler = LinearResampler::new(48000, 16000);
    assert!(resampler.push(&[]).is_empty());
}

#[test]
fn test_resample_is_continuous_across_batches() {
    let input: Vec<f32> = (0..480).map(|i| i as f32).collect();
    let mut resampler = LinearResampler::new(48000, 16000);

    // uneven batches, as a capture drain loop produces
    let mut out = resampler.push(&input[..100]);
    out.extend(resampler.push(&input[100..250]));
    out.extend(resampler.push(&input[250..]));

    // the batched output lands on the same ramp, with no reset at the
    // batch boundaries
    assert_eq!(out.len(), 160);
    for (k, &sample) in out.iter().enumerate() {
        assert!(
            (sample - (3 * k) as f32).abs() < 1e-3,
            "output {} was {}",
            k,
            sample
        );
    }
}

#[test]
fn test_resample_keeps_fractional_position_at_odd_ratios() {
    // 44100 -> 16000 is a non-integer ratio; resampling 9 batches of 49
    // samples independently would lose samples to per-batch truncation
    let mut resampler = LinearResampler::new(44100, 16000);
    let mut produced = 0usize;
    for _ in 0..9 {
        produced += resampler.push(&vec![0.0f32; 49]).len();
    }
    // 441 input samples cover 160 output positions at 441/160 apart
    assert_eq!(produced, 160);
}

#[test]
fn test_f32_to_i16_scales_and_clips() {
    let out = f32_to_i16(&[0.0, 1.0, -1.0, 2.0, -2.0, 0.5]);
    assert_eq!(out[0], 0);
    assert_eq!(out[1], i16::MAX);
    assert_eq!(out[2], i16::MIN);
    assert_eq!(out[3], i16::MAX);
    assert_eq!(out[4], i16::MIN);
    assert_eq!(out[5], 16383);
}

#[test]
fn test_chunker_emits_100ms_chunks() {
    let mut chunker = SampleChunker::new(16000);
    assert_eq!(chunker.chunk_samples(), 1600);

    let chunks = chunker.push(&vec![1i16; 1599]);
    assert!(chunks.is_empty());
    assert_eq!(chunker.pending(), 1599);

    let chunks = chunker.push(&[1i16]);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].len(), 1600);
    assert_eq!(chunker.pending(), 0);
}

#[test]
fn test_chunker_splits_large_pushes() {
    let mut chunker = SampleChunker::new(16000);
    let chunks = chunker.push(&vec![0i16; 4000]);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunker.pending(), 800);
}

#[test]
fn test_samples_to_le_bytes_layout() {
    let bytes = samples_to_le_bytes(&[0x0102, -2]);
    assert_eq!(bytes, vec![0x02, 0x01, 0xFE, 0xFF]);
}
