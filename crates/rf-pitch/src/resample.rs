//! Linear-interpolation resampling and mono downmix
//!
//! Every buffer entering the analysis pipeline goes through here: decoded
//! files, host buffers and the 16 kHz model inputs.

/// Resample `input` from `src_rate` to `dst_rate` with linear interpolation.
///
/// Output length is `round(len * dst_rate / src_rate)`. Equal rates return a copy.
pub fn resample_linear(input: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if input.is_empty() || src_rate == 0 || dst_rate == 0 {
        return Vec::new();
    }
    if src_rate == dst_rate {
        return input.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let src_pos = i as f64 * ratio;
            let idx = src_pos as usize;
            let frac = src_pos - idx as f64;
            if idx < last {
                (input[idx] as f64 * (1.0 - frac) + input[idx + 1] as f64 * frac) as f32
            } else {
                input[idx.min(last)]
            }
        })
        .collect()
}

/// Average interleaved channels into a mono buffer
pub fn downmix_interleaved(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_copy() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 44100, 44100), input);
    }

    #[test]
    fn test_downsample_length() {
        let input = vec![0.0f32; 44100];
        let out = resample_linear(&input, 44100, 16000);
        assert_eq!(out.len(), 16000);
    }

    #[test]
    fn test_upsample_interpolates() {
        let input = vec![0.0, 1.0];
        let out = resample_linear(&input, 1, 2);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
        // Past the last sample holds the final value
        assert_eq!(out[3], 1.0);
    }

    #[test]
    fn test_downmix_stereo() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix_interleaved(&stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_empty_input() {
        assert!(resample_linear(&[], 48000, 44100).is_empty());
    }
}
