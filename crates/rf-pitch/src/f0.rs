//! F0 grid alignment and post-processing
//!
//! Pitch models run at their own frame rate (10 ms at 16 kHz for the
//! shipped detectors). Their output is mapped onto the mel frame grid here.

/// Frame period of the 16 kHz / 160-hop pitch models (seconds)
pub const MODEL_FRAME_PERIOD: f64 = 160.0 / 16000.0;

/// Frame period of the mel grid (seconds)
pub fn grid_frame_period() -> f64 {
    crate::HOP_SIZE as f64 / crate::SAMPLE_RATE as f64
}

/// Resample an F0 track onto another frame grid.
///
/// Between two voiced frames the value is interpolated in log-frequency.
/// If only one neighbour is voiced it is used as is; two unvoiced
/// neighbours give 0. Positions past the source hold the last value.
pub fn resample_to_grid(
    src: &[f32],
    src_frame_period: f64,
    dst_frame_period: f64,
    num_frames: usize,
) -> Vec<f32> {
    if src.is_empty() || src_frame_period <= 0.0 {
        return vec![0.0; num_frames];
    }

    let last = src[src.len() - 1].max(0.0);

    (0..num_frames)
        .map(|i| {
            let pos = i as f64 * dst_frame_period / src_frame_period;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;

            if idx + 1 < src.len() {
                let a = src[idx];
                let b = src[idx + 1];
                match (a > 0.0, b > 0.0) {
                    (true, true) => (a.ln() * (1.0 - frac) + b.ln() * frac).exp(),
                    (true, false) => a,
                    (false, true) => b,
                    (false, false) => 0.0,
                }
            } else if idx < src.len() {
                src[idx]
            } else {
                last
            }
        })
        .collect()
}

/// `f0 > 0` per frame
pub fn voiced_mask(f0: &[f32]) -> Vec<bool> {
    f0.iter().map(|&f| f > 0.0).collect()
}

/// Median filter (window 3) applied inside voiced runs only.
///
/// Run edges are left as is. Unvoiced frames are 0.
pub fn smooth_voiced(f0: &[f32], voiced: &[bool]) -> Vec<f32> {
    let is_voiced = |i: usize| voiced.get(i).copied().unwrap_or(false) && f0[i] > 0.0;

    (0..f0.len())
        .map(|i| {
            if !is_voiced(i) {
                return 0.0;
            }
            let prev = (i > 0 && is_voiced(i - 1)).then(|| f0[i - 1]);
            let next = (i + 1 < f0.len() && is_voiced(i + 1)).then(|| f0[i + 1]);
            match (prev, next) {
                (Some(p), Some(n)) => median3(p, f0[i], n),
                _ => f0[i],
            }
        })
        .collect()
}

fn median3(a: f32, b: f32, c: f32) -> f32 {
    a.max(b).min(a.min(b).max(c))
}

/// Fill unvoiced gaps with log-linear interpolation between the voiced
/// neighbours. Leading and trailing gaps hold the nearest voiced value.
pub fn interpolate_unvoiced(f0: &[f32], voiced: &[bool]) -> Vec<f32> {
    let mut out = f0.to_vec();
    let points: Vec<usize> = (0..f0.len())
        .filter(|&i| voiced.get(i).copied().unwrap_or(false) && f0[i] > 0.0)
        .collect();

    let (Some(&first), Some(&last)) = (points.first(), points.last()) else {
        return out;
    };

    out[..first].fill(f0[first]);
    out[last + 1..].fill(f0[last]);

    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (la, lb) = (f0[a].ln(), f0[b].ln());
        for (k, value) in out[a + 1..b].iter_mut().enumerate() {
            let t = (k + 1) as f32 / (b - a) as f32;
            *value = (la * (1.0 - t) + lb * t).exp();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_resample_log_interpolation() {
        // Halfway between 100 and 400 Hz in log space is 200 Hz
        let out = resample_to_grid(&[100.0, 400.0], 1.0, 0.5, 2);
        assert_relative_eq!(out[0], 100.0, epsilon = 1e-3);
        assert_relative_eq!(out[1], 200.0, epsilon = 1e-2);
    }

    #[test]
    fn test_resample_voiced_neighbour_fallback() {
        let out = resample_to_grid(&[0.0, 300.0, 0.0], 1.0, 0.5, 4);
        assert_eq!(out[1], 300.0);
        assert_eq!(out[3], 300.0);
        let none = resample_to_grid(&[0.0, 0.0], 1.0, 0.5, 2);
        assert_eq!(none, vec![0.0, 0.0]);
    }

    #[test]
    fn test_resample_past_end_holds_last() {
        let out = resample_to_grid(&[200.0, 220.0], 1.0, 1.0, 5);
        assert_eq!(out.len(), 5);
        assert_eq!(out[1], 220.0);
        assert_eq!(out[4], 220.0);
    }

    #[test]
    fn test_resample_model_to_grid_length() {
        let src = vec![220.0f32; 100];
        let out = resample_to_grid(&src, MODEL_FRAME_PERIOD, grid_frame_period(), 86);
        assert_eq!(out.len(), 86);
        assert!(out.iter().all(|&f| (f - 220.0).abs() < 1e-3));
    }

    #[test]
    fn test_smooth_removes_spike_inside_run() {
        let f0 = [200.0, 200.0, 400.0, 200.0, 200.0];
        let out = smooth_voiced(&f0, &voiced_mask(&f0));
        assert_eq!(out[2], 200.0);
    }

    #[test]
    fn test_smooth_does_not_cross_unvoiced() {
        let f0 = [0.0, 300.0, 0.0, 200.0];
        let out = smooth_voiced(&f0, &voiced_mask(&f0));
        assert_eq!(out, vec![0.0, 300.0, 0.0, 200.0]);
    }

    #[test]
    fn test_interpolate_unvoiced() {
        let f0 = [0.0, 100.0, 0.0, 400.0, 0.0];
        let out = interpolate_unvoiced(&f0, &voiced_mask(&f0));
        assert_eq!(out[0], 100.0);
        assert_relative_eq!(out[2], 200.0, epsilon = 1e-2);
        assert_eq!(out[4], 400.0);
    }
}
