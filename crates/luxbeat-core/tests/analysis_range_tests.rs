use luxbeat_core::{AnalyzerConfig, AudioFrame, SpectralAnalyzer};
use proptest::prelude::*;

fn frame(samples: Vec<f32>, position: u64) -> AudioFrame {
    AudioFrame {
        samples,
        sample_position: position,
        sample_rate: 44100,
        channels: 1,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any sequence of finite frames keeps every band energy inside [0,1].
    #[test]
    fn band_energies_always_unit_range(
        amplitudes in prop::collection::vec(0.0f32..=1.0, 1..6),
        freqs in prop::collection::vec(30.0f32..8000.0, 1..6),
    ) {
        let config = AnalyzerConfig {
            window_size: 1024,
            channels: 1,
            ..AnalyzerConfig::default()
        };
        let mut analyzer = SpectralAnalyzer::new(config).unwrap();

        for (i, (amp, freq)) in amplitudes.iter().zip(freqs.iter().cycle()).enumerate() {
            let samples: Vec<f32> = (0..1024)
                .map(|n| (2.0 * std::f32::consts::PI * freq * n as f32 / 44100.0).sin() * amp)
                .collect();
            let set = analyzer.analyze(&frame(samples, i as u64 * 1024)).unwrap();
            for e in &set.energies {
                prop_assert!((0.0..=1.0).contains(e), "energy out of range: {}", e);
                prop_assert!(e.is_finite());
            }
        }
    }

    /// Peak tracking is scale-adaptive: after repeating any frame the
    /// dominant band normalizes to its own peak.
    #[test]
    fn repeated_frame_saturates_dominant_band(amp in 0.05f32..=1.0) {
        let config = AnalyzerConfig {
            window_size: 1024,
            channels: 1,
            ..AnalyzerConfig::default()
        };
        let mut analyzer = SpectralAnalyzer::new(config).unwrap();

        let samples: Vec<f32> = (0..1024)
            .map(|n| (2.0 * std::f32::consts::PI * 100.0 * n as f32 / 44100.0).sin() * amp)
            .collect();

        let mut last = None;
        for i in 0..4u64 {
            last = Some(analyzer.analyze(&frame(samples.clone(), i * 1024)).unwrap());
        }
        let set = last.unwrap();
        let max = set.energies.iter().cloned().fold(0.0f32, f32::max);
        prop_assert!((max - 1.0).abs() < 1e-4, "dominant band should saturate, max={}", max);
    }
}
