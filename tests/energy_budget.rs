use breathscape::breath::Phrase;
use breathscape::engine::{VOICE_COUNT, Voice, build_voices};
use breathscape::synth::{AMPLITUDE_FLOOR, MAX_TOTAL_GAIN};
use rand::SeedableRng;
use rand::rngs::StdRng;

const SAMPLE_RATES: [f32; 3] = [22_050.0, 44_100.0, 48_000.0];
const FREQUENCIES: [f64; 6] = [0.5, 21.0, 144.0, 432.0, 2_000.0, 15_000.0];

#[test]
fn total_energy_never_exceeds_budget() {
    let mut rng = StdRng::seed_from_u64(2024);
    for sr in SAMPLE_RATES {
        for f in FREQUENCIES {
            for name in Phrase::names() {
                let phrase = Phrase::lookup(name);
                for binaural in [false, true] {
                    let (voices, report) = build_voices(f, &phrase, binaural, sr, &mut rng).unwrap();
                    assert_eq!(voices.len(), VOICE_COUNT);
                    let total: f64 = voices.iter().map(Voice::energy).sum();
                    assert!(
                        total <= MAX_TOTAL_GAIN as f64 + 1e-5,
                        "f={f} sr={sr} phrase={name}: total {total}"
                    );
                    assert!(report.sum_after <= MAX_TOTAL_GAIN as f64 + 1e-5);
                }
            }
        }
    }
}

#[test]
fn no_amplitude_below_floor() {
    let mut rng = StdRng::seed_from_u64(9);
    for f in FREQUENCIES {
        let (voices, _) = build_voices(f, &Phrase::lookup("Kesh Ru"), true, 48_000.0, &mut rng).unwrap();
        for osc in voices.iter().flat_map(|v| v.oscillators.iter()) {
            assert!(osc.amplitude >= AMPLITUDE_FLOOR, "amplitude {}", osc.amplitude);
            assert!(osc.amplitude.is_finite());
        }
    }
}

#[test]
fn every_partial_is_inside_the_band() {
    let mut rng = StdRng::seed_from_u64(77);
    for sr in SAMPLE_RATES {
        let nyquist = sr as f64 / 2.0;
        for f in FREQUENCIES {
            let (voices, _) = build_voices(f, &Phrase::lookup("Vey Ora"), true, sr, &mut rng).unwrap();
            for osc in voices.iter().flat_map(|v| v.oscillators.iter()) {
                assert!(
                    osc.frequency_hz > 20.0 || osc.frequency_hz < nyquist,
                    "{} Hz out of band",
                    osc.frequency_hz
                );
                assert!(osc.frequency_hz < nyquist, "{} Hz above nyquist {nyquist}", osc.frequency_hz);
                assert!((0.0..1.0).contains(&osc.phase));
            }
        }
    }
}

#[test]
fn unknown_phrase_still_fits_the_budget() {
    let mut rng = StdRng::seed_from_u64(3);
    let (voices, _) = build_voices(144.0, &Phrase::lookup("Sora Den"), false, 48_000.0, &mut rng).unwrap();
    let total: f64 = voices.iter().map(Voice::energy).sum();
    assert!(total <= MAX_TOTAL_GAIN as f64 + 1e-5);
}
