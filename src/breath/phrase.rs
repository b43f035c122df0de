/// Per-phrase voicing: how wet the space is and how loud the banks are built.
#[derive(Debug, Clone, PartialEq)]
pub struct Phrase {
    pub name: String,
    /// Preset contribution to the wet blend, in [0, 1].
    pub wet: f32,
    /// Gain scale handed to the bank builder.
    pub gain_scale: f32,
}

const PRESETS: [(&str, f32, f32); 5] = [
    ("Shoh Mek", 0.42, 1.0),
    ("Ahn Tal", 0.30, 0.9),
    ("Vey Ora", 0.55, 0.85),
    ("Lum Sai", 0.25, 1.0),
    ("Kesh Ru", 0.65, 0.8),
];

impl Phrase {
    /// Look up a named preset; unknown names derive one from a hash of the name.
    pub fn lookup(name: &str) -> Self {
        let key = name.trim();
        if let Some(&(n, wet, gain_scale)) = PRESETS
            .iter()
            .find(|(n, _, _)| n.eq_ignore_ascii_case(key))
        {
            return Self {
                name: n.to_string(),
                wet,
                gain_scale,
            };
        }
        let h = fnv1a(key.as_bytes());
        let wet = 0.2 + 0.5 * ((h & 0xffff) as f32 / 65_535.0);
        let gain_scale = 0.8 + 0.2 * (((h >> 16) & 0xffff) as f32 / 65_535.0);
        Self {
            name: key.to_string(),
            wet,
            gain_scale,
        }
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        PRESETS.iter().map(|(n, _, _)| *n)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}
