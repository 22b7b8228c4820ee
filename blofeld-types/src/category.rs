use serde::{Deserialize, Serialize};

/// Sound category as stored in the category byte of a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Init,
    Arp,
    Atmo,
    Bass,
    Drum,
    Fx,
    Keys,
    Lead,
    Mono,
    Pad,
    Perc,
    Poly,
    Seq,
    /// Value outside the factory table, kept verbatim.
    Other(u8),
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Init,
        Category::Arp,
        Category::Atmo,
        Category::Bass,
        Category::Drum,
        Category::Fx,
        Category::Keys,
        Category::Lead,
        Category::Mono,
        Category::Pad,
        Category::Perc,
        Category::Poly,
        Category::Seq,
    ];

    pub fn from_byte(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(Category::Other(value))
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Category::Other(v) => v,
            known => Self::ALL.iter().position(|c| *c == known).unwrap_or(0) as u8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Init => "Init",
            Category::Arp => "Arp",
            Category::Atmo => "Atmo",
            Category::Bass => "Bass",
            Category::Drum => "Drum",
            Category::Fx => "FX",
            Category::Keys => "Keys",
            Category::Lead => "Lead",
            Category::Mono => "Mono",
            Category::Pad => "Pad",
            Category::Perc => "Perc",
            Category::Poly => "Poly",
            Category::Seq => "Seq",
            Category::Other(_) => "?",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Other(v) => write!(f, "?{}", v),
            known => f.write_str(known.name()),
        }
    }
}
