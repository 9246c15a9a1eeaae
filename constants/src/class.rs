/// ASPRS LAS classification codes used by the filtering and gridding stages.

/// Low point (noise), assigned to outliers below their neighbourhood.
pub const LOW_NOISE: u8 = 7;

/// High noise, assigned to outliers above their neighbourhood.
pub const HIGH_NOISE: u8 = 18;

/// Classes dropped by the class filter when none are configured.
pub const DEFAULT_EXCLUDED_CLASSES: &[u8] = &[0, LOW_NOISE, HIGH_NOISE];

pub struct ClassInfo {
    pub id: u8,
    pub name: &'static str,
}

pub const CLASS_MAP: &[ClassInfo] = &[
    ClassInfo {
        id: 0,
        name: "created, never classified",
    },
    ClassInfo {
        id: 1,
        name: "unclassified",
    },
    ClassInfo {
        id: 2,
        name: "ground",
    },
    ClassInfo {
        id: 3,
        name: "vegetation - low",
    },
    ClassInfo {
        id: 4,
        name: "vegetation - medium",
    },
    ClassInfo {
        id: 5,
        name: "vegetation - high",
    },
    ClassInfo {
        id: 6,
        name: "building",
    },
    ClassInfo {
        id: 7,
        name: "low point (noise)",
    },
    ClassInfo {
        id: 8,
        name: "model key-point",
    },
    ClassInfo {
        id: 9,
        name: "water",
    },
    ClassInfo {
        id: 10,
        name: "rail",
    },
    ClassInfo {
        id: 11,
        name: "road surface",
    },
    ClassInfo {
        id: 13,
        name: "wire - guard",
    },
    ClassInfo {
        id: 14,
        name: "wire - conductor",
    },
    ClassInfo {
        id: 15,
        name: "transmission tower",
    },
    ClassInfo {
        id: 16,
        name: "wire-structure connector",
    },
    ClassInfo {
        id: 17,
        name: "bridge deck",
    },
    ClassInfo {
        id: 18,
        name: "high noise",
    },
];

pub fn get_class_name(id: u8) -> String {
    CLASS_MAP
        .iter()
        .find(|c| c.id == id)
        .map_or("unknown", |c| c.name)
        .to_string()
}
