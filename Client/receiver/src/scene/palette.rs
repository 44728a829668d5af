/// Fixed organ palette (linear RGBA).
pub const PALETTE: [[f32; 4]; 10] = [
    [0.55, 0.20, 0.55, 1.0], // spleen
    [0.80, 0.45, 0.30, 1.0], // kidneys
    [0.95, 0.80, 0.45, 1.0], // pancreas
    [0.90, 0.55, 0.55, 1.0], // stomach
    [0.75, 0.10, 0.15, 1.0], // heart
    [0.95, 0.70, 0.30, 1.0], // duodenum
    [0.40, 0.65, 0.85, 1.0],
    [0.55, 0.25, 0.20, 1.0], // liver
    [0.95, 0.90, 0.20, 1.0], // tumor
    [0.60, 0.85, 0.55, 1.0],
];

/// `(label - 1) mod PALETTE.len()`, always in range, also for labels <= 0.
pub fn palette_index(label: i32) -> usize {
    (i64::from(label) - 1).rem_euclid(PALETTE.len() as i64) as usize
}

pub fn color_for_label(label: i32) -> [f32; 4] {
    PALETTE[palette_index(label)]
}
