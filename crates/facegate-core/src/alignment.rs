//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face so its five landmarks land on the canonical
//! InsightFace template, scaled to the recognizer's input size.

use image::{Rgb, RgbImage};

/// Canonical landmark template for a 112×112 crop.
const TEMPLATE_SIZE: f32 = 112.0;
const TEMPLATE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// 2×3 similarity matrix `[a, -b, tx, b, a, ty]`.
type Similarity = [f32; 6];

/// Template landmarks scaled to an `out_size`×`out_size` crop.
pub fn reference_landmarks(out_size: u32) -> [(f32, f32); 5] {
    let k = out_size as f32 / TEMPLATE_SIZE;
    TEMPLATE_LANDMARKS.map(|(x, y)| (x * k, y * k))
}

/// Least-squares similarity transform (scale, rotation, translation) mapping
/// `src` onto `dst`.
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
    // Normal equations AᵀA·[a, b, tx, ty]ᵀ = Aᵀd, two rows per point:
    //   sx·a - sy·b + tx = dx
    //   sy·a + sx·b + ty = dy
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
        for (row, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * rhs;
            }
        }
    }

    let [a, b, tx, ty] = solve_4x4(ata, atb).unwrap_or([1.0, 0.0, 0.0, 0.0]);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting. `None` if the system is singular.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(a: [[f32; 4]; 4], b: [f32; 4]) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&a[i]);
        m[i][4] = b[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))?;
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-6 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (m[i][4] - tail) / m[i][i];
    }

    Some(x)
}

/// Inverse-map every output pixel through `matrix` and sample the source
/// bilinearly. Pixels that fall outside the source are black.
fn warp_affine(frame: &RgbImage, matrix: &Similarity, out_size: u32) -> RgbImage {
    let [a, _, tx, b, _, ty] = *matrix;
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let ia = a / det;
    let ib = b / det;

    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            frame.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let channel = |c: usize| {
            let v = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            v.round().clamp(0.0, 255.0) as u8
        };

        Rgb([channel(0), channel(1), channel(2)])
    })
}

/// Align a detected face to a canonical `out_size`×`out_size` RGB crop.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5], out_size: u32) -> RgbImage {
    let matrix = estimate_similarity_transform(landmarks, &reference_landmarks(out_size));
    warp_affine(frame, &matrix, out_size)
}
