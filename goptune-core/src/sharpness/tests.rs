use super::{aq_strength, per_pixel, plane_energy, unsharpen_hint};

fn splitmix(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Direct 5×5 binomial high-pass, the shape `plane_energy` implements with
/// running row sums.
fn reference_energy(luma: &[u8], width: usize, height: usize) -> i64 {
    const K: [i64; 5] = [1, 4, 6, 4, 1];
    let mut acc = 0i64;
    for y in 2..height - 2 {
        for x in 2..width - 2 {
            let mut sum = 0i64;
            for (j, &kj) in K.iter().enumerate() {
                for (i, &ki) in K.iter().enumerate() {
                    sum += kj * ki * i64::from(luma[(y + j - 2) * width + (x + i - 2)]);
                }
            }
            let smoothed = (sum + 128) >> 8;
            acc += (i64::from(luma[y * width + x]) - smoothed).abs();
        }
    }
    acc
}

#[test]
fn constant_plane_has_zero_energy() {
    let luma = vec![117u8; 64 * 48];
    assert_eq!(plane_energy(&luma, 64, 64, 48), 0);
    assert_eq!(per_pixel(0, 50, 64, 48), 0.0);
}

#[test]
fn energy_matches_brute_force_reference() {
    let (width, height) = (37, 23);
    let mut state = 0x5eed_u64;
    let luma: Vec<u8> = (0..width * height).map(|_| splitmix(&mut state) as u8).collect();
    assert_eq!(
        plane_energy(&luma, width, width, height),
        reference_energy(&luma, width, height),
    );
}

#[test]
fn energy_honors_stride_padding() {
    let (width, height, stride) = (16, 12, 24);
    let mut state = 7_u64;
    let mut padded = vec![0u8; stride * height];
    let mut packed = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let v = splitmix(&mut state) as u8;
            padded[y * stride + x] = v;
            packed[y * width + x] = v;
        }
    }
    assert_eq!(
        plane_energy(&padded, stride, width, height),
        plane_energy(&packed, width, width, height),
    );
}

#[test]
fn tiny_planes_produce_no_energy() {
    let luma = vec![200u8; 4 * 4];
    assert_eq!(plane_energy(&luma, 4, 4, 4), 0);
}

#[test]
fn aq_strength_clamps_both_ends() {
    assert!((aq_strength(0.0) - 1.5).abs() < 1e-9);
    assert!((aq_strength(0.1) - 1.5).abs() < 1e-9);
    assert!((aq_strength(0.8) - 1.0).abs() < 1e-9);
    assert!((aq_strength(3.0) - 1.0).abs() < 1e-9);
}

#[test]
fn unsharpen_hint_clamps_both_ends() {
    assert!((unsharpen_hint(0.0) - 0.6).abs() < 1e-9);
    assert!((unsharpen_hint(0.1) - 0.6).abs() < 1e-9);
    assert!((unsharpen_hint(0.8) - 0.8).abs() < 1e-9);
    assert!((unsharpen_hint(2.0) - 0.8).abs() < 1e-9);
}
