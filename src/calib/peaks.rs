//! Peak detection on a 1-D signal.
//!
//! Local maxima are selected by height, minimum separation and minimum
//! prominence. Prominences are then re-evaluated in a finite window and
//! the peak widths are measured at the base of each peak, which is what
//! the line fits use to size their windows.

use serde::Serialize;

use crate::error::{CalibError, Result};

/// A detected peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    /// Sample index of the maximum.
    pub index: usize,
    pub height: f64,
    /// Prominence evaluated in the `wlen` window.
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
    /// Left/right crossing of the base level, rounded to the nearest sample.
    pub left: usize,
    pub right: usize,
    /// Width at the base, interpolated.
    pub width: f64,
}

/// Indices of local maxima. Flat tops report their midpoint (rounded down).
pub fn local_maxima(y: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if y.len() < 3 {
        return peaks;
    }
    let i_max = y.len() - 1;
    let mut i = 1;
    while i < i_max {
        if y[i - 1] < y[i] {
            let mut ahead = i + 1;
            while ahead < i_max && y[ahead] == y[i] {
                ahead += 1;
            }
            if y[ahead] < y[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Keep-mask after enforcing a minimum separation, highest peaks first.
fn select_by_distance(peaks: &[usize], heights: &[f64], distance: f64) -> Vec<bool> {
    let distance = distance.ceil().max(0.0) as usize;
    let mut keep = vec![true; peaks.len()];

    let mut priority: Vec<usize> = (0..peaks.len()).collect();
    priority.sort_by(|&a, &b| heights[a].total_cmp(&heights[b]));

    for &j in priority.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    keep
}

/// Prominence of the peak at `peak` and the indices of its left/right bases.
///
/// `wlen` limits the search to `peak ± wlen/2` (even values are rounded up
/// to the next odd length); `None` searches the whole signal.
pub fn prominence(y: &[f64], peak: usize, wlen: Option<usize>) -> (f64, usize, usize) {
    let mut i_min = 0;
    let mut i_max = y.len() - 1;
    if let Some(w) = wlen.filter(|&w| w >= 2) {
        let half = (w | 1) / 2;
        i_min = peak.saturating_sub(half);
        i_max = (peak + half).min(i_max);
    }

    let top = y[peak];

    let mut left_base = peak;
    let mut left_min = top;
    let mut i = peak as isize;
    while i >= i_min as isize && y[i as usize] <= top {
        if y[i as usize] < left_min {
            left_min = y[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let mut right_base = peak;
    let mut right_min = top;
    let mut i = peak;
    while i <= i_max && y[i] <= top {
        if y[i] < right_min {
            right_min = y[i];
            right_base = i;
        }
        i += 1;
    }

    (top - left_min.max(right_min), left_base, right_base)
}

/// Width of a peak at `rel_height` of its prominence below the top.
///
/// Returns `(width, left_ip, right_ip)` with interpolated crossing positions.
pub fn width(
    y: &[f64],
    peak: usize,
    prominence: f64,
    left_base: usize,
    right_base: usize,
    rel_height: f64,
) -> (f64, f64, f64) {
    let height = y[peak] - prominence * rel_height;

    let mut i = peak;
    while left_base < i && height < y[i] {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if y[i] < height {
        left_ip += (height - y[i]) / (y[i + 1] - y[i]);
    }

    let mut i = peak;
    while i < right_base && height < y[i] {
        i += 1;
    }
    let mut right_ip = i as f64;
    if y[i] < height {
        right_ip -= (height - y[i]) / (y[i - 1] - y[i]);
    }

    (right_ip - left_ip, left_ip, right_ip)
}

/// Find peaks with non-negative height, at least `distance` samples apart
/// and at least `min_prominence` prominent. Widths are measured at the base
/// using prominences re-evaluated in a `wlen` window.
pub fn find_peaks(y: &[f64], distance: f64, min_prominence: f64, wlen: usize) -> Vec<Peak> {
    let candidates: Vec<usize> = local_maxima(y)
        .into_iter()
        .filter(|&p| y[p] >= 0.0)
        .collect();

    let heights: Vec<f64> = candidates.iter().map(|&p| y[p]).collect();
    let keep = select_by_distance(&candidates, &heights, distance);

    candidates
        .iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(&p, _)| p)
        .filter(|&p| prominence(y, p, None).0 >= min_prominence)
        .map(|p| {
            let (prom, left_base, right_base) = prominence(y, p, Some(wlen));
            let (w, left_ip, right_ip) = width(y, p, prom, left_base, right_base, 1.0);
            Peak {
                index: p,
                height: y[p],
                prominence: prom,
                left_base,
                right_base,
                left: left_ip.round_ties_even().max(0.0) as usize,
                right: right_ip.round_ties_even().max(0.0) as usize,
                width: w,
            }
        })
        .collect()
}

/// Index ranges `[start, end)` around each peak used as fit windows.
///
/// Without an explicit `size`, the window is the mean separation between
/// consecutive peaks (truncated). Ranges are clipped to `len`. Peaks must
/// be in increasing order, as `find_peaks` returns them.
pub fn peak_index_ranges(
    peaks: &[usize],
    size: Option<usize>,
    len: usize,
) -> Result<Vec<(usize, usize)>> {
    if peaks.windows(2).any(|w| w[1] < w[0]) {
        return Err(CalibError::InvalidArgument(
            "peak locations must be sorted".to_string(),
        ));
    }
    let size = match size {
        Some(s) => s as f64,
        None => {
            if peaks.len() < 2 {
                return Err(CalibError::TooFewPoints {
                    needed: 2,
                    got: peaks.len(),
                });
            }
            let span = (peaks[peaks.len() - 1] - peaks[0]) as f64;
            (span / (peaks.len() - 1) as f64).trunc()
        }
    };

    Ok(peaks
        .iter()
        .map(|&p| {
            let start = (p as f64 - size / 2.0).trunc().max(0.0) as usize;
            let end = ((p as f64 + size / 2.0).trunc() as usize).min(len);
            (start.min(end), end)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comb(n: usize, spacing: usize, sigma: f64) -> Vec<f64> {
        let len = n * spacing + spacing;
        (0..len)
            .map(|i| {
                (1..=n)
                    .map(|k| {
                        let d = i as f64 - (k * spacing) as f64;
                        (-d * d / (2.0 * sigma * sigma)).exp()
                    })
                    .sum::<f64>()
            })
            .collect()
    }

    #[test]
    fn test_local_maxima_plateau_midpoint() {
        let y = [0.0, 1.0, 2.0, 2.0, 2.0, 1.0, 0.0, 3.0, 0.0];
        assert_eq!(local_maxima(&y), vec![3, 7]);
    }

    #[test]
    fn test_edges_are_not_peaks() {
        let y = [5.0, 1.0, 0.0, 1.0, 5.0];
        assert!(local_maxima(&y).is_empty());
        // Plateau running into the last sample is not a peak either.
        let y = [0.0, 1.0, 1.0, 1.0];
        assert!(local_maxima(&y).is_empty());
    }

    #[test]
    fn test_distance_keeps_highest() {
        let y = [0.0, 1.0, 0.0, 2.0, 0.0, 1.5, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let peaks = find_peaks(&y, 3.0, 0.0, 20);
        let idx: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![3, 10]);
    }

    #[test]
    fn test_prominence_filter() {
        let y = [0.0, 1.0, 0.9, 0.95, 0.0, 0.5, 0.0];
        // Peak at 3 rises only 0.05 above the saddle at 2.
        let (prom, left_base, right_base) = prominence(&y, 3, None);
        assert!((prom - 0.05).abs() < 1e-12);
        assert_eq!(left_base, 2);
        assert_eq!(right_base, 4);

        let peaks = find_peaks(&y, 1.0, 0.15, 20);
        let idx: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![1, 5]);
    }

    #[test]
    fn test_negative_peaks_rejected() {
        let y = [-3.0, -1.0, -3.0, 0.0, 1.0, 0.0];
        let peaks = find_peaks(&y, 1.0, 0.0, 20);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 4);
    }

    #[test]
    fn test_width_at_base_of_triangle() {
        let y = [0.0, 0.0, 1.0, 2.0, 1.0, 0.0, 0.0];
        let peaks = find_peaks(&y, 1.0, 0.5, 20);
        assert_eq!(peaks.len(), 1);
        let p = peaks[0];
        assert_eq!(p.index, 3);
        assert!((p.prominence - 2.0).abs() < 1e-12);
        assert!((p.width - 4.0).abs() < 1e-12);
        assert_eq!((p.left, p.right), (1, 5));
    }

    #[test]
    fn test_comb_detection() {
        let y = comb(20, 14, 1.8);
        let peaks = find_peaks(&y, 11.0, 0.15, 20);
        assert_eq!(peaks.len(), 20);
        for (k, p) in peaks.iter().enumerate() {
            assert_eq!(p.index, (k + 1) * 14);
        }
    }

    #[test]
    fn test_index_ranges_default_size() {
        let ranges = peak_index_ranges(&[10, 24, 38], None, 45).unwrap();
        assert_eq!(ranges, vec![(3, 17), (17, 31), (31, 45)]);
    }

    #[test]
    fn test_index_ranges_clipped() {
        let ranges = peak_index_ranges(&[2, 50], Some(10), 53).unwrap();
        assert_eq!(ranges, vec![(0, 7), (45, 53)]);
    }

    #[test]
    fn test_index_ranges_need_two_peaks() {
        assert!(peak_index_ranges(&[5], None, 10).is_err());
        assert!(peak_index_ranges(&[5], Some(4), 10).is_ok());
    }

    #[test]
    fn test_unsorted_peak_ranges_rejected() {
        let err = peak_index_ranges(&[50, 10, 30], None, 100).unwrap_err();
        assert!(matches!(err, CalibError::InvalidArgument(_)));
        assert!(peak_index_ranges(&[10, 30, 50], None, 100).is_ok());
    }
}
