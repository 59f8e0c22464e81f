//! Black/freeze merge on hand-built interval lists.

use mediascan::engine::timeline::{merge_blacks_and_freezes, reconcile_freezes};
use mediascan::types::Interval;

fn iv(start: f64, end: f64) -> Interval {
    Interval::new(start, end)
}

#[test]
fn test_black_inside_freeze_is_cut_out() {
    let out = merge_blacks_and_freezes(&[iv(2.0, 5.0)], &[iv(1.0, 6.0)], 30.0);
    assert_eq!(out, vec![iv(1.0, 2.0), iv(5.0, 6.0)]);
    assert!(!out.contains(&iv(2.0, 5.0)));
}

#[test]
fn test_freeze_without_black_passes_through() {
    let out = merge_blacks_and_freezes(&[iv(2.0, 5.0)], &[iv(1.0, 6.0), iv(10.0, 12.0)], 30.0);
    assert_eq!(out, vec![iv(1.0, 2.0), iv(5.0, 6.0), iv(10.0, 12.0)]);
}

#[test]
fn test_freeze_starting_at_black_end() {
    // Black end sorts before the freeze start at the same instant.
    let out = merge_blacks_and_freezes(&[iv(2.0, 5.0)], &[iv(5.0, 8.0)], 30.0);
    assert_eq!(out, vec![iv(5.0, 8.0)]);
}

#[test]
fn test_freeze_resumes_after_black_until_its_end() {
    let out = merge_blacks_and_freezes(&[iv(2.0, 4.0)], &[iv(1.0, 9.0)], 9.0);
    assert_eq!(out, vec![iv(1.0, 2.0), iv(4.0, 9.0)]);
}

#[test]
fn test_several_blacks_inside_one_freeze() {
    let out = merge_blacks_and_freezes(
        &[iv(2.0, 3.0), iv(5.0, 6.0)],
        &[iv(1.0, 8.0)],
        30.0,
    );
    assert_eq!(out, vec![iv(1.0, 2.0), iv(3.0, 5.0), iv(6.0, 8.0)]);
}

#[test]
fn test_reconcile_skips_merge_without_blacks() {
    let freezes = vec![iv(1.0, 6.0), iv(10.0, 12.0)];
    assert_eq!(reconcile_freezes(true, &[], freezes.clone(), 30.0), freezes);
}
