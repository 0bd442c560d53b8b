//! Bounded sampling and id generation helpers

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

/// Uniform sample in `[min, max]`. Swapped bounds are tolerated; non-finite
/// bounds yield 0.
pub fn in_range(min: f64, max: f64) -> f64 {
    if !(min.is_finite() && max.is_finite()) {
        return 0.0;
    }
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    if lo == hi {
        return lo;
    }
    rand::thread_rng().gen_range(lo..=hi)
}

/// Pick one element at random, as a fresh shuffle-and-take-first would.
pub fn pick<T: Clone>(items: &[T]) -> Option<T> {
    items.choose(&mut rand::thread_rng()).cloned()
}

/// Return the elements in a fresh random order.
pub fn shuffled<T>(mut items: Vec<T>) -> Vec<T> {
    items.shuffle(&mut rand::thread_rng());
    items
}

/// Short unique id with a prefix, e.g. `msg_1f9a63c40d2b`.
pub fn short_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &uuid[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_stays_inside_bounds() {
        for _ in 0..100 {
            let v = in_range(11.0, 22.0);
            assert!((11.0..=22.0).contains(&v));
        }
    }

    #[test]
    fn in_range_tolerates_swapped_and_equal_bounds() {
        for _ in 0..10 {
            let v = in_range(22.0, 11.0);
            assert!((11.0..=22.0).contains(&v));
        }
        assert_eq!(in_range(5.0, 5.0), 5.0);
    }

    #[test]
    fn in_range_survives_non_finite_bounds() {
        assert_eq!(in_range(f64::NAN, 10.0), 0.0);
        assert_eq!(in_range(0.0, f64::INFINITY), 0.0);
    }

    #[test]
    fn pick_from_empty_is_none() {
        assert_eq!(pick::<String>(&[]), None);
        assert_eq!(pick(&[7]), Some(7));
    }

    #[test]
    fn short_ids_are_prefixed_and_distinct() {
        let a = short_id("msg");
        let b = short_id("msg");
        assert!(a.starts_with("msg_"));
        assert_ne!(a, b);
    }
}
