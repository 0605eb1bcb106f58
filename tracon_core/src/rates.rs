//! Traffic rate tables and the random intervals derived from them.

use crate::clock::SimTime;
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;

/// Airport to runway to departure category to aircraft per hour.
pub type DepartureRates = BTreeMap<String, BTreeMap<String, BTreeMap<String, u32>>>;

/// Arrival group to destination airport to aircraft per hour.
pub type ArrivalRates = BTreeMap<String, BTreeMap<String, u32>>;

/// Individual intervals stay within this fraction of the average.
pub const INTERVAL_JITTER: f64 = 0.15;

/// A key with no traffic waits this long before being looked at again.
pub const DISABLED_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Weighted reservoir sampling over a rate map.
///
/// Walks the candidates once, keeping the running rate sum, and replaces
/// the held item with probability `rate / sum`. Each candidate ends up
/// selected with probability proportional to its rate. Returns the
/// selection (`None` if every rate is zero) and the total rate.
pub fn sample_rate_map<'a, K: Ord, R: Rng + ?Sized>(
    rates: &'a BTreeMap<K, u32>,
    rng: &mut R,
) -> (Option<&'a K>, u32) {
    let mut selected = None;
    let mut sum = 0u32;
    for (item, &rate) in rates {
        sum = sum.saturating_add(rate);
        if rate > 0 && rng.gen::<f64>() < f64::from(rate) / f64::from(sum) {
            selected = Some(item);
        }
    }
    (selected, sum)
}

/// Total rate of a table, saturating at `u32::MAX`.
pub fn rate_sum<K>(rates: &BTreeMap<K, u32>) -> u32 {
    rates.values().fold(0u32, |sum, &rate| sum.saturating_add(rate))
}

/// Time until the next spawn for a key with `rate` aircraft per hour.
pub fn random_wait<R: Rng + ?Sized>(rate: u32, rng: &mut R) -> Duration {
    if rate == 0 {
        return DISABLED_INTERVAL;
    }
    let average = 3600.0 / f64::from(rate);
    let low = average * (1.0 - INTERVAL_JITTER);
    let high = average * (1.0 + INTERVAL_JITTER);
    Duration::from_secs_f64(rng.gen_range(low..=high))
}

/// First spawn time for a key, spread over one average interval around
/// `now` so that keys armed together do not fire together.
pub fn initial_spawn_time<R: Rng + ?Sized>(now: SimTime, rate: u32, rng: &mut R) -> SimTime {
    if rate == 0 {
        return now + DISABLED_INTERVAL;
    }
    let average = 3600.0 / f64::from(rate);
    let offset = rng.gen_range(0.0..average) - average / 2.0;
    SimTime::from_secs_f64(now.as_secs_f64() + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_reservoir_frequencies_follow_rates() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let rates: BTreeMap<&str, u32> = [("A", 10), ("B", 30)].into_iter().collect();

        let trials = 20_000;
        let mut a = 0;
        for _ in 0..trials {
            let (picked, sum) = sample_rate_map(&rates, &mut rng);
            assert_eq!(sum, 40);
            if picked == Some(&"A") {
                a += 1;
            }
        }
        let freq = a as f64 / trials as f64;
        assert!((freq - 0.25).abs() < 0.015, "frequency of A was {}", freq);
    }

    #[test]
    fn test_reservoir_all_zero() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let rates: BTreeMap<&str, u32> = [("A", 0), ("B", 0)].into_iter().collect();
        assert_eq!(sample_rate_map(&rates, &mut rng), (None, 0));

        let empty: BTreeMap<&str, u32> = BTreeMap::new();
        assert_eq!(sample_rate_map(&empty, &mut rng), (None, 0));
    }

    #[test]
    fn test_rate_sums_saturate() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let rates: BTreeMap<&str, u32> = [("A", u32::MAX), ("B", 10)].into_iter().collect();
        assert_eq!(rate_sum(&rates), u32::MAX);

        let (picked, sum) = sample_rate_map(&rates, &mut rng);
        assert_eq!(sum, u32::MAX);
        assert!(picked.is_some());
    }

    #[test]
    fn test_wait_for_thirty_per_hour() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let n = 5_000;
        let mut total = 0.0;
        for _ in 0..n {
            let wait = random_wait(30, &mut rng).as_secs_f64();
            assert!((102.0..=138.0).contains(&wait), "wait {}", wait);
            total += wait;
        }
        let mean = total / n as f64;
        assert!((mean - 120.0).abs() < 1.0, "mean {}", mean);
    }

    #[test]
    fn test_zero_rate_disables() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        assert_eq!(random_wait(0, &mut rng), DISABLED_INTERVAL);
        let first = initial_spawn_time(SimTime::from_secs(10), 0, &mut rng);
        assert!(first.since(SimTime::from_secs(10)) >= Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_initial_spawn_saturates() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..100 {
            let t = initial_spawn_time(SimTime::ZERO, 20, &mut rng);
            assert!(t <= SimTime::from_secs(90));
        }
    }

    proptest! {
        #[test]
        fn test_reservoir_never_picks_zero_rate(rates in proptest::collection::btree_map("[A-Z]{4}", 0u32..5, 1..8), seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let (picked, sum) = sample_rate_map(&rates, &mut rng);
            prop_assert_eq!(sum, rates.values().sum::<u32>());
            match picked {
                Some(key) => prop_assert!(rates[key] > 0),
                None => prop_assert_eq!(sum, 0),
            }
        }
    }
}
