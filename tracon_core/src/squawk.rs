//! Automatic beacon code assignment.

use crate::error::AtcError;
use crate::model::{Aircraft, Controller, FlightRules, Squawk};
use rand::Rng;
use std::collections::HashSet;

/// Picks a code in `[low, high)` that is not in `in_use`.
///
/// Probing starts at a random offset and walks the range linearly, so
/// codes are spread out but exhaustion is detected in one pass.
pub fn allocate<R: Rng + ?Sized>(
    low: Squawk,
    high: Squawk,
    in_use: &HashSet<Squawk>,
    rng: &mut R,
) -> Result<Squawk, AtcError> {
    if low >= high {
        return Err(AtcError::NoSquawkRange);
    }

    let n = high.0 - low.0;
    let offset = rng.gen_range(0..n);
    (0..n)
        .map(|i| Squawk(low.0 + (i + offset) % n))
        .find(|code| !in_use.contains(code))
        .ok_or(AtcError::NoFreeSquawk { low, high })
}

/// Chooses an automatic code for `ac` from `controller`'s range.
///
/// `in_use` holds the assigned codes of every aircraft in the session.
pub fn automatic_code<R: Rng + ?Sized>(
    ac: &Aircraft,
    controller: Option<&Controller>,
    in_use: &HashSet<Squawk>,
    rng: &mut R,
) -> Result<Squawk, AtcError> {
    let plan = ac.flight_plan.as_ref().ok_or(AtcError::NoFlightPlanFiled)?;
    if plan.rules != FlightRules::Ifr {
        return Err(AtcError::NonIfrSquawk);
    }
    let controller = controller.ok_or(AtcError::NoSquawkRange)?;
    allocate(controller.low_squawk, controller.high_squawk, in_use, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimTime;
    use crate::model::FlightPlan;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_degenerate_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = allocate(Squawk(0o4201), Squawk(0o4201), &HashSet::new(), &mut rng);
        assert_eq!(err, Err(AtcError::NoSquawkRange));
    }

    #[test]
    fn test_exhaustion_and_last_free_code() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let low = Squawk(0o4201);
        let high = Squawk(0o4205);
        let mut in_use: HashSet<Squawk> = (low.0..high.0).map(Squawk).collect();

        assert_eq!(
            allocate(low, high, &in_use, &mut rng),
            Err(AtcError::NoFreeSquawk { low, high })
        );

        in_use.remove(&Squawk(0o4203));
        for _ in 0..20 {
            assert_eq!(allocate(low, high, &in_use, &mut rng), Ok(Squawk(0o4203)));
        }
    }

    #[test]
    fn test_automatic_code_requires_ifr_plan() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut ctrl = Controller::new("SEA_APP");
        ctrl.low_squawk = Squawk(0o4201);
        ctrl.high_squawk = Squawk(0o4277);

        let mut ac = Aircraft::new("N123AB", SimTime::ZERO);
        let none = HashSet::new();
        assert_eq!(
            automatic_code(&ac, Some(&ctrl), &none, &mut rng),
            Err(AtcError::NoFlightPlanFiled)
        );

        ac.flight_plan = Some(FlightPlan {
            rules: FlightRules::Vfr,
            ..Default::default()
        });
        assert_eq!(automatic_code(&ac, Some(&ctrl), &none, &mut rng), Err(AtcError::NonIfrSquawk));

        if let Some(fp) = ac.flight_plan.as_mut() {
            fp.rules = FlightRules::Ifr;
        }
        let code = automatic_code(&ac, Some(&ctrl), &none, &mut rng).unwrap();
        assert!(code >= ctrl.low_squawk && code < ctrl.high_squawk);
        assert_eq!(automatic_code(&ac, None, &none, &mut rng), Err(AtcError::NoSquawkRange));
    }

    proptest! {
        #[test]
        fn test_allocation_stays_in_range(low in 0u16..0o7000, span in 1u16..64, seed in any::<u64>(), used in proptest::collection::hash_set(0u16..0o7777, 0..32)) {
            let high = low + span;
            let in_use: HashSet<Squawk> = used.into_iter().map(Squawk).collect();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);

            match allocate(Squawk(low), Squawk(high), &in_use, &mut rng) {
                Ok(code) => {
                    prop_assert!(code.0 >= low && code.0 < high);
                    prop_assert!(!in_use.contains(&code));
                }
                Err(_) => {
                    prop_assert!((low..high).all(|c| in_use.contains(&Squawk(c))));
                }
            }
        }
    }
}
