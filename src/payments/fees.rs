use crate::config::FeeConfig;

/// Snapshot of the processing-fee policy. Captured onto the transaction row
/// at intent-creation time, so later policy changes never rewrite history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeePolicy {
    pub enabled: bool,
    /// Provider percentage, e.g. 2.9 for 2.9%.
    pub percent: f64,
    /// Provider flat fee in minor currency units.
    pub flat_cents: i64,
    pub refundable: bool,
}

impl FeePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            percent: 0.0,
            flat_cents: 0,
            refundable: false,
        }
    }

    /// Fee to add on top of `base_minor_units` so the recipient is made
    /// whole after the provider deducts its percentage + flat fee from the
    /// grossed-up total:
    ///
    ///   total = (base + flat) / (1 - percent)
    ///   fee   = ceil(total) - base
    ///
    /// Charging `base + base*p + flat` instead would under-collect, because
    /// the provider's percentage applies to the total charged, not the
    /// base. Rounding up means the payer overpays by at most one minor
    /// unit; the recipient never receives less than `base`.
    pub fn calculate(&self, base_minor_units: i64) -> i64 {
        if !self.enabled {
            return 0;
        }

        let rate = self.percent / 100.0;
        let total = (base_minor_units as f64 + self.flat_cents as f64) / (1.0 - rate);
        total.ceil() as i64 - base_minor_units
    }

    pub fn total_with_fee(&self, base_minor_units: i64) -> i64 {
        base_minor_units + self.calculate(base_minor_units)
    }
}

impl From<&FeeConfig> for FeePolicy {
    fn from(config: &FeeConfig) -> Self {
        Self {
            enabled: config.enabled,
            percent: config.percent,
            flat_cents: config.flat_cents,
            refundable: config.refundable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe_standard() -> FeePolicy {
        FeePolicy {
            enabled: true,
            percent: 2.9,
            flat_cents: 30,
            refundable: false,
        }
    }

    #[test]
    fn gross_up_makes_recipient_whole() {
        let policy = stripe_standard();

        let fee = policy.calculate(10_000);
        assert_eq!(fee, 330);
        assert_eq!(policy.total_with_fee(10_000), 10_330);
    }

    #[test]
    fn gross_up_larger_base() {
        let policy = stripe_standard();

        let fee = policy.calculate(15_000);
        assert_eq!(fee, 479);
        assert_eq!(policy.total_with_fee(15_000), 15_479);
    }

    #[test]
    fn disabled_policy_charges_nothing() {
        let policy = FeePolicy::disabled();

        assert_eq!(policy.calculate(0), 0);
        assert_eq!(policy.calculate(10_000), 0);
        assert_eq!(policy.calculate(i64::MAX / 2), 0);
    }

    #[test]
    fn zero_base_still_grosses_up_the_flat_fee() {
        let policy = stripe_standard();

        // ceil(30 / 0.971) = 31
        assert_eq!(policy.calculate(0), 31);
    }

    #[test]
    fn recipient_never_shorted_across_amounts() {
        let policy = stripe_standard();
        let rate = policy.percent / 100.0;

        for base in [1i64, 99, 100, 2_500, 9_999, 10_000, 123_457, 1_000_000] {
            let total = policy.total_with_fee(base);
            let deducted = total as f64 * rate + policy.flat_cents as f64;
            let received = total as f64 - deducted;

            assert!(
                received >= base as f64,
                "base {} shorted: received {:.4}",
                base,
                received
            );
            // The payer's overshoot stays below one minor unit of headroom
            // past the exact split.
            assert!(
                received < base as f64 + 1.0,
                "base {} overcharged: received {:.4}",
                base,
                received
            );
        }
    }
}
