//! Property tests over the pure counter arithmetic. No database required.

use proptest::prelude::*;
use stockflow_api::services::inventory::{classify_stock, StockStatus};
use stockflow_api::services::stock_ledger::{apply_adjustment, check_invariants};

proptest! {
    /// Whatever adjustment is accepted, the resulting counters satisfy the
    /// ledger invariants.
    #[test]
    fn accepted_adjustments_preserve_invariants(
        on_hand in 0i32..1_000_000,
        reserved_frac in 0i32..1_000_000,
        delta in -1_000_000i32..1_000_000,
    ) {
        let reserved = reserved_frac.min(on_hand);
        if let Some(adjusted) = apply_adjustment(on_hand, reserved, delta) {
            prop_assert!(check_invariants(adjusted.on_hand, adjusted.reserved).is_ok());
            prop_assert_eq!(adjusted.on_hand, on_hand + delta);
        }
    }

    /// An adjustment is rejected exactly when it would push on-hand negative.
    #[test]
    fn rejection_means_negative_result(
        on_hand in 0i32..1_000_000,
        delta in -1_000_000i32..1_000_000,
    ) {
        let accepted = apply_adjustment(on_hand, 0, delta).is_some();
        prop_assert_eq!(accepted, on_hand + delta >= 0);
    }

    /// Reserved is clipped exactly when the new on-hand dips below it, and
    /// never changes otherwise.
    #[test]
    fn clipping_is_tight(
        on_hand in 0i32..1_000_000,
        reserved_frac in 0i32..1_000_000,
        delta in -1_000_000i32..1_000_000,
    ) {
        let reserved = reserved_frac.min(on_hand);
        if let Some(adjusted) = apply_adjustment(on_hand, reserved, delta) {
            if adjusted.clipped {
                prop_assert_eq!(adjusted.reserved, adjusted.on_hand);
                prop_assert!(reserved > adjusted.on_hand);
            } else {
                prop_assert_eq!(adjusted.reserved, reserved);
            }
        }
    }

    /// A positive adjustment followed by its negation is a no-op on the
    /// counters (the receive/adjust symmetry law).
    #[test]
    fn adjustment_round_trip_is_identity(
        on_hand in 0i32..1_000_000,
        reserved_frac in 0i32..1_000_000,
        delta in 1i32..1_000_000,
    ) {
        let reserved = reserved_frac.min(on_hand);
        let up = apply_adjustment(on_hand, reserved, delta).unwrap();
        let down = apply_adjustment(up.on_hand, up.reserved, -delta).unwrap();
        prop_assert_eq!(down.on_hand, on_hand);
        prop_assert_eq!(down.reserved, reserved);
    }

    /// Stock classification is total and consistent with its thresholds.
    #[test]
    fn classification_matches_thresholds(
        on_hand in 0i32..1_000_000,
        reorder_level in 0i32..1_000_000,
    ) {
        let status = classify_stock(on_hand, reorder_level);
        match status {
            StockStatus::OutOfStock => prop_assert_eq!(on_hand, 0),
            StockStatus::LowStock => {
                prop_assert!(on_hand > 0);
                prop_assert!(reorder_level > 0 && on_hand <= reorder_level);
            }
            StockStatus::InStock => {
                prop_assert!(on_hand > 0);
                prop_assert!(reorder_level == 0 || on_hand > reorder_level);
            }
        }
    }
}
