use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::PricingConfig;
use crate::models::OrderItem;

/// Money values are kept at two decimal places, rounding half away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
}

impl PriceBreakdown {
    pub fn gross_total(&self) -> Decimal {
        self.items_price + self.tax_price + self.shipping_price
    }
}

/// Prices a cart snapshot: subtotal, tax on the subtotal, and flat shipping
/// waived at or above the free-shipping threshold.
pub fn price_items(items: &[OrderItem], pricing: &PricingConfig) -> PriceBreakdown {
    let items_price = round_money(items.iter().map(OrderItem::line_total).sum());

    let shipping_price = match pricing.free_shipping_threshold {
        Some(threshold) if items_price >= threshold => Decimal::ZERO,
        _ => round_money(pricing.shipping_price),
    };

    PriceBreakdown {
        items_price,
        tax_price: round_money(items_price * pricing.tax_rate),
        shipping_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn item(quantity: i32, unit_price: Decimal) -> OrderItem {
        OrderItem {
            product_id: Uuid::new_v4(),
            name: "Item".into(),
            image: None,
            quantity,
            unit_price,
        }
    }

    #[test]
    fn default_pricing_matches_checkout_example() {
        let breakdown = price_items(&[item(2, dec!(50000))], &PricingConfig::default());
        assert_eq!(breakdown.items_price, dec!(100000));
        assert_eq!(breakdown.tax_price, dec!(10000));
        assert_eq!(breakdown.shipping_price, dec!(30000));
        assert_eq!(breakdown.gross_total(), dec!(140000));
    }

    #[test]
    fn shipping_is_free_at_threshold() {
        let breakdown = price_items(&[item(1, dec!(1000000))], &PricingConfig::default());
        assert_eq!(breakdown.shipping_price, Decimal::ZERO);
    }

    #[test]
    fn no_threshold_always_charges_shipping() {
        let pricing = PricingConfig {
            free_shipping_threshold: None,
            ..PricingConfig::default()
        };
        let breakdown = price_items(&[item(10, dec!(1000000))], &pricing);
        assert_eq!(breakdown.shipping_price, dec!(30000));
    }

    #[test]
    fn tax_rounds_to_cents() {
        let pricing = PricingConfig {
            tax_rate: dec!(0.075),
            ..PricingConfig::default()
        };
        let breakdown = price_items(&[item(1, dec!(10.10))], &pricing);
        // 10.10 * 0.075 = 0.7575
        assert_eq!(breakdown.tax_price, dec!(0.76));
    }

    #[test]
    fn round_money_goes_away_from_zero_at_midpoint() {
        assert_eq!(round_money(dec!(1.005)), dec!(1.01));
        assert_eq!(round_money(dec!(1.004)), dec!(1.00));
    }
}
