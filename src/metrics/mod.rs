/*!
 * # Metrics Module
 *
 * Business counters for the checkout and settlement pipeline, exposed in
 * Prometheus text format at `/metrics`.
 */

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to export metrics: {0}")]
    ExportError(String),
}

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ORDERS_CREATED: IntCounter = IntCounter::new(
        "storefront_orders_created_total",
        "Total number of orders created"
    )
    .expect("metric can be created");
    pub static ref ORDERS_CANCELLED: IntCounter = IntCounter::new(
        "storefront_orders_cancelled_total",
        "Total number of orders cancelled"
    )
    .expect("metric can be created");
    pub static ref PAYMENTS_SETTLED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "storefront_payments_settled_total",
            "Total number of settled payments"
        ),
        &["method"]
    )
    .expect("metric can be created");
    pub static ref GATEWAY_RETURNS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "storefront_gateway_returns_total",
            "Gateway return and IPN callbacks by outcome"
        ),
        &["outcome"]
    )
    .expect("metric can be created");
    pub static ref GATEWAY_SIGNATURE_MISMATCHES: IntCounter = IntCounter::new(
        "storefront_gateway_signature_mismatches_total",
        "Gateway callbacks rejected for an invalid signature"
    )
    .expect("metric can be created");
    pub static ref COUPONS_APPLIED: IntCounter = IntCounter::new(
        "storefront_coupons_applied_total",
        "Total number of coupons applied to orders"
    )
    .expect("metric can be created");
}

/// Registers every collector with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ORDERS_CREATED.clone()),
        Box::new(ORDERS_CANCELLED.clone()),
        Box::new(PAYMENTS_SETTLED.clone()),
        Box::new(GATEWAY_RETURNS.clone()),
        Box::new(GATEWAY_SIGNATURE_MISMATCHES.clone()),
        Box::new(COUPONS_APPLIED.clone()),
    ];
    for collector in collectors {
        // AlreadyReg on repeated calls is expected
        let _ = REGISTRY.register(collector);
    }
}

/// Renders all registered metrics in Prometheus text format
pub fn render() -> Result<String, MetricsError> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| MetricsError::ExportError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MetricsError::ExportError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_output_contains_counters() {
        ORDERS_CREATED.inc();
        GATEWAY_RETURNS.with_label_values(&["settled"]).inc();
        let text = render().unwrap();
        assert!(text.contains("storefront_orders_created_total"));
        assert!(text.contains("storefront_gateway_returns_total{outcome=\"settled\"}"));
    }

    #[test]
    fn registration_is_idempotent() {
        register_metrics();
        register_metrics();
        assert!(render().is_ok());
    }
}
