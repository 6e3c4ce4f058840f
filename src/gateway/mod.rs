//! Redirect payment gateway integration (VNPay-style protocol).
//!
//! Pure functions only: building the signed payment URL and verifying the
//! parameters the gateway sends back. Order state changes live in
//! [`crate::services::payments`].

pub mod codec;

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::Deserialize;
use std::fmt;
use uuid::Uuid;

use crate::errors::ServiceError;
pub use codec::{
    build_signable_string, canonicalize, encode_component, sign, verify, CanonicalParams,
};

pub const PARAM_VERSION: &str = "vnp_Version";
pub const PARAM_COMMAND: &str = "vnp_Command";
pub const PARAM_TMN_CODE: &str = "vnp_TmnCode";
pub const PARAM_LOCALE: &str = "vnp_Locale";
pub const PARAM_CURR_CODE: &str = "vnp_CurrCode";
pub const PARAM_TXN_REF: &str = "vnp_TxnRef";
pub const PARAM_ORDER_INFO: &str = "vnp_OrderInfo";
pub const PARAM_ORDER_TYPE: &str = "vnp_OrderType";
pub const PARAM_AMOUNT: &str = "vnp_Amount";
pub const PARAM_RETURN_URL: &str = "vnp_ReturnUrl";
pub const PARAM_IP_ADDR: &str = "vnp_IpAddr";
pub const PARAM_CREATE_DATE: &str = "vnp_CreateDate";
pub const PARAM_BANK_CODE: &str = "vnp_BankCode";
pub const PARAM_TRANSACTION_NO: &str = "vnp_TransactionNo";
pub const PARAM_RESPONSE_CODE: &str = "vnp_ResponseCode";
pub const PARAM_TRANSACTION_STATUS: &str = "vnp_TransactionStatus";
pub const PARAM_PAY_DATE: &str = "vnp_PayDate";
pub const PARAM_SECURE_HASH: &str = "vnp_SecureHash";
pub const PARAM_SECURE_HASH_TYPE: &str = "vnp_SecureHashType";

pub const RESPONSE_CODE_SUCCESS: &str = "00";
pub const ORDER_INFO_PREFIX: &str = "ORDER:";

/// Gateway amounts are integer currency units multiplied by this factor
pub const AMOUNT_MULTIPLIER: i64 = 100;

const GATEWAY_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Merchant credentials and endpoints for the payment gateway
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Merchant (terminal) code issued by the gateway
    #[serde(default)]
    pub tmn_code: String,
    /// Shared HMAC secret
    #[serde(default)]
    pub hash_secret: String,
    /// Gateway payment page
    #[serde(default = "default_payment_url")]
    pub payment_url: String,
    /// Where the gateway sends the browser back to
    #[serde(default = "default_return_url")]
    pub return_url: String,
    /// Storefront page shown after a successful payment
    #[serde(default = "default_success_redirect_url")]
    pub success_redirect_url: String,
    /// Storefront page shown after a failed or rejected payment
    #[serde(default = "default_failure_redirect_url")]
    pub failure_redirect_url: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_currency_code")]
    pub currency_code: String,
    #[serde(default = "default_order_type")]
    pub order_type: String,
    /// Offset of the gateway's wall clock from UTC, in minutes
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("tmn_code", &self.tmn_code)
            .field("hash_secret", &"<redacted>")
            .field("payment_url", &self.payment_url)
            .field("return_url", &self.return_url)
            .field("success_redirect_url", &self.success_redirect_url)
            .field("failure_redirect_url", &self.failure_redirect_url)
            .field("version", &self.version)
            .field("utc_offset_minutes", &self.utc_offset_minutes)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tmn_code: String::new(),
            hash_secret: String::new(),
            payment_url: default_payment_url(),
            return_url: default_return_url(),
            success_redirect_url: default_success_redirect_url(),
            failure_redirect_url: default_failure_redirect_url(),
            version: default_version(),
            command: default_command(),
            locale: default_locale(),
            currency_code: default_currency_code(),
            order_type: default_order_type(),
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

fn default_payment_url() -> String {
    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
}
fn default_return_url() -> String {
    "http://localhost:8080/api/v1/payments/gateway/return".to_string()
}
fn default_success_redirect_url() -> String {
    "http://localhost:3000/payment/success".to_string()
}
fn default_failure_redirect_url() -> String {
    "http://localhost:3000/payment/failure".to_string()
}
fn default_version() -> String {
    "2.1.0".to_string()
}
fn default_command() -> String {
    "pay".to_string()
}
fn default_locale() -> String {
    "vn".to_string()
}
fn default_currency_code() -> String {
    "VND".to_string()
}
fn default_order_type() -> String {
    "other".to_string()
}
fn default_utc_offset_minutes() -> i32 {
    7 * 60
}

/// Input for a single payment attempt
#[derive(Debug, Clone)]
pub struct PaymentUrlRequest {
    pub order_id: Uuid,
    /// Whole currency units, already rounded
    pub amount: i64,
    pub txn_ref: String,
    pub client_ip: String,
    pub created_at: DateTime<Utc>,
}

/// Rounds an order total half away from zero to whole currency units.
/// Gateways reject zero and negative amounts.
pub fn gateway_amount(total: Decimal) -> Result<i64, ServiceError> {
    let rounded = total.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    match rounded.to_i64() {
        Some(amount) if amount > 0 => Ok(amount),
        _ => Err(ServiceError::GatewayAmountInvalid(format!(
            "order total {total} cannot be charged"
        ))),
    }
}

/// Per-attempt transaction reference: timestamp with millisecond precision
/// followed by the order id, so retries of one order never collide.
pub fn txn_ref(now: DateTime<Utc>, order_id: Uuid) -> String {
    format!("{}{}", now.format("%y%m%d%H%M%S%3f"), order_id.simple())
}

pub fn order_info(order_id: Uuid) -> String {
    format!("{ORDER_INFO_PREFIX}{order_id}")
}

/// Extracts the order id from an `ORDER:<uuid>` order-info value
pub fn parse_order_info(value: &str) -> Option<Uuid> {
    value
        .trim()
        .strip_prefix(ORDER_INFO_PREFIX)
        .and_then(|id| Uuid::parse_str(id.trim()).ok())
}

/// Formats `at` as `yyyyMMddHHmmss` on the gateway's wall clock
pub fn format_gateway_time(at: DateTime<Utc>, utc_offset_minutes: i32) -> Result<String, ServiceError> {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
        ServiceError::InternalError(format!("invalid gateway UTC offset {utc_offset_minutes}"))
    })?;
    Ok(at.with_timezone(&offset).format(GATEWAY_TIME_FORMAT).to_string())
}

/// Builds the signed redirect URL for one payment attempt
pub fn build_payment_url(
    request: &PaymentUrlRequest,
    config: &GatewayConfig,
) -> Result<String, ServiceError> {
    if request.amount <= 0 {
        return Err(ServiceError::GatewayAmountInvalid(request.amount.to_string()));
    }
    let gateway_units = request
        .amount
        .checked_mul(AMOUNT_MULTIPLIER)
        .ok_or_else(|| ServiceError::GatewayAmountInvalid(request.amount.to_string()))?;

    let params = canonicalize(vec![
        (PARAM_VERSION, config.version.clone()),
        (PARAM_COMMAND, config.command.clone()),
        (PARAM_TMN_CODE, config.tmn_code.clone()),
        (PARAM_LOCALE, config.locale.clone()),
        (PARAM_CURR_CODE, config.currency_code.clone()),
        (PARAM_TXN_REF, request.txn_ref.clone()),
        (PARAM_ORDER_INFO, order_info(request.order_id)),
        (PARAM_ORDER_TYPE, config.order_type.clone()),
        (PARAM_AMOUNT, gateway_units.to_string()),
        (PARAM_RETURN_URL, config.return_url.clone()),
        (PARAM_IP_ADDR, request.client_ip.clone()),
        (
            PARAM_CREATE_DATE,
            format_gateway_time(request.created_at, config.utc_offset_minutes)?,
        ),
    ]);

    let query = build_signable_string(&params);
    let secure_hash = sign(&query, &config.hash_secret)?;

    Ok(format!(
        "{}?{}&{}={}",
        config.payment_url, query, PARAM_SECURE_HASH, secure_hash
    ))
}

/// Verified callback parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReturn {
    pub params: CanonicalParams,
}

impl GatewayReturn {
    fn field(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    pub fn txn_ref(&self) -> Option<&str> {
        self.field(PARAM_TXN_REF)
    }

    pub fn order_info(&self) -> Option<&str> {
        self.field(PARAM_ORDER_INFO)
    }

    pub fn order_id(&self) -> Option<Uuid> {
        self.order_info().and_then(parse_order_info)
    }

    pub fn response_code(&self) -> &str {
        self.field(PARAM_RESPONSE_CODE).unwrap_or_default()
    }

    pub fn is_success(&self) -> bool {
        self.response_code() == RESPONSE_CODE_SUCCESS
            && self
                .field(PARAM_TRANSACTION_STATUS)
                .map_or(true, |status| status == RESPONSE_CODE_SUCCESS)
    }

    pub fn transaction_no(&self) -> Option<&str> {
        self.field(PARAM_TRANSACTION_NO)
    }

    pub fn bank_code(&self) -> Option<&str> {
        self.field(PARAM_BANK_CODE)
    }

    /// Amount in gateway units (currency units × 100)
    pub fn amount(&self) -> Option<i64> {
        self.field(PARAM_AMOUNT).and_then(|raw| raw.parse().ok())
    }
}

/// Strips the signature fields, re-canonicalizes the remainder and checks the
/// signature. Any problem with the signature is a [`ServiceError::SignatureMismatch`].
pub fn verify_return<I, K, V>(params: I, config: &GatewayConfig) -> Result<GatewayReturn, ServiceError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut provided_hash = None;
    let signed: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .filter_map(|(k, v)| {
            if k == PARAM_SECURE_HASH {
                provided_hash = Some(v);
                None
            } else if k == PARAM_SECURE_HASH_TYPE {
                None
            } else {
                Some((k, v))
            }
        })
        .collect();

    let provided_hash = provided_hash.ok_or(ServiceError::SignatureMismatch)?;
    let params = canonicalize(signed);
    let data = build_signable_string(&params);

    if !verify(&data, &config.hash_secret, &provided_hash) {
        return Err(ServiceError::SignatureMismatch);
    }

    Ok(GatewayReturn { params })
}
