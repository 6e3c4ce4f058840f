pub mod coupon;
pub mod order;
pub mod payment;
pub mod product;

pub use coupon::{normalize_code, Coupon, DiscountType};
pub use order::{
    Order, OrderItem, OrderStatus, PaymentMethod, PaymentResult, PaymentStatus, ShippingAddress,
};
pub use payment::{Payment, PaymentRecordStatus};
pub use product::Product;
