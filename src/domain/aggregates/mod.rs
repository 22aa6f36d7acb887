//! Aggregates module
pub mod discount;
pub mod order;
pub mod product;
pub mod refund;
pub mod transaction;
pub mod wallet;

pub use discount::{DiscountKind, DiscountRule, DiscountSource, Ineligible, Promotion, Voucher, VoucherScope};
pub use order::{AppliedDiscount, Order, OrderItem, OrderStatus, Party};
pub use product::{ProductCondition, ProductDetail, Shop};
pub use refund::{Refund, RefundThread};
pub use transaction::{PaymentMethod, Transaction, TransactionStatus};
pub use wallet::{Wallet, WalletHistory};
