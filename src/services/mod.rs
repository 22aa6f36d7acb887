//! Application services.
//!
//! Every operation opens one unit of work, does all of its reads and writes
//! through it, commits, and only then hands its events to the notifier.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::notify::Notifier;
use crate::store::Store;

pub mod checkout;
pub mod delivery;
pub mod discount;
pub mod orders;
pub mod payment;
pub mod refunds;
pub mod stock;
pub mod sweeps;
pub mod wallet;

pub use checkout::{CartLine, CheckoutReceipt, CheckoutRequest, CheckoutService, ShopGroup};
pub use delivery::{DeliveryFeeCalculator, TableRateCalculator};
pub use orders::{OrderDetail, OrderService};
pub use payment::{callback_signature, CardCallback, PaymentService, TransactionDetail, STATUS_PAID};
pub use refunds::{RefundDetail, RefundMessage, RefundRequest, RefundService};
pub use sweeps::{SweepReport, SweepService};
pub use wallet::WalletService;

/// What every service needs from the outside world.
#[derive(Clone)]
pub(crate) struct Context {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Notifier,
}

/// All services wired over one store, clock and notifier.
#[derive(Clone)]
pub struct Marketplace {
    pub wallets: WalletService,
    pub checkout: CheckoutService,
    pub payments: PaymentService,
    pub orders: OrderService,
    pub refunds: RefundService,
    pub sweeps: SweepService,
}

impl Marketplace {
    pub fn new(
        store: Arc<dyn Store>,
        config: &Config,
        clock: Arc<dyn Clock>,
        delivery: Arc<dyn DeliveryFeeCalculator>,
        notifier: Notifier,
    ) -> Self {
        let ctx = Context { store, clock, notifier };
        let wallets = WalletService::new(ctx.clone(), config.wallet.clone());
        let orders = OrderService::new(ctx.clone(), config.orders.clone());
        let refunds = RefundService::new(ctx.clone(), config.orders.clone());
        Self {
            checkout: CheckoutService::new(ctx.clone(), wallets.clone(), delivery, config.card_gateway.clone()),
            payments: PaymentService::new(ctx.clone(), config.card_gateway.clone()),
            sweeps: SweepService::new(ctx, orders.clone(), refunds.clone(), config.orders.refund_rejection_grace),
            wallets,
            orders,
            refunds,
        }
    }
}
