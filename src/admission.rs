//! Admission Service (C6)
//!
//! Validates and persists new orders (spec §4.6). A buy reserves cash
//! immediately; a sell checks (but does not reserve) the holding quantity.
//! Orders admitted while the market is open are published to the execution
//! bus as `PENDING`; orders admitted while closed are stored `RESERVED` for
//! the Reservation Opener (C10) to pick up at the next open.

use crate::bus::{ExecutionBus, Message};
use crate::clock::{Clock, MarketCalendar};
use crate::error::{AppError, AppResult};
use crate::ledger::Ledger;
use crate::orders::{Order, OrderStatus, OrderStore, Side};
use crate::price::PriceOracle;
use crate::stock::{normalize_ticker, StockCatalog};
use std::sync::Arc;
use tracing::{info, warn};

pub struct AdmissionService {
    ledger: Arc<Ledger>,
    orders: Arc<OrderStore>,
    bus: Arc<ExecutionBus>,
    oracle: Arc<PriceOracle>,
    catalog: StockCatalog,
    clock: Arc<dyn Clock>,
    calendar: MarketCalendar,
    initial_cash: i64,
    max_qty_per_order: i64,
    max_price_minor_units: i64,
}

impl AdmissionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<Ledger>,
        orders: Arc<OrderStore>,
        bus: Arc<ExecutionBus>,
        oracle: Arc<PriceOracle>,
        catalog: StockCatalog,
        clock: Arc<dyn Clock>,
        calendar: MarketCalendar,
        initial_cash: i64,
        max_qty_per_order: i64,
        max_price_minor_units: i64,
    ) -> Self {
        Self {
            ledger,
            orders,
            bus,
            oracle,
            catalog,
            clock,
            calendar,
            initial_cash,
            max_qty_per_order,
            max_price_minor_units,
        }
    }

    pub fn submit_buy(
        &self,
        user_id: &str,
        ticker: &str,
        quantity: i64,
        price: Option<i64>,
    ) -> AppResult<Order> {
        self.submit(user_id, Side::Buy, ticker, quantity, price)
    }

    pub fn submit_sell(
        &self,
        user_id: &str,
        ticker: &str,
        quantity: i64,
        price: Option<i64>,
    ) -> AppResult<Order> {
        self.submit(user_id, Side::Sell, ticker, quantity, price)
    }

    fn submit(
        &self,
        user_id: &str,
        side: Side,
        ticker_raw: &str,
        quantity: i64,
        price: Option<i64>,
    ) -> AppResult<Order> {
        if user_id.trim().is_empty() {
            return Err(AppError::InvalidArgument("user_id must not be empty".to_string()));
        }
        let ticker = normalize_ticker(ticker_raw)
            .ok_or_else(|| AppError::InvalidArgument(format!("malformed ticker: {ticker_raw}")))?;
        if !self.catalog.is_tradable(&ticker) {
            return Err(AppError::UnknownTicker(ticker));
        }
        if !(1..=self.max_qty_per_order).contains(&quantity) {
            return Err(AppError::InvalidArgument(format!(
                "quantity {quantity} out of range 1..={}",
                self.max_qty_per_order
            )));
        }
        if let Some(p) = price {
            if !(1..=self.max_price_minor_units).contains(&p) {
                return Err(AppError::InvalidArgument(format!(
                    "price {p} out of range 1..={}",
                    self.max_price_minor_units
                )));
            }
        }

        let resolved_price = price.unwrap_or_else(|| self.oracle.current_price(&ticker));
        let account = self.ledger.create_account(user_id, self.initial_cash)?;

        match side {
            Side::Buy => {
                let amount = resolved_price * quantity;
                self.with_retry_once(|| {
                    self.ledger.reserve_cash(&account.account_id, amount, "pending-admission")
                })?;
            }
            Side::Sell => {
                let holding = self.ledger.get_holding(&account.account_id, &ticker)?;
                let available = holding.map(|h| h.quantity).unwrap_or(0);
                if available < quantity {
                    return Err(AppError::InsufficientHolding {
                        account_id: account.account_id.clone(),
                        ticker: ticker.clone(),
                        needed: quantity,
                        available,
                    });
                }
            }
        }

        let market_open = self.calendar.is_open_at(self.clock.now());
        let initial_status = if market_open {
            OrderStatus::Pending
        } else {
            OrderStatus::Reserved
        };

        let order = self.with_retry_once(|| {
            self.orders.insert(side, &account.account_id, &ticker, resolved_price, quantity, initial_status)
        });
        let order = match order {
            Ok(order) => order,
            Err(e) => {
                // Roll back the buy reservation if persisting the order
                // never succeeded, so cash isn't stranded.
                if side == Side::Buy {
                    let amount = resolved_price * quantity;
                    if let Err(reverse_err) =
                        self.ledger.release_cash(&account.account_id, amount, "admission-rollback")
                    {
                        warn!(error = %reverse_err, "failed to reverse reservation after order insert failure");
                    }
                }
                return Err(e);
            }
        };

        if market_open {
            self.bus
                .publish_active(Message::new(order.order_id.clone(), side, 0, self.clock.now()))?;
        }

        info!(order_id = %order.order_id, %ticker, status = order.status.as_str(), "order admitted");
        Ok(order)
    }

    /// Retries `f` once on `Conflict`/`Unavailable`, per spec §7's internal
    /// retry-at-most-once policy for transient persistence errors.
    fn with_retry_once<T>(&self, f: impl Fn() -> AppResult<T>) -> AppResult<T> {
        match f() {
            Err(e) if e.is_retryable() => f(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::price::PriceCache;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Asia::Seoul;

    fn open_instant() -> chrono::DateTime<Utc> {
        Seoul
            .with_ymd_and_hms(2026, 7, 27, 10, 0, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn closed_instant() -> chrono::DateTime<Utc> {
        Seoul
            .with_ymd_and_hms(2026, 7, 27, 20, 0, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn make_service(now: chrono::DateTime<Utc>) -> (AdmissionService, Arc<Ledger>, Arc<OrderStore>, Arc<ExecutionBus>) {
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let orders = Arc::new(OrderStore::open_in_memory().unwrap());
        let bus = Arc::new(ExecutionBus::new(1));
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(now));
        let oracle = Arc::new(PriceOracle::new(
            PriceCache::new(),
            clock.clone(),
            chrono::Duration::minutes(5),
            MarketCalendar::default(),
        ));
        let service = AdmissionService::new(
            ledger.clone(),
            orders.clone(),
            bus.clone(),
            oracle,
            StockCatalog::seeded(),
            clock,
            MarketCalendar::default(),
            1_000_000,
            10_000,
            10_000_000,
        );
        (service, ledger, orders, bus)
    }

    #[test]
    fn buy_during_market_hours_reserves_cash_and_publishes() {
        let (service, ledger, _orders, bus) = make_service(open_instant());
        let order = service.submit_buy("u1", "5930", 2, Some(70_000)).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.ticker, "005930");
        let account = ledger.get_account_by_user("u1").unwrap().unwrap();
        assert_eq!(ledger.balance(&account.account_id).unwrap(), 1_000_000 - 140_000);
        assert_eq!(bus.pending_retry_count(), 0);
    }

    #[test]
    fn buy_while_market_closed_reserves_without_publishing() {
        let (service, _ledger, _orders, _bus) = make_service(closed_instant());
        let order = service.submit_buy("u1", "005930", 1, Some(70_000)).unwrap();
        assert_eq!(order.status, OrderStatus::Reserved);
    }

    #[test]
    fn buy_rejects_insufficient_funds() {
        let (service, _ledger, _orders, _bus) = make_service(open_instant());
        let err = service.submit_buy("u1", "005930", 100, Some(70_000)).unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
    }

    #[test]
    fn buy_rejects_unknown_ticker() {
        let (service, _ledger, _orders, _bus) = make_service(open_instant());
        let err = service.submit_buy("u1", "999999", 1, Some(1000)).unwrap_err();
        assert!(matches!(err, AppError::UnknownTicker(_)));
    }

    #[test]
    fn buy_rejects_out_of_range_quantity() {
        let (service, _ledger, _orders, _bus) = make_service(open_instant());
        let err = service.submit_buy("u1", "005930", 0, Some(1000)).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        let err = service.submit_buy("u1", "005930", 20_000, Some(1000)).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn sell_rejects_without_holding() {
        let (service, _ledger, _orders, _bus) = make_service(open_instant());
        let err = service.submit_sell("u1", "005930", 1, Some(70_000)).unwrap_err();
        assert!(matches!(err, AppError::InsufficientHolding { .. }));
    }

    #[test]
    fn sell_succeeds_with_sufficient_holding() {
        let (service, ledger, _orders, _bus) = make_service(open_instant());
        let account = ledger.create_account("u1", 1_000_000).unwrap();
        ledger.apply_buy_fill(&account.account_id, "005930", 5, 70_000).unwrap();
        let order = service.submit_sell("u1", "005930", 3, Some(71_000)).unwrap();
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.quantity, 3);
    }

    #[test]
    fn omitted_price_resolves_via_oracle() {
        let (service, _ledger, _orders, _bus) = make_service(closed_instant());
        let order = service.submit_buy("u1", "005930", 1, None).unwrap();
        assert_eq!(order.price, 70_000); // static default for 005930
    }
}
