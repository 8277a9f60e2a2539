use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockflow_core::{Entity, OrderId, PartyId};
use stockflow_ledger::{
    Order, OrderLine, OrderRequest, OrderStatus, Owner, StockAdjustment, StockEntry, StockKey,
    TransferReceipt, TransferRequest, allocate, order_number,
};

use super::r#trait::{LedgerStore, StoreError, clamp_lock_wait};

/// Default bound on how long a call waits for one row lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(2000);

/// `None` until the first committed credit materializes the row.
type RowCell = Arc<Mutex<Option<i64>>>;

/// In-memory ledger store.
///
/// Each stock row sits behind its own async mutex. A call locks every row it
/// touches in ascending key order, waiting at most `lock_wait` per row, and
/// only writes once every decision has succeeded. Intended for tests/dev.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    rows: RwLock<HashMap<StockKey, RowCell>>,
    orders: RwLock<BTreeMap<OrderId, Order>>,
    lock_wait: Duration,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::with_lock_wait(DEFAULT_LOCK_WAIT)
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `lock_wait` is raised to at least [`MIN_LOCK_WAIT`](super::MIN_LOCK_WAIT).
    pub fn with_lock_wait(lock_wait: Duration) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            orders: RwLock::new(BTreeMap::new()),
            lock_wait: clamp_lock_wait(lock_wait),
        }
    }

    pub fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    fn cell(&self, key: &StockKey) -> Result<RowCell, StoreError> {
        {
            let rows = self.rows.read().map_err(|_| poisoned("stock rows"))?;
            if let Some(cell) = rows.get(key) {
                return Ok(cell.clone());
            }
        }
        let mut rows = self.rows.write().map_err(|_| poisoned("stock rows"))?;
        Ok(rows.entry(*key).or_insert_with(|| Arc::new(Mutex::new(None))).clone())
    }

    fn existing_cell(&self, key: &StockKey) -> Result<Option<RowCell>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned("stock rows"))?;
        Ok(rows.get(key).cloned())
    }

    async fn lock_cell(&self, key: &StockKey, cell: RowCell) -> Result<OwnedMutexGuard<Option<i64>>, StoreError> {
        tokio::time::timeout(self.lock_wait, cell.lock_owned())
            .await
            .map_err(|_| StoreError::Contention(format!("timed out after {:?} waiting for row {key}", self.lock_wait)))
    }

    /// Lock `keys` in ascending order. Guards release on drop.
    async fn lock_rows(&self, keys: impl IntoIterator<Item = StockKey>) -> Result<LockedRows, StoreError> {
        let ordered: BTreeSet<StockKey> = keys.into_iter().collect();
        let mut guards = BTreeMap::new();
        for key in ordered {
            let cell = self.cell(&key)?;
            let guard = self.lock_cell(&key, cell).await?;
            guards.insert(key, guard);
        }
        Ok(LockedRows { guards })
    }

    /// Hold a row lock from test code to simulate a long-running writer.
    #[cfg(test)]
    pub(crate) async fn hold_row(&self, key: StockKey) -> OwnedMutexGuard<Option<i64>> {
        match self.cell(&key) {
            Ok(cell) => cell.lock_owned().await,
            Err(err) => panic!("failed to resolve row {key}: {err}"),
        }
    }
}

struct LockedRows {
    guards: BTreeMap<StockKey, OwnedMutexGuard<Option<i64>>>,
}

impl LockedRows {
    fn get(&self, key: &StockKey) -> i64 {
        self.guards.get(key).and_then(|guard| **guard).unwrap_or(0)
    }

    fn on_hand(&self) -> BTreeMap<StockKey, i64> {
        self.guards
            .iter()
            .filter_map(|(key, guard)| (**guard).map(|quantity| (*key, quantity)))
            .collect()
    }

    fn set(&mut self, key: &StockKey, quantity: i64) -> Result<(), StoreError> {
        match self.guards.get_mut(key) {
            Some(guard) => {
                **guard = Some(quantity);
                Ok(())
            }
            None => Err(StoreError::Unavailable(format!("row {key} written without holding its lock"))),
        }
    }
}

fn poisoned(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} lock poisoned"))
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn adjust(&self, adjustment: &StockAdjustment) -> Result<StockEntry, StoreError> {
        adjustment.validate()?;
        let mut rows = self.lock_rows([adjustment.key]).await?;
        let next = adjustment.apply_to(rows.get(&adjustment.key))?;
        rows.set(&adjustment.key, next)?;
        Ok(StockEntry {
            key: adjustment.key,
            quantity: next,
        })
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, StoreError> {
        request.validate()?;
        let source = request.source_key();
        let destination = request.destination_key();
        let mut rows = self.lock_rows([source, destination]).await?;
        let plan = request.plan(rows.get(&source), rows.get(&destination))?;
        rows.set(&plan.source, plan.source_after)?;
        rows.set(&plan.destination, plan.destination_after)?;
        Ok(plan.receipt())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, StoreError> {
        request.validate()?;
        let mut rows = self.lock_rows(request.stock_keys()).await?;
        let allocation = allocate(request, &rows.on_hand())?;

        let id = OrderId::new();
        let created_at = Utc::now();
        let order = Order {
            id,
            order_number: order_number(id, created_at),
            seller_id: request.seller_id,
            distributor_id: request.distributor_id,
            customer: request.customer.clone(),
            total_amount: allocation.total_amount,
            status: OrderStatus::Fulfilled,
            created_at,
            lines: allocation
                .lines
                .iter()
                .map(|line| OrderLine {
                    order_id: id,
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    source: line.source,
                })
                .collect(),
        };

        // Take the order map before touching any row so a poisoned map
        // cannot leave debits without their order.
        let mut orders = self.orders.write().map_err(|_| poisoned("orders"))?;
        for debit in &allocation.debits {
            rows.set(&debit.key, debit.remaining)?;
        }
        orders.insert(*order.id(), order.clone());
        Ok(order)
    }

    async fn quantity(&self, key: &StockKey) -> Result<i64, StoreError> {
        let Some(cell) = self.existing_cell(key)? else {
            return Ok(0);
        };
        let guard = self.lock_cell(key, cell).await?;
        Ok((*guard).unwrap_or(0))
    }

    async fn stock_of(&self, owner: Owner) -> Result<Vec<StockEntry>, StoreError> {
        let cells: BTreeMap<StockKey, RowCell> = {
            let rows = self.rows.read().map_err(|_| poisoned("stock rows"))?;
            rows.iter()
                .filter(|(key, _)| key.owner_id == owner.id && key.owner_type == owner.role)
                .map(|(key, cell)| (*key, cell.clone()))
                .collect()
        };

        let mut entries = Vec::with_capacity(cells.len());
        for (key, cell) in cells {
            let guard = self.lock_cell(&key, cell).await?;
            if let Some(quantity) = *guard {
                entries.push(StockEntry { key, quantity });
            }
        }
        Ok(entries)
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().map_err(|_| poisoned("orders"))?;
        Ok(orders.get(&order_id).cloned())
    }

    async fn orders_for_seller(&self, seller_id: PartyId) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().map_err(|_| poisoned("orders"))?;
        let mut found: Vec<Order> = orders.values().filter(|o| o.seller_id == seller_id).cloned().collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockflow_core::{PartyRole, ProductId};
    use stockflow_ledger::LedgerError;
    use stockflow_ledger::{Customer, LineSource, OrderLineRequest};

    use crate::store::MIN_LOCK_WAIT;

    fn key(product_id: ProductId, owner: Owner) -> StockKey {
        owner.stock_key(product_id)
    }

    #[tokio::test]
    async fn adjust_creates_row_on_first_credit() {
        let store = InMemoryLedgerStore::new();
        let product = ProductId::new();
        let owner = Owner::manufacturer(PartyId::new());

        let entry = store.adjust(&StockAdjustment::new(key(product, owner), 500)).await.unwrap();
        assert_eq!(entry.quantity, 500);
        assert_eq!(store.quantity(&key(product, owner)).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn adjust_below_zero_leaves_row_untouched() {
        let store = InMemoryLedgerStore::new();
        let product = ProductId::new();
        let owner = Owner::seller(PartyId::new());
        store.adjust(&StockAdjustment::new(key(product, owner), 4)).await.unwrap();

        let err = store.adjust(&StockAdjustment::new(key(product, owner), -5)).await.unwrap_err();
        match err {
            StoreError::Ledger(LedgerError::InsufficientStock { requested: 5, available: 4, .. }) => {}
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(store.quantity(&key(product, owner)).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn failed_debit_on_missing_row_does_not_materialize_it() {
        let store = InMemoryLedgerStore::new();
        let owner = Owner::distributor(PartyId::new());

        assert!(store.adjust(&StockAdjustment::new(key(ProductId::new(), owner), -1)).await.is_err());
        assert!(store.stock_of(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transfer_moves_stock_and_creates_destination() {
        let store = InMemoryLedgerStore::new();
        let product = ProductId::new();
        let manufacturer = Owner::manufacturer(PartyId::new());
        let distributor = Owner::distributor(PartyId::new());
        store.adjust(&StockAdjustment::new(key(product, manufacturer), 500)).await.unwrap();

        let receipt = store
            .transfer(&TransferRequest::new(product, manufacturer, distributor, 50))
            .await
            .unwrap();

        assert_eq!(receipt.source_quantity, 450);
        assert_eq!(receipt.destination_quantity, 50);
        assert_eq!(store.quantity(&key(product, distributor)).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn place_order_splits_and_records_lines() {
        let store = InMemoryLedgerStore::new();
        let product = ProductId::new();
        let seller = Owner::seller(PartyId::new());
        let distributor = Owner::distributor(PartyId::new());
        store.adjust(&StockAdjustment::new(key(product, seller), 3)).await.unwrap();
        store.adjust(&StockAdjustment::new(key(product, distributor), 20)).await.unwrap();

        let request = OrderRequest {
            seller_id: seller.id,
            distributor_id: distributor.id,
            customer: Customer::new("Ada", None),
            lines: vec![OrderLineRequest::new(product, 10, 4599)],
        };
        let order = store.place_order(&request).await.unwrap();

        assert_eq!(order.status, OrderStatus::Fulfilled);
        assert_eq!(order.quantity_from(product, LineSource::SellerStock), 3);
        assert_eq!(order.quantity_from(product, LineSource::DistributorStock), 7);
        assert_eq!(order.total_amount, 45_990);
        assert_eq!(store.quantity(&key(product, seller)).await.unwrap(), 0);
        assert_eq!(store.quantity(&key(product, distributor)).await.unwrap(), 13);
        assert_eq!(store.order(order.id).await.unwrap(), Some(order.clone()));
        assert_eq!(store.orders_for_seller(seller.id).await.unwrap(), vec![order]);
    }

    #[tokio::test]
    async fn held_row_times_out_as_contention() {
        let store = InMemoryLedgerStore::with_lock_wait(Duration::from_millis(20));
        let product = ProductId::new();
        let owner = Owner::new(PartyId::new(), PartyRole::Seller);
        let row = key(product, owner);

        let _held = store.hold_row(row).await;
        let err = store.adjust(&StockAdjustment::new(row, 1)).await.unwrap_err();
        assert!(err.is_contention(), "expected contention, got {err:?}");
    }

    #[tokio::test]
    async fn zero_lock_wait_is_raised_to_the_minimum() {
        let store = InMemoryLedgerStore::with_lock_wait(Duration::ZERO);
        assert_eq!(store.lock_wait(), MIN_LOCK_WAIT);

        // A briefly contended row is still acquired once the holder lets go.
        let row = key(ProductId::new(), Owner::seller(PartyId::new()));
        let store = Arc::new(InMemoryLedgerStore::with_lock_wait(Duration::from_millis(500)));
        let held = store.hold_row(row).await;
        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.adjust(&StockAdjustment::new(row, 1)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(held);
        assert_eq!(writer.await.unwrap().unwrap().quantity, 1);
    }

    /// One step of a randomized workload against a three-tier chain.
    #[derive(Debug, Clone)]
    enum Step {
        Restock(i64),
        Ship(i64),
        Sell(i64),
        Shrink(i64),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (1i64..50).prop_map(Step::Restock),
            (1i64..40).prop_map(Step::Ship),
            (1i64..40).prop_map(Step::Sell),
            (1i64..30).prop_map(Step::Shrink),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: concurrent adjusts and transfers never drive a row below
        /// zero, and the chain total moves only by committed adjustments.
        #[test]
        fn concurrent_workload_conserves_stock(steps in prop::collection::vec(step(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            let (rows, net_adjusted) = runtime.block_on(async move {
                let store = Arc::new(InMemoryLedgerStore::new());
                let product = ProductId::new();
                let manufacturer = Owner::manufacturer(PartyId::new());
                let distributor = Owner::distributor(PartyId::new());
                let seller = Owner::seller(PartyId::new());

                let handles: Vec<_> = steps
                    .into_iter()
                    .map(|step| {
                        let store = store.clone();
                        tokio::spawn(async move {
                            match step {
                                Step::Restock(n) => store
                                    .adjust(&StockAdjustment::new(key(product, manufacturer), n))
                                    .await
                                    .map(|_| n),
                                Step::Ship(n) => store
                                    .transfer(&TransferRequest::new(product, manufacturer, distributor, n))
                                    .await
                                    .map(|_| 0),
                                Step::Sell(n) => store
                                    .transfer(&TransferRequest::new(product, distributor, seller, n))
                                    .await
                                    .map(|_| 0),
                                Step::Shrink(n) => store
                                    .adjust(&StockAdjustment::new(key(product, distributor), -n))
                                    .await
                                    .map(|_| -n),
                            }
                        })
                    })
                    .collect();

                let mut net_adjusted = 0;
                for handle in handles {
                    match handle.await.unwrap() {
                        Ok(delta) => net_adjusted += delta,
                        Err(StoreError::Ledger(LedgerError::InsufficientStock { .. })) => {}
                        Err(other) => panic!("unexpected error {other:?}"),
                    }
                }

                let mut rows = Vec::new();
                for owner in [manufacturer, distributor, seller] {
                    rows.push(store.quantity(&key(product, owner)).await.unwrap());
                }
                (rows, net_adjusted)
            });

            for quantity in &rows {
                prop_assert!(*quantity >= 0);
            }
            prop_assert_eq!(rows.iter().sum::<i64>(), net_adjusted);
        }
    }
}
