//! Seeds the sample supply chain and walks stock down it: a factory
//! shipment, a restock of the seller, and a customer order that draws on
//! both the seller and the distributor.
//!
//! Runs against Postgres when `DATABASE_URL` is set, in memory otherwise.

use anyhow::Context;
use tracing::{info, warn};

use stockflow_directory::{Directory, InMemoryDirectory};
use stockflow_infra::store::postgres::{SCHEMA, connect_pool};
use stockflow_infra::{
    InMemoryLedgerStore, LedgerConfig, LedgerEngine, LedgerStore, OutcomeKind, PostgresDirectory,
    PostgresLedgerStore, SampleChain,
};
use stockflow_ledger::{Customer, OrderLineRequest, OrderRequest, Owner, TransferRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = LedgerConfig::from_env().context("reading configuration")?;
    let chain = SampleChain::new();

    if config.database_url.is_some() {
        let pool = connect_pool(&config).await.context("connecting to Postgres")?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await.context("applying schema")?;
        chain.install_postgres(&pool).await.context("seeding directory tables")?;
        info!(backend = "postgres", "sample chain installed");

        let engine = LedgerEngine::new(
            PostgresLedgerStore::new(pool.clone(), config.lock_wait),
            PostgresDirectory::new(pool),
        )
        .with_retry(config.retry);
        run(&engine, &chain).await
    } else {
        let directory = InMemoryDirectory::new();
        chain.install(&directory).context("seeding directory")?;
        info!(backend = "in_memory", "sample chain installed");

        let engine =
            LedgerEngine::new(InMemoryLedgerStore::with_lock_wait(config.lock_wait), directory).with_retry(config.retry);
        run(&engine, &chain).await
    }
}

async fn run<S, D>(engine: &LedgerEngine<S, D>, chain: &SampleChain) -> anyhow::Result<()>
where
    S: LedgerStore,
    D: Directory,
{
    chain.stock(engine).await.context("booking opening stock")?;

    let fleece = chain.product("USF-001").context("missing USF-001")?;
    let cotton = chain.product("CCT-003").context("missing CCT-003")?;
    let manufacturer = Owner::manufacturer(chain.manufacturer);
    let distributor = Owner::distributor(chain.distributor);
    let seller = Owner::seller(chain.seller);

    let receipt = engine
        .transfer(&chain.distributor_ctx(), TransferRequest::new(cotton.id, manufacturer, distributor, 100))
        .await?;
    info!(product = %cotton.model, source_left = receipt.source_quantity, received = receipt.destination_quantity, "factory shipment");

    let receipt = engine
        .transfer(&chain.seller_ctx(), TransferRequest::new(cotton.id, distributor, seller, 20))
        .await?;
    info!(product = %cotton.model, source_left = receipt.source_quantity, received = receipt.destination_quantity, "seller restock");

    let request = OrderRequest {
        seller_id: chain.seller,
        distributor_id: chain.distributor,
        customer: Customer::new("Jane Doe", Some("jane@example.com".to_string())),
        lines: vec![
            OrderLineRequest::new(fleece.id, 15, fleece.price),
            OrderLineRequest::new(cotton.id, 2, cotton.price),
        ],
    };
    let order = engine.place_order(&chain.seller_ctx(), request).await?;
    for line in &order.lines {
        info!(order_number = %order.order_number, product_id = %line.product_id, quantity = line.quantity, source = line.source.as_str(), "order line");
    }
    info!(order_number = %order.order_number, total_amount = order.total_amount, "order placed");

    let oversized = OrderRequest {
        seller_id: chain.seller,
        distributor_id: chain.distributor,
        customer: Customer::new("Jane Doe", None),
        lines: vec![OrderLineRequest::new(fleece.id, 1_000, fleece.price)],
    };
    let outcome = engine.place_order(&chain.seller_ctx(), oversized).await;
    warn!(outcome = %OutcomeKind::of(&outcome), "oversized order");

    for owner in [manufacturer, distributor, seller] {
        for entry in engine.stock_of(owner).await? {
            info!(owner_type = %owner.role, product_id = %entry.key.product_id, quantity = entry.quantity, "closing stock");
        }
    }
    Ok(())
}
