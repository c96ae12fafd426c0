//! Orders plugin for the marketplace.
//!
//! Turns a cart into an order in one transaction. Depends on both the cart
//! and products plugins.

use std::sync::{Arc, OnceLock};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use chrono::{DateTime, Utc};
use marketplace_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub const SLUG: &str = "orders";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderSettings {
    /// Orders below this total are refused.
    pub min_total_cents: i64,
    /// Status given to freshly placed orders.
    pub initial_status: String,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            min_total_cents: 0,
            initial_status: "pending".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub cart_id: String,
    pub total_cents: i64,
    pub item_count: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub fn descriptor() -> PluginResult<PluginDescriptor> {
    Ok(PluginDescriptor::new(SLUG, "Orders", env!("CARGO_PKG_VERSION"))
        .with_description("Checkout of carts into orders")
        .with_author("Marketplace Team")
        .depends_on(cart::SLUG)
        .depends_on(products::SLUG)
        .with_schema(ConfigSchema::of::<OrderSettings>()?))
}

pub fn create(config: PluginConfig) -> PluginResult<Box<dyn Plugin>> {
    let settings: OrderSettings = config.settings()?;
    if settings.min_total_cents < 0 {
        anyhow::bail!("min_total_cents must not be negative");
    }
    if settings.initial_status.is_empty() {
        anyhow::bail!("initial_status must not be empty");
    }

    Ok(Box::new(OrdersPlugin {
        descriptor: descriptor()?,
        config,
        state: OrdersState {
            db: Arc::new(OnceLock::new()),
            settings: Arc::new(settings),
        },
    }))
}

#[derive(Clone)]
struct OrdersState {
    db: Arc<OnceLock<PgPool>>,
    settings: Arc<OrderSettings>,
}

impl OrdersState {
    fn db(&self) -> Result<&PgPool, StatusCode> {
        self.db.get().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }

    /// Keep the first pool handed to `init_db`. Returns false when one was
    /// already attached, which happens if the same instance is initialized
    /// twice.
    fn attach(&self, db: &PgPool) -> bool {
        let attached = self.db.set(db.clone()).is_ok();
        if !attached {
            debug!(plugin = SLUG, "database pool already attached, keeping the first");
        }
        attached
    }
}

struct OrdersPlugin {
    descriptor: PluginDescriptor,
    config: PluginConfig,
    state: OrdersState,
}

#[async_trait]
impl Plugin for OrdersPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn register_routes(&self, routes: &mut RouteRegistrar) {
        let prefix = self.descriptor.route_prefix();
        routes
            .route(
                &format!("{prefix}/{{id}}"),
                get(get_order).with_state(self.state.clone()),
            )
            .route(
                &format!("{prefix}/checkout/{{cart_id}}"),
                post(checkout).with_state(self.state.clone()),
            );
    }

    async fn init_db(&self, db: &PgPool) -> PluginResult {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS marketplace_orders (
                id BIGSERIAL PRIMARY KEY,
                cart_id TEXT NOT NULL,
                total_cents BIGINT NOT NULL,
                item_count BIGINT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(db)
        .await?;

        self.state.attach(db);
        Ok(())
    }

    async fn on_startup(&self, host: &PluginHost<'_>) -> PluginResult {
        let cart = host
            .peers()
            .descriptor(cart::SLUG)
            .ok_or_else(|| anyhow::anyhow!("'{}' is not active", cart::SLUG))?;
        info!(plugin = SLUG, cart_version = %cart.version, "orders ready");
        Ok(())
    }
}

async fn get_order(
    State(state): State<OrdersState>,
    Path(id): Path<i64>,
) -> Result<Json<Order>, StatusCode> {
    sqlx::query_as::<_, Order>(
        "SELECT id, cart_id, total_cents, item_count, status, created_at
         FROM marketplace_orders WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(state.db()?)
    .await
    .map_err(internal)?
    .map(Json)
    .ok_or(StatusCode::NOT_FOUND)
}

async fn checkout(
    State(state): State<OrdersState>,
    Path(cart_id): Path<String>,
) -> Result<(StatusCode, Json<Order>), StatusCode> {
    let db = state.db()?;
    let items = cart::fetch_items(db, &cart_id).await.map_err(internal)?;
    if items.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }

    let total: i64 = items
        .iter()
        .map(|item| item.price_cents * i64::from(item.quantity))
        .sum();
    let count: i64 = items.iter().map(|item| i64::from(item.quantity)).sum();
    if total < state.settings.min_total_cents {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let mut tx = db.begin().await.map_err(internal)?;
    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO marketplace_orders (cart_id, total_cents, item_count, status)
         VALUES ($1, $2, $3, $4)
         RETURNING id, cart_id, total_cents, item_count, status, created_at",
    )
    .bind(&cart_id)
    .bind(total)
    .bind(count)
    .bind(&state.settings.initial_status)
    .fetch_one(&mut *tx)
    .await
    .map_err(internal)?;

    sqlx::query("DELETE FROM marketplace_cart_items WHERE cart_id = $1")
        .bind(&cart_id)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;

    info!(plugin = SLUG, order = order.id, total_cents = total, "order placed");
    Ok((StatusCode::CREATED, Json(order)))
}

fn internal(e: sqlx::Error) -> StatusCode {
    error!(plugin = SLUG, error = %e, "order query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
