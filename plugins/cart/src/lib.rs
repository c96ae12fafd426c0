//! Cart plugin for the marketplace.
//!
//! Keeps per-cart line items referencing products. Depends on the products
//! plugin for its table and must activate after it.

use std::sync::{Arc, OnceLock};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Json;
use marketplace_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

pub const SLUG: &str = "cart";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartSettings {
    /// Upper bound on the summed quantity of one cart.
    pub max_items: i64,
}

impl Default for CartSettings {
    fn default() -> Self {
        Self { max_items: 50 }
    }
}

/// One line of a cart.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CartItem {
    pub product_id: i64,
    pub name: String,
    pub quantity: i32,
    pub price_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddItem {
    pub product_id: i64,
    pub quantity: i32,
}

pub fn descriptor() -> PluginResult<PluginDescriptor> {
    Ok(PluginDescriptor::new(SLUG, "Cart", env!("CARGO_PKG_VERSION"))
        .with_description("Shopping carts holding product line items")
        .with_author("Marketplace Team")
        .depends_on(products::SLUG)
        .with_schema(ConfigSchema::of::<CartSettings>()?))
}

pub fn create(config: PluginConfig) -> PluginResult<Box<dyn Plugin>> {
    let settings: CartSettings = config.settings()?;
    if settings.max_items <= 0 {
        anyhow::bail!("max_items must be positive, got {}", settings.max_items);
    }

    Ok(Box::new(CartPlugin {
        descriptor: descriptor()?,
        config,
        state: CartState {
            db: Arc::new(OnceLock::new()),
            settings: Arc::new(settings),
        },
    }))
}

#[derive(Clone)]
struct CartState {
    db: Arc<OnceLock<PgPool>>,
    settings: Arc<CartSettings>,
}

impl CartState {
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

struct CartPlugin {
    descriptor: PluginDescriptor,
    config: PluginConfig,
    state: CartState,
}

#[async_trait]
impl Plugin for CartPlugin {
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
                &format!("{prefix}/{{cart_id}}"),
                get(list_items)
                    .delete(clear_cart)
                    .with_state(self.state.clone()),
            )
            .route(
                &format!("{prefix}/{{cart_id}}/items"),
                post(add_item).with_state(self.state.clone()),
            )
            .route(
                &format!("{prefix}/{{cart_id}}/items/{{product_id}}"),
                delete(remove_item).with_state(self.state.clone()),
            );
    }

    async fn init_db(&self, db: &PgPool) -> PluginResult {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS marketplace_cart_items (
                cart_id TEXT NOT NULL,
                product_id BIGINT NOT NULL REFERENCES marketplace_products(id) ON DELETE CASCADE,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                PRIMARY KEY (cart_id, product_id)
            )
            "#,
        )
        .execute(db)
        .await?;

        self.state.attach(db);
        Ok(())
    }

    async fn on_startup(&self, host: &PluginHost<'_>) -> PluginResult {
        if !host.peers().is_active(products::SLUG) {
            anyhow::bail!("'{}' must be active before the cart starts", products::SLUG);
        }
        Ok(())
    }
}

async fn list_items(
    State(state): State<CartState>,
    Path(cart_id): Path<String>,
) -> Result<Json<Vec<CartItem>>, StatusCode> {
    let items = fetch_items(state.db()?, &cart_id).await.map_err(internal)?;
    Ok(Json(items))
}

/// Lines of one cart joined with current product prices.
pub async fn fetch_items(db: &PgPool, cart_id: &str) -> Result<Vec<CartItem>, sqlx::Error> {
    sqlx::query_as::<_, CartItem>(
        "SELECT c.product_id, p.name, c.quantity, p.price_cents
         FROM marketplace_cart_items c
         JOIN marketplace_products p ON p.id = c.product_id
         WHERE c.cart_id = $1
         ORDER BY c.product_id",
    )
    .bind(cart_id)
    .fetch_all(db)
    .await
}

async fn add_item(
    State(state): State<CartState>,
    Path(cart_id): Path<String>,
    Json(input): Json<AddItem>,
) -> Result<(StatusCode, Json<Vec<CartItem>>), StatusCode> {
    if input.quantity <= 0 {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let db = state.db()?;

    let (current,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM marketplace_cart_items WHERE cart_id = $1",
    )
    .bind(&cart_id)
    .fetch_one(db)
    .await
    .map_err(internal)?;
    if current + i64::from(input.quantity) > state.settings.max_items {
        return Err(StatusCode::CONFLICT);
    }

    let inserted = sqlx::query(
        "INSERT INTO marketplace_cart_items (cart_id, product_id, quantity)
         SELECT $1, id, $3 FROM marketplace_products WHERE id = $2
         ON CONFLICT (cart_id, product_id)
         DO UPDATE SET quantity = marketplace_cart_items.quantity + EXCLUDED.quantity",
    )
    .bind(&cart_id)
    .bind(input.product_id)
    .bind(input.quantity)
    .execute(db)
    .await
    .map_err(internal)?;
    if inserted.rows_affected() == 0 {
        return Err(StatusCode::NOT_FOUND);
    }

    let items = fetch_items(db, &cart_id).await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(items)))
}

async fn remove_item(
    State(state): State<CartState>,
    Path((cart_id, product_id)): Path<(String, i64)>,
) -> Result<StatusCode, StatusCode> {
    let result = sqlx::query(
        "DELETE FROM marketplace_cart_items WHERE cart_id = $1 AND product_id = $2",
    )
    .bind(&cart_id)
    .bind(product_id)
    .execute(state.db()?)
    .await
    .map_err(internal)?;

    if result.rows_affected() == 0 {
        Err(StatusCode::NOT_FOUND)
    } else {
        Ok(StatusCode::NO_CONTENT)
    }
}

async fn clear_cart(
    State(state): State<CartState>,
    Path(cart_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    sqlx::query("DELETE FROM marketplace_cart_items WHERE cart_id = $1")
        .bind(&cart_id)
        .execute(state.db()?)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

fn internal(e: sqlx::Error) -> StatusCode {
    error!(plugin = SLUG, error = %e, "cart query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
