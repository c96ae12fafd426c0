//! Products plugin for the marketplace.
//!
//! Owns the product table and exposes listing, lookup and creation under
//! `/products`. Other plugins (cart, orders) reference products by id.

use std::sync::{Arc, OnceLock};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Json;
use chrono::{DateTime, Utc};
use marketplace_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub const SLUG: &str = "products";

/// Settings read from the `[products]` override table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductSettings {
    /// Currency assigned to products created without one.
    pub currency: String,
    /// Maximum rows returned by the listing endpoint.
    pub page_size: i64,
}

impl Default for ProductSettings {
    fn default() -> Self {
        Self {
            currency: "EUR".to_string(),
            page_size: 50,
        }
    }
}

/// A product row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Request body for `POST /products`.
#[derive(Debug, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub price_cents: i64,
    pub currency: Option<String>,
}

/// Plugin descriptor.
pub fn descriptor() -> PluginResult<PluginDescriptor> {
    Ok(PluginDescriptor::new(SLUG, "Products", env!("CARGO_PKG_VERSION"))
        .with_description("Product catalog with listing and lookup endpoints")
        .with_author("Marketplace Team")
        .with_schema(ConfigSchema::of::<ProductSettings>()?))
}

/// Plugin constructor.
pub fn create(config: PluginConfig) -> PluginResult<Box<dyn Plugin>> {
    let settings: ProductSettings = config.settings()?;
    if settings.page_size <= 0 {
        anyhow::bail!("page_size must be positive, got {}", settings.page_size);
    }

    Ok(Box::new(ProductsPlugin {
        descriptor: descriptor()?,
        config,
        state: ProductsState {
            db: Arc::new(OnceLock::new()),
            settings: Arc::new(settings),
        },
    }))
}

#[derive(Clone)]
struct ProductsState {
    /// Set by `init_db`; handlers answer 503 until then.
    db: Arc<OnceLock<PgPool>>,
    settings: Arc<ProductSettings>,
}

impl ProductsState {
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

struct ProductsPlugin {
    descriptor: PluginDescriptor,
    config: PluginConfig,
    state: ProductsState,
}

#[async_trait]
impl Plugin for ProductsPlugin {
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
                &prefix,
                get(list_products)
                    .post(create_product)
                    .with_state(self.state.clone()),
            )
            .route(
                &format!("{prefix}/{{id}}"),
                get(get_product).with_state(self.state.clone()),
            );
    }

    async fn init_db(&self, db: &PgPool) -> PluginResult {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS marketplace_products (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                price_cents BIGINT NOT NULL CHECK (price_cents >= 0),
                currency TEXT NOT NULL,
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
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM marketplace_products")
            .fetch_one(host.db())
            .await?;
        info!(plugin = SLUG, products = count, "products ready");
        Ok(())
    }
}

async fn list_products(State(state): State<ProductsState>) -> Result<Json<Vec<Product>>, StatusCode> {
    let products = sqlx::query_as::<_, Product>(
        "SELECT id, name, price_cents, currency, created_at
         FROM marketplace_products ORDER BY id LIMIT $1",
    )
    .bind(state.settings.page_size)
    .fetch_all(state.db()?)
    .await
    .map_err(internal)?;

    Ok(Json(products))
}

async fn get_product(
    State(state): State<ProductsState>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, StatusCode> {
    sqlx::query_as::<_, Product>(
        "SELECT id, name, price_cents, currency, created_at
         FROM marketplace_products WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(state.db()?)
    .await
    .map_err(internal)?
    .map(Json)
    .ok_or(StatusCode::NOT_FOUND)
}

async fn create_product(
    State(state): State<ProductsState>,
    Json(input): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>), StatusCode> {
    if input.name.trim().is_empty() || input.price_cents < 0 {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let currency = input
        .currency
        .unwrap_or_else(|| state.settings.currency.clone());

    let product = sqlx::query_as::<_, Product>(
        "INSERT INTO marketplace_products (name, price_cents, currency)
         VALUES ($1, $2, $3)
         RETURNING id, name, price_cents, currency, created_at",
    )
    .bind(input.name.trim())
    .bind(input.price_cents)
    .bind(currency)
    .fetch_one(state.db()?)
    .await
    .map_err(internal)?;

    Ok((StatusCode::CREATED, Json(product)))
}

fn internal(e: sqlx::Error) -> StatusCode {
    error!(plugin = SLUG, error = %e, "product query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
