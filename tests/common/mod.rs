//! Shared test harness: an in-memory SQLite database with the schema
//! created from the entities, seed helpers, and a stub payment gateway.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use schoolkit_api::{
    config::PaymentConfig,
    entities::{
        buyer, discount_code, pack, pack_component, price_entry, product, school, stock_level,
    },
    errors::ServiceError,
    events::EventSender,
    services::{
        checkout::CheckoutService,
        payments::{PaymentGateway, PaymentSession, PaymentSessionRequest},
    },
};
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    Schema, Set,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub event_sender: EventSender,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
        // A single pooled connection keeps the in-memory database alive
        // and shared across tasks.
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.expect("sqlite connect");

        let backend = db.get_database_backend();
        let schema = Schema::new(backend);

        macro_rules! create_table {
            ($entity:expr) => {
                db.execute(backend.build(&schema.create_table_from_entity($entity)))
                    .await
                    .expect("create table");
            };
        }

        create_table!(schoolkit_api::entities::Product);
        create_table!(schoolkit_api::entities::School);
        create_table!(schoolkit_api::entities::Buyer);
        create_table!(schoolkit_api::entities::Pack);
        create_table!(schoolkit_api::entities::PackComponent);
        create_table!(schoolkit_api::entities::PriceEntry);
        create_table!(schoolkit_api::entities::StockLevel);
        create_table!(schoolkit_api::entities::StockReservation);
        create_table!(schoolkit_api::entities::Order);
        create_table!(schoolkit_api::entities::OrderItem);
        create_table!(schoolkit_api::entities::PaymentIntent);
        create_table!(schoolkit_api::entities::DiscountCode);
        create_table!(schoolkit_api::entities::DiscountRedemption);

        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        Self {
            db: Arc::new(db),
            event_sender: EventSender::new(tx),
        }
    }

    pub fn checkout_service(&self, gateway: Arc<dyn PaymentGateway>) -> CheckoutService {
        CheckoutService::new(
            self.db.clone(),
            self.event_sender.clone(),
            gateway,
            "PEN".to_string(),
            PaymentConfig::default(),
        )
    }

    pub async fn seed_product(&self, id: i64, title: &str, price: Decimal, on_hand: i64) {
        product::ActiveModel {
            id: Set(id),
            title: Set(title.to_string()),
            sale_code: Set(None),
            visible: Set(true),
        }
        .insert(&*self.db)
        .await
        .expect("seed product");

        price_entry::ActiveModel {
            id: Set(id),
            scope: Set(price_entry::PriceScope::Product),
            item_id: Set(id),
            unit_price: Set(price),
            currency: Set("PEN".to_string()),
            active: Set(true),
        }
        .insert(&*self.db)
        .await
        .expect("seed price");

        stock_level::ActiveModel {
            product_id: Set(id),
            on_hand: Set(on_hand),
            reserved: Set(0),
        }
        .insert(&*self.db)
        .await
        .expect("seed stock");
    }

    pub async fn seed_hidden_product(&self, id: i64) {
        product::ActiveModel {
            id: Set(id),
            title: Set(format!("Hidden {}", id)),
            sale_code: Set(None),
            visible: Set(false),
        }
        .insert(&*self.db)
        .await
        .expect("seed hidden product");
    }

    /// Seeds a pack priced as a unit over already-seeded products.
    pub async fn seed_pack(&self, id: i64, title: &str, price: Decimal, components: &[(i64, i64)]) {
        pack::ActiveModel {
            id: Set(id),
            title: Set(title.to_string()),
            sale_code: Set(None),
            visible: Set(true),
        }
        .insert(&*self.db)
        .await
        .expect("seed pack");

        for (index, (product_id, quantity)) in components.iter().enumerate() {
            pack_component::ActiveModel {
                id: Set(id * 100 + index as i64),
                pack_id: Set(id),
                product_id: Set(*product_id),
                quantity: Set(*quantity),
            }
            .insert(&*self.db)
            .await
            .expect("seed pack component");
        }

        price_entry::ActiveModel {
            id: Set(10_000 + id),
            scope: Set(price_entry::PriceScope::Pack),
            item_id: Set(id),
            unit_price: Set(price),
            currency: Set("PEN".to_string()),
            active: Set(true),
        }
        .insert(&*self.db)
        .await
        .expect("seed pack price");
    }

    pub async fn seed_school(&self, id: i64, name: &str, code: &str) {
        school::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            code: Set(code.to_string()),
        }
        .insert(&*self.db)
        .await
        .expect("seed school");
    }

    /// Seeds a buyer profile and returns its authenticated user id.
    pub async fn seed_buyer(&self, school_id: Option<i64>) -> Uuid {
        let user_id = Uuid::new_v4();
        buyer::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            full_name: Set("Test Buyer".to_string()),
            email: Set("buyer@example.com".to_string()),
            school_id: Set(school_id),
            address: Set(Some("Av. Siempre Viva 742".to_string())),
            address_reference: Set(None),
            district: Set(Some("Miraflores".to_string())),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed buyer");
        user_id
    }

    pub async fn seed_discount(&self, model: discount_code::Model) {
        let active: discount_code::ActiveModel = model.into();
        active
            .reset_all()
            .insert(&*self.db)
            .await
            .expect("seed discount");
    }

    pub async fn available(&self, product_id: i64) -> i64 {
        schoolkit_api::entities::StockLevel::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("stock query")
            .map(|row| row.available())
            .unwrap_or(0)
    }
}

/// Gateway stub: succeeds with a canned session or fails on demand, and
/// counts invocations either way.
pub struct StubGateway {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl StubGateway {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_payment_session(
        &self,
        request: PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ServiceError::PaymentGatewayError(
                "stub gateway refused the session".to_string(),
            ));
        }
        Ok(PaymentSession {
            id: format!("pref-{}", request.external_reference),
            redirect_url: format!("https://pay.test/redirect/{}", request.external_reference),
            sandbox_redirect_url: Some(format!(
                "https://sandbox.pay.test/redirect/{}",
                request.external_reference
            )),
        })
    }
}
