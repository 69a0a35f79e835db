//! Database entities for the checkout service.

pub mod buyer;
pub mod discount_code;
pub mod discount_redemption;
pub mod order;
pub mod order_item;
pub mod pack;
pub mod pack_component;
pub mod payment_intent;
pub mod price_entry;
pub mod product;
pub mod school;
pub mod stock_level;
pub mod stock_reservation;

pub use buyer::Entity as Buyer;
pub use discount_code::Entity as DiscountCode;
pub use discount_redemption::Entity as DiscountRedemption;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use pack::Entity as Pack;
pub use pack_component::Entity as PackComponent;
pub use payment_intent::Entity as PaymentIntent;
pub use price_entry::Entity as PriceEntry;
pub use product::Entity as Product;
pub use school::Entity as School;
pub use stock_level::Entity as StockLevel;
pub use stock_reservation::Entity as StockReservation;
