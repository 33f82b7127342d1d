use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCartItemRequest {
    pub book_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

/// One line of the cart, joined with its book for display. The price shown
/// here is the book's current price; billing uses the order-time snapshot.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemDto {
    pub id: Uuid,
    pub book_id: Uuid,
    pub title: String,
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartDto {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartItemDto>,
}
