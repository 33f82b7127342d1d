use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Book;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    pub isbn: String,
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

/// PUT replaces every mutable field and the whole category set, so the
/// update payload has the same shape as the create payload.
pub type UpdateBookRequest = CreateBookRequest;

#[derive(Debug, Serialize, ToSchema)]
pub struct BookList {
    pub items: Vec<Book>,
}
