use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::cart::{AddCartItemRequest, CartDto, CartItemDto, UpdateCartItemRequest},
    entity::{
        books::{Column as BookCol, Entity as Books},
        cart_items::{
            ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems,
        },
        shopping_carts::{
            self, ActiveModel as CartActive, Column as CartCol, Entity as ShoppingCarts,
        },
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Carts are created lazily: the first cart interaction for a user creates
/// an empty cart bound to them. Fails NotFound when the user row is gone.
pub(crate) async fn get_or_create_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> AppResult<shopping_carts::Model> {
    if let Some(cart) = ShoppingCarts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        return Ok(cart);
    }

    if Users::find_by_id(user_id).one(conn).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let cart = CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: NotSet,
    }
    .insert(conn)
    .await?;
    Ok(cart)
}

pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartDto>> {
    let cart = get_or_create_cart(&state.orm, user.user_id).await?;
    let dto = cart_snapshot(&state.orm, cart).await?;
    Ok(ApiResponse::success("OK", dto, Some(Meta::empty())))
}

pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: AddCartItemRequest,
) -> AppResult<ApiResponse<CartDto>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let book = Books::find_by_id(payload.book_id)
        .filter(BookCol::IsDeleted.eq(false))
        .one(&state.orm)
        .await?;
    if book.is_none() {
        return Err(AppError::NotFound);
    }

    let cart = get_or_create_cart(&state.orm, user.user_id).await?;

    // Adding the same book twice appends a second line rather than merging
    // quantities; that matches the observed upstream behavior.
    CartItemActive {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart.id),
        book_id: Set(payload.book_id),
        quantity: Set(payload.quantity),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "book_id": payload.book_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let dto = cart_snapshot(&state.orm, cart).await?;
    Ok(ApiResponse::success("Added to cart", dto, Some(Meta::empty())))
}

pub async fn update_quantity(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartDto>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let (item, cart) = find_owned_item(state, user, cart_item_id).await?;

    let mut model: CartItemActive = item.into();
    model.quantity = Set(payload.quantity);
    model.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "cart_item_id": cart_item_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let dto = cart_snapshot(&state.orm, cart).await?;
    Ok(ApiResponse::success("Updated", dto, Some(Meta::empty())))
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
) -> AppResult<()> {
    let (item, _cart) = find_owned_item(state, user, cart_item_id).await?;
    item.delete(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "cart_item_id": cart_item_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(())
}

/// Resolve a cart line and verify it belongs to the caller's cart. Lines in
/// other users' carts are indistinguishable from absent ones.
async fn find_owned_item(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
) -> AppResult<(crate::entity::cart_items::Model, shopping_carts::Model)> {
    let found = CartItems::find_by_id(cart_item_id)
        .find_also_related(ShoppingCarts)
        .one(&state.orm)
        .await?;
    match found {
        Some((item, Some(cart))) if cart.user_id == user.user_id => Ok((item, cart)),
        _ => Err(AppError::NotFound),
    }
}

async fn cart_snapshot<C: ConnectionTrait>(
    conn: &C,
    cart: shopping_carts::Model,
) -> AppResult<CartDto> {
    let lines = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .find_also_related(Books)
        .all(conn)
        .await?;

    let mut items = Vec::with_capacity(lines.len());
    for (item, book) in lines {
        let book = book.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("cart line {} references a missing book", item.id))
        })?;
        items.push(CartItemDto {
            id: item.id,
            book_id: book.id,
            title: book.title,
            price: book.price,
            quantity: item.quantity,
        });
    }

    Ok(CartDto {
        id: cart.id,
        user_id: cart.user_id,
        items,
    })
}
