use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{
        CreateOrderRequest, OrderItemList, OrderList, OrderWithItems, UpdateOrderStatusRequest,
    },
    entity::{
        books::{self, Column as BookCol, Entity as Books},
        cart_items::{Column as CartItemCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders,
            Model as OrderModel,
        },
        shopping_carts::{Column as CartCol, Entity as ShoppingCarts},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderItem, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

/// Checkout: convert the caller's cart into an order.
///
/// The whole sequence runs in one transaction with the cart lines locked,
/// so a concurrent checkout by the same user cannot spend the same cart
/// twice. Each line is snapshotted into an order item priced at the book's
/// current price; the snapshot, not the live book row, is what the order
/// bills.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let address = payload.shipping_address.trim();
    if address.is_empty() {
        return Err(AppError::BadRequest(
            "shipping_address must not be empty".to_string(),
        ));
    }

    let txn = state.orm.begin().await?;

    let cart = ShoppingCarts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?;
    let cart = match cart {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let lines = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .lock(LockType::Update)
        .all(&txn)
        .await?;

    // A cart already emptied (including by a checkout that won the lock
    // race) has nothing to bill.
    if lines.is_empty() {
        return Err(AppError::BadRequest("cart is empty".to_string()));
    }

    let book_ids: Vec<Uuid> = lines.iter().map(|line| line.book_id).collect();
    let book_by_id: HashMap<Uuid, books::Model> = Books::find()
        .filter(BookCol::Id.is_in(book_ids))
        .all(&txn)
        .await?
        .into_iter()
        .map(|b| (b.id, b))
        .collect();

    let mut total = Decimal::ZERO;
    let mut snapshots: Vec<(Uuid, i32, Decimal)> = Vec::with_capacity(lines.len());
    for line in &lines {
        let book = book_by_id.get(&line.book_id).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "cart line {} references a missing book",
                line.id
            ))
        })?;
        total += book.price * Decimal::from(line.quantity);
        snapshots.push((line.book_id, line.quantity, book.price));
    }

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::Pending.as_str().to_string()),
        shipping_address: Set(address.to_string()),
        total: Set(total),
        order_date: Set(Utc::now().into()),
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::with_capacity(snapshots.len());
    for (book_id, quantity, price) in snapshots {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            book_id: Set(book_id),
            quantity: Set(quantity),
            price: Set(price),
        }
        .insert(&txn)
        .await?;
        items.push(order_item_from_entity(item));
    }

    // Empty the cart; the order items now carry the authoritative state.
    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_create",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::OrderDate),
        SortOrder::Desc => finder.order_by_desc(OrderCol::OrderDate),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    // Eager-load the items for the page in one query.
    let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let mut items_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    if !order_ids.is_empty() {
        let rows = OrderItems::find()
            .filter(OrderItemCol::OrderId.is_in(order_ids))
            .all(&state.orm)
            .await?;
        for row in rows {
            items_by_order
                .entry(row.order_id)
                .or_default()
                .push(order_item_from_entity(row));
        }
    }

    let items = orders
        .into_iter()
        .map(|order| {
            let order_items = items_by_order.remove(&order.id).unwrap_or_default();
            OrderWithItems {
                order: order_from_entity(order),
                items: order_items,
            }
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Ok", OrderList { items }, Some(meta)))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let status = OrderStatus::parse(&payload.status).ok_or_else(|| {
        AppError::BadRequest(format!("unknown order status: {}", payload.status))
    })?;

    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let mut model: OrderActive = order.into();
    model.status = Set(status.as_str().to_string());
    let order = model.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": status.as_str() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Status updated",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

pub async fn get_order_items(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<OrderItemList>> {
    let order = owned_order(state, user, order_id).await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderItemList { items },
        Some(Meta::empty()),
    ))
}

pub async fn get_order_item(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    item_id: Uuid,
) -> AppResult<ApiResponse<OrderItem>> {
    let order = owned_order(state, user, order_id).await?;

    let item = OrderItems::find_by_id(item_id)
        .filter(OrderItemCol::OrderId.eq(order.id))
        .one(&state.orm)
        .await?;
    let item = match item {
        Some(i) => i,
        None => return Err(AppError::NotFound),
    };

    Ok(ApiResponse::success("OK", order_item_from_entity(item), None))
}

/// Admins see every order; everyone else only their own. A foreign order id
/// reads as NotFound rather than Forbidden so ids are not probeable.
async fn owned_order(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<OrderModel> {
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    if order.user_id != user.user_id && user.role != "admin" {
        return Err(AppError::NotFound);
    }
    Ok(order)
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        status: model.status,
        shipping_address: model.shipping_address,
        total: model.total,
        order_date: model.order_date.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        book_id: model.book_id,
        quantity: model.quantity,
        price: model.price,
    }
}
