use axum_bookstore_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        cart::AddCartItemRequest,
        orders::{CreateOrderRequest, UpdateOrderStatusRequest},
    },
    entity::{books::ActiveModel as BookActive, users::ActiveModel as UserActive},
    error::AppError,
    middleware::auth::AuthUser,
    routes::params::{OrderListQuery, Pagination},
    services::{cart_service, order_service},
    state::AppState,
};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

// Integration flow: user fills a cart -> checkout snapshots prices and
// empties the cart -> admin moves the order through its lifecycle.
#[tokio::test]
async fn checkout_totals_snapshot_and_cart_clearing() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    // Unique rows per run so the flow tests can share a database.
    let user_id = create_user(&state, "user", &unique_email("checkout-user")).await?;
    let admin_id = create_user(&state, "admin", &unique_email("checkout-admin")).await?;

    // Book A at 100.00, book B at 50.00.
    let book_a = create_book(&state, "Book A", Decimal::new(10000, 2)).await?;
    let book_b = create_book(&state, "Book B", Decimal::new(5000, 2)).await?;

    let auth_user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };

    cart_service::add_item(
        &state,
        &auth_user,
        AddCartItemRequest {
            book_id: book_a,
            quantity: 2,
        },
    )
    .await?;
    cart_service::add_item(
        &state,
        &auth_user,
        AddCartItemRequest {
            book_id: book_b,
            quantity: 1,
        },
    )
    .await?;

    // Adding the same book again appends a second line rather than merging.
    let cart = cart_service::add_item(
        &state,
        &auth_user,
        AddCartItemRequest {
            book_id: book_b,
            quantity: 1,
        },
    )
    .await?;
    let cart = cart.data.expect("cart data");
    assert_eq!(cart.items.len(), 3);
    let extra_line = cart
        .items
        .iter()
        .rev()
        .find(|line| line.book_id == book_b)
        .expect("duplicate line");
    cart_service::remove_item(&state, &auth_user, extra_line.id).await?;

    let checkout = order_service::create_order(
        &state,
        &auth_user,
        CreateOrderRequest {
            shipping_address: "1 Example Street".into(),
        },
    )
    .await?;
    let data = checkout.data.expect("checkout data");
    assert_eq!(data.order.status, "PENDING");
    assert_eq!(data.order.total, Decimal::new(25000, 2));
    assert_eq!(data.items.len(), 2);

    let mut prices: Vec<Decimal> = data.items.iter().map(|i| i.price).collect();
    prices.sort();
    assert_eq!(prices, vec![Decimal::new(5000, 2), Decimal::new(10000, 2)]);

    // The cart is empty after checkout, and an emptied cart cannot be
    // checked out again.
    let cart = cart_service::get_cart(&state, &auth_user).await?;
    assert!(cart.data.expect("cart data").items.is_empty());

    let empty_again = order_service::create_order(
        &state,
        &auth_user,
        CreateOrderRequest {
            shipping_address: "1 Example Street".into(),
        },
    )
    .await;
    assert!(matches!(empty_again, Err(AppError::BadRequest(_))));

    // The order shows up in the user's list with items eagerly loaded.
    let orders = order_service::list_orders(
        &state,
        &auth_user,
        OrderListQuery {
            pagination: Pagination {
                page: Some(1),
                per_page: Some(20),
            },
            status: None,
            sort_order: None,
        },
    )
    .await?;
    let orders = orders.data.expect("order list").items;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].items.len(), 2);

    // Item lookup within the order.
    let item_id = data.items[0].id;
    let item = order_service::get_order_item(&state, &auth_user, data.order.id, item_id).await?;
    assert_eq!(item.data.expect("order item").id, item_id);

    let missing =
        order_service::get_order_item(&state, &auth_user, data.order.id, Uuid::new_v4()).await;
    assert!(matches!(missing, Err(AppError::NotFound)));

    // Status updates are admin-only and reject unknown values.
    let forbidden = order_service::update_order_status(
        &state,
        &auth_user,
        data.order.id,
        UpdateOrderStatusRequest {
            status: "SHIPPED".into(),
        },
    )
    .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden)));

    let bad = order_service::update_order_status(
        &state,
        &auth_admin,
        data.order.id,
        UpdateOrderStatusRequest {
            status: "REFUNDED".into(),
        },
    )
    .await;
    assert!(matches!(bad, Err(AppError::BadRequest(_))));

    let updated = order_service::update_order_status(
        &state,
        &auth_admin,
        data.order.id,
        UpdateOrderStatusRequest {
            status: "SHIPPED".into(),
        },
    )
    .await?;
    assert_eq!(updated.data.expect("order").status, "SHIPPED");

    // A user who never touched their cart has none to check out.
    let fresh_id = create_user(&state, "user", &unique_email("no-cart")).await?;
    let fresh = AuthUser {
        user_id: fresh_id,
        role: "user".into(),
    };
    let no_cart = order_service::create_order(
        &state,
        &fresh,
        CreateOrderRequest {
            shipping_address: "2 Example Street".into(),
        },
    )
    .await;
    assert!(matches!(no_cart, Err(AppError::NotFound)));

    Ok(())
}

// Two checkouts racing for the same cart: the row locks serialize them, so
// the cart is billed exactly once and the loser sees an already-empty cart.
#[tokio::test]
async fn concurrent_checkouts_bill_the_cart_once() -> anyhow::Result<()> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let user_id = create_user(&state, "user", &unique_email("race-user")).await?;
    let auth_user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let book = create_book(&state, "Race Book", Decimal::new(7500, 2)).await?;
    cart_service::add_item(
        &state,
        &auth_user,
        AddCartItemRequest {
            book_id: book,
            quantity: 2,
        },
    )
    .await?;

    let payload = || CreateOrderRequest {
        shipping_address: "3 Example Street".into(),
    };
    let (first, second) = tokio::join!(
        order_service::create_order(&state, &auth_user, payload()),
        order_service::create_order(&state, &auth_user, payload()),
    );

    // Exactly one checkout wins and carries the whole cart.
    let (won, lost) = match (first, second) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        (Ok(_), Ok(_)) => panic!("both checkouts succeeded"),
        (Err(first), Err(_)) => return Err(first.into()),
    };
    assert!(matches!(lost, AppError::BadRequest(_)));
    let won = won.data.expect("checkout data");
    assert_eq!(won.order.total, Decimal::new(15000, 2));
    assert_eq!(won.items.len(), 1);

    let cart = cart_service::get_cart(&state, &auth_user).await?;
    assert!(cart.data.expect("cart data").items.is_empty());

    let orders = order_service::list_orders(
        &state,
        &auth_user,
        OrderListQuery {
            pagination: Pagination {
                page: None,
                per_page: None,
            },
            status: None,
            sort_order: None,
        },
    )
    .await?;
    assert_eq!(orders.data.expect("order list").items.len(), 1);

    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;
    Ok(AppState { pool, orm })
}

fn unique_email(prefix: &str) -> String {
    format!("{prefix}-{}@example.com", Uuid::new_v4())
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

async fn create_book(state: &AppState, title: &str, price: Decimal) -> anyhow::Result<Uuid> {
    let book = BookActive {
        id: Set(Uuid::new_v4()),
        title: Set(title.to_string()),
        author: Set("Test Author".into()),
        isbn: Set(format!("isbn-{}", Uuid::new_v4())),
        price: Set(price),
        description: Set(None),
        cover_image: Set(None),
        is_deleted: Set(false),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(book.id)
}
