use axum_bookstore_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        auth::RegisterRequest,
        books::CreateBookRequest,
        categories::CreateCategoryRequest,
    },
    error::AppError,
    middleware::auth::AuthUser,
    routes::params::{BookQuery, Pagination},
    services::{auth_service, book_service, category_service},
    state::AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use axum_bookstore_api::entity::{books, users::ActiveModel as UserActive};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, Set};

// Catalog lifecycle: categories and books with soft deletes, plus the
// registration conflict rule. Uses unique names/ISBNs so it can run
// alongside the other flow tests.
#[tokio::test]
async fn catalog_soft_delete_and_registration_conflict() -> anyhow::Result<()> {
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

    let admin_id = create_user(&state, "admin", &unique_email("catalog-admin")).await?;
    let user_id = create_user(&state, "user", &unique_email("catalog-user")).await?;
    let admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };
    let user = AuthUser {
        user_id,
        role: "user".into(),
    };

    // Non-admins may not touch the catalog.
    let forbidden = category_service::create_category(
        &state,
        &user,
        CreateCategoryRequest {
            name: format!("forbidden-{}", Uuid::new_v4()),
            description: None,
        },
    )
    .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden)));

    let category_name = format!("mystery-{}", Uuid::new_v4());
    let category = category_service::create_category(
        &state,
        &admin,
        CreateCategoryRequest {
            name: category_name.clone(),
            description: Some("whodunits".into()),
        },
    )
    .await?;
    let category = category.data.expect("category");

    // Update round-trips values with an unchanged id.
    let updated = category_service::update_category(
        &state,
        &admin,
        category.id,
        CreateCategoryRequest {
            name: format!("{category_name}-renamed"),
            description: Some("crime fiction".into()),
        },
    )
    .await?;
    let updated = updated.data.expect("category");
    assert_eq!(updated.id, category.id);
    assert_eq!(updated.name, format!("{category_name}-renamed"));
    assert_eq!(updated.description.as_deref(), Some("crime fiction"));

    let fetched = category_service::get_category(&state, category.id).await?;
    assert_eq!(fetched.data.expect("category").id, category.id);

    // Creating a book against an unknown category persists nothing.
    let bad_isbn = format!("isbn-{}", Uuid::new_v4());
    let bad = book_service::create_book(
        &state,
        &admin,
        CreateBookRequest {
            title: "Orphan".into(),
            author: "Nobody".into(),
            isbn: bad_isbn.clone(),
            price: Decimal::new(999, 2),
            description: None,
            cover_image: None,
            category_ids: vec![Uuid::new_v4()],
        },
    )
    .await;
    assert!(matches!(bad, Err(AppError::NotFound)));
    let leftovers = books::Entity::find()
        .filter(books::Column::Isbn.eq(bad_isbn))
        .count(&state.orm)
        .await?;
    assert_eq!(leftovers, 0);

    let isbn = format!("isbn-{}", Uuid::new_v4());
    let title = format!("The Locked Room {}", Uuid::new_v4());
    let book = book_service::create_book(
        &state,
        &admin,
        CreateBookRequest {
            title: title.clone(),
            author: "M. Writer".into(),
            isbn,
            price: Decimal::new(1500, 2),
            description: Some("a mystery".into()),
            cover_image: None,
            category_ids: vec![category.id],
        },
    )
    .await?;
    let book = book.data.expect("book");
    assert_eq!(book.category_ids, vec![category.id]);

    let in_category = book_service::list_books_by_category(&state, category.id).await?;
    let in_category = in_category.data.expect("book list").items;
    assert!(in_category.iter().any(|b| b.id == book.id));

    let listed = book_service::list_books(&state, title_query(&title)).await?;
    assert!(
        listed
            .data
            .expect("book list")
            .items
            .iter()
            .any(|b| b.id == book.id)
    );

    // Soft delete hides the book from every read path, and deleting again
    // stays a no-op.
    book_service::delete_book(&state, &admin, book.id).await?;
    book_service::delete_book(&state, &admin, book.id).await?;
    book_service::delete_book(&state, &admin, Uuid::new_v4()).await?;

    let gone = book_service::get_book(&state, book.id).await;
    assert!(matches!(gone, Err(AppError::NotFound)));

    let listed = book_service::list_books(&state, title_query(&title)).await?;
    assert!(listed.data.expect("book list").items.is_empty());

    let in_category = book_service::list_books_by_category(&state, category.id).await?;
    assert!(
        !in_category
            .data
            .expect("book list")
            .items
            .iter()
            .any(|b| b.id == book.id)
    );

    // Registering twice with one email conflicts and leaves one row.
    let email = format!("dup-{}@example.com", Uuid::new_v4());
    auth_service::register_user(
        &state.pool,
        RegisterRequest {
            email: email.clone(),
            password: "secret123".into(),
        },
    )
    .await?;
    let second = auth_service::register_user(
        &state.pool,
        RegisterRequest {
            email: email.clone(),
            password: "secret123".into(),
        },
    )
    .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    let count: (i64,) = sqlx::query_as("SELECT count(*) FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_one(&state.pool)
        .await?;
    assert_eq!(count.0, 1);

    Ok(())
}

// Two registrations racing for one email: whichever insert loses the race
// hits the unique index and still surfaces as a conflict, not a 500.
#[tokio::test]
async fn concurrent_registration_conflicts() -> anyhow::Result<()> {
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
    let email = unique_email("race-dup");
    let request = || RegisterRequest {
        email: email.clone(),
        password: "secret123".into(),
    };

    let (first, second) = tokio::join!(
        auth_service::register_user(&state.pool, request()),
        auth_service::register_user(&state.pool, request()),
    );
    let lost = match (first, second) {
        (Ok(_), Err(lost)) | (Err(lost), Ok(_)) => lost,
        (Ok(_), Ok(_)) => panic!("both registrations succeeded"),
        (Err(first), Err(_)) => return Err(first.into()),
    };
    assert!(matches!(lost, AppError::Conflict(_)));

    let count: (i64,) = sqlx::query_as("SELECT count(*) FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_one(&state.pool)
        .await?;
    assert_eq!(count.0, 1);

    Ok(())
}

fn title_query(title: &str) -> BookQuery {
    BookQuery {
        pagination: Pagination {
            page: None,
            per_page: None,
        },
        q: Some(title.to_string()),
        sort_by: None,
        sort_order: None,
    }
}

fn unique_email(prefix: &str) -> String {
    format!("{prefix}-{}@example.com", Uuid::new_v4())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;
    Ok(AppState { pool, orm })
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
