use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, JoinType,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::books::{BookList, CreateBookRequest, UpdateBookRequest},
    entity::{
        book_categories::{
            ActiveModel as BookCategoryActive, Column as BookCatCol, Entity as BookCategories,
        },
        books::{
            self, ActiveModel as BookActive, Column as BookCol, Entity as Books,
            Model as BookModel,
        },
        categories::{Column as CatCol, Entity as Categories},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Book,
    response::{ApiResponse, Meta},
    routes::params::{BookQuery, BookSortBy, SortOrder},
    state::AppState,
};

/// Soft-deleted books are invisible to every read path.
fn active() -> Condition {
    Condition::all().add(BookCol::IsDeleted.eq(false))
}

pub async fn list_books(state: &AppState, query: BookQuery) -> AppResult<ApiResponse<BookList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = active();

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(BookCol::Title).ilike(pattern.clone()))
                .add(Expr::col(BookCol::Author).ilike(pattern)),
        );
    }

    let sort_by = query.sort_by.unwrap_or(BookSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        BookSortBy::CreatedAt => BookCol::CreatedAt,
        BookSortBy::Price => BookCol::Price,
        BookSortBy::Title => BookCol::Title,
    };

    let mut finder = Books::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let ids: Vec<Uuid> = models.iter().map(|b| b.id).collect();
    let mut categories = category_ids_for(&state.orm, &ids).await?;
    let items = models
        .into_iter()
        .map(|model| {
            let category_ids = categories.remove(&model.id).unwrap_or_default();
            book_from_entity(model, category_ids)
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Books", BookList { items }, Some(meta)))
}

pub async fn get_book(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Book>> {
    let model = Books::find_by_id(id)
        .filter(active())
        .one(&state.orm)
        .await?;
    let model = match model {
        Some(b) => b,
        None => return Err(AppError::NotFound),
    };

    let mut categories = category_ids_for(&state.orm, &[model.id]).await?;
    let category_ids = categories.remove(&model.id).unwrap_or_default();
    Ok(ApiResponse::success(
        "Book",
        book_from_entity(model, category_ids),
        None,
    ))
}

pub async fn create_book(
    state: &AppState,
    user: &AuthUser,
    payload: CreateBookRequest,
) -> AppResult<ApiResponse<Book>> {
    ensure_admin(user)?;
    validate_book(&payload)?;

    // Book row and join rows land atomically; an unresolvable category id
    // leaves nothing behind.
    let txn = state.orm.begin().await?;

    resolve_categories(&txn, &payload.category_ids).await?;

    let book = BookActive {
        id: Set(Uuid::new_v4()),
        title: Set(payload.title),
        author: Set(payload.author),
        isbn: Set(payload.isbn),
        price: Set(payload.price),
        description: Set(payload.description),
        cover_image: Set(payload.cover_image),
        is_deleted: Set(false),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    link_categories(&txn, book.id, &payload.category_ids).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "book_create",
        Some("books"),
        Some(serde_json::json!({ "book_id": book.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Book created",
        book_from_entity(book, payload.category_ids),
        Some(Meta::empty()),
    ))
}

pub async fn update_book(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateBookRequest,
) -> AppResult<ApiResponse<Book>> {
    ensure_admin(user)?;
    validate_book(&payload)?;

    let txn = state.orm.begin().await?;

    let existing = Books::find_by_id(id).filter(active()).one(&txn).await?;
    let existing = match existing {
        Some(b) => b,
        None => return Err(AppError::NotFound),
    };

    resolve_categories(&txn, &payload.category_ids).await?;

    let mut model: BookActive = existing.into();
    model.title = Set(payload.title);
    model.author = Set(payload.author);
    model.isbn = Set(payload.isbn);
    model.price = Set(payload.price);
    model.description = Set(payload.description);
    model.cover_image = Set(payload.cover_image);
    let book = model.update(&txn).await?;

    // The category set is replaced wholesale rather than diffed.
    BookCategories::delete_many()
        .filter(BookCatCol::BookId.eq(book.id))
        .exec(&txn)
        .await?;
    link_categories(&txn, book.id, &payload.category_ids).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "book_update",
        Some("books"),
        Some(serde_json::json!({ "book_id": book.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        book_from_entity(book, payload.category_ids),
        Some(Meta::empty()),
    ))
}

/// Soft delete. An id that is absent or already deleted is a no-op.
pub async fn delete_book(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    Books::update_many()
        .col_expr(BookCol::IsDeleted, Expr::value(true))
        .filter(BookCol::Id.eq(id))
        .exec(&state.orm)
        .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "book_delete",
        Some("books"),
        Some(serde_json::json!({ "book_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn list_books_by_category(
    state: &AppState,
    category_id: Uuid,
) -> AppResult<ApiResponse<BookList>> {
    let models = Books::find()
        .filter(active())
        .join(JoinType::InnerJoin, books::Relation::BookCategories.def())
        .filter(BookCatCol::CategoryId.eq(category_id))
        .order_by_asc(BookCol::Title)
        .all(&state.orm)
        .await?;

    let ids: Vec<Uuid> = models.iter().map(|b| b.id).collect();
    let mut categories = category_ids_for(&state.orm, &ids).await?;
    let items = models
        .into_iter()
        .map(|model| {
            let category_ids = categories.remove(&model.id).unwrap_or_default();
            book_from_entity(model, category_ids)
        })
        .collect();

    Ok(ApiResponse::success(
        "Books",
        BookList { items },
        Some(Meta::empty()),
    ))
}

fn validate_book(payload: &CreateBookRequest) -> AppResult<()> {
    if payload.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".into()));
    }
    if payload.author.trim().is_empty() {
        return Err(AppError::BadRequest("author must not be empty".into()));
    }
    if payload.isbn.trim().is_empty() {
        return Err(AppError::BadRequest("isbn must not be empty".into()));
    }
    if payload.price < Decimal::ZERO {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }
    Ok(())
}

/// Every referenced category must exist and be active, otherwise the whole
/// operation fails with NotFound.
async fn resolve_categories<C: ConnectionTrait>(conn: &C, ids: &[Uuid]) -> AppResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let unique: HashSet<Uuid> = ids.iter().copied().collect();
    let found = Categories::find()
        .filter(CatCol::Id.is_in(unique.iter().copied()))
        .filter(CatCol::IsDeleted.eq(false))
        .count(conn)
        .await?;
    if found as usize != unique.len() {
        return Err(AppError::NotFound);
    }
    Ok(())
}

async fn link_categories<C: ConnectionTrait>(
    conn: &C,
    book_id: Uuid,
    category_ids: &[Uuid],
) -> AppResult<()> {
    let unique: HashSet<Uuid> = category_ids.iter().copied().collect();
    for category_id in unique {
        BookCategoryActive {
            book_id: Set(book_id),
            category_id: Set(category_id),
        }
        .insert(conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn category_ids_for<C: ConnectionTrait>(
    conn: &C,
    book_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Vec<Uuid>>> {
    if book_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = BookCategories::find()
        .filter(BookCatCol::BookId.is_in(book_ids.iter().copied()))
        .all(conn)
        .await?;
    let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for row in rows {
        map.entry(row.book_id).or_default().push(row.category_id);
    }
    Ok(map)
}

fn book_from_entity(model: BookModel, category_ids: Vec<Uuid>) -> Book {
    Book {
        id: model.id,
        title: model.title,
        author: model.author,
        isbn: model.isbn,
        price: model.price,
        description: model.description,
        cover_image: model.cover_image,
        category_ids,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
