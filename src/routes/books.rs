use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::books::{BookList, CreateBookRequest, UpdateBookRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Book,
    response::ApiResponse,
    routes::params::BookQuery,
    services::book_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route(
            "/{id}",
            get(get_book).put(update_book).delete(delete_book),
        )
}

#[utoipa::path(
    get,
    path = "/api/books",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("q" = Option<String>, Query, description = "Search in title and author"),
        ("sort_by" = Option<String>, Query, description = "Sort column: created_at, price, title"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "List books", body = ApiResponse<BookList>)
    ),
    tag = "Books"
)]
pub async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<BookQuery>,
) -> AppResult<Json<ApiResponse<BookList>>> {
    let resp = book_service::list_books(&state, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/books/{id}",
    params(
        ("id" = Uuid, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Get book", body = ApiResponse<Book>),
        (status = 404, description = "Book not found"),
    ),
    tag = "Books"
)]
pub async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Book>>> {
    let resp = book_service::get_book(&state, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/books",
    request_body = CreateBookRequest,
    responses(
        (status = 201, description = "Create book", body = ApiResponse<Book>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Unknown category id"),
    ),
    security(("bearer_auth" = [])),
    tag = "Books"
)]
pub async fn create_book(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateBookRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Book>>)> {
    let resp = book_service::create_book(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    put,
    path = "/api/books/{id}",
    params(
        ("id" = Uuid, Path, description = "Book ID")
    ),
    request_body = UpdateBookRequest,
    responses(
        (status = 200, description = "Updated book", body = ApiResponse<Book>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Books"
)]
pub async fn update_book(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateBookRequest>,
) -> AppResult<Json<ApiResponse<Book>>> {
    let resp = book_service::update_book(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/books/{id}",
    params(
        ("id" = Uuid, Path, description = "Book ID")
    ),
    responses(
        (status = 204, description = "Deleted book"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Books"
)]
pub async fn delete_book(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    book_service::delete_book(&state, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
