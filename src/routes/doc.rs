use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest, UserResponse},
        books::{BookList, CreateBookRequest},
        cart::{AddCartItemRequest, CartDto, CartItemDto, UpdateCartItemRequest},
        categories::{CategoryList, CreateCategoryRequest},
        orders::{
            CreateOrderRequest, OrderItemList, OrderList, OrderWithItems,
            UpdateOrderStatusRequest,
        },
    },
    models::{Book, Category, Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::{auth, books, cart, categories, health, orders, params},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        categories::list_categories,
        categories::get_category,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        categories::list_books_in_category,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_cart_item,
        orders::create_order,
        orders::list_orders,
        orders::update_order_status,
        orders::get_order_items,
        orders::get_order_item,
    ),
    components(
        schemas(
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            UserResponse,
            Book,
            Category,
            Order,
            OrderItem,
            CreateBookRequest,
            BookList,
            CreateCategoryRequest,
            CategoryList,
            AddCartItemRequest,
            UpdateCartItemRequest,
            CartDto,
            CartItemDto,
            CreateOrderRequest,
            UpdateOrderStatusRequest,
            OrderWithItems,
            OrderList,
            OrderItemList,
            params::Pagination,
            params::BookQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Book>,
            ApiResponse<BookList>,
            ApiResponse<CartDto>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Books", description = "Book catalog endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
