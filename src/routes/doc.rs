use utoipa::{OpenApi, openapi::OpenApi as OpenApiSpec};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    clients::{ProductType, UserInfo},
    dto::{
        cart::{AddToCartRequest, CartLine, CartView},
        orders::{CreateOrderItem, CreateOrderRequest, OrderList, UpdateStatusRequest},
    },
    models::{Order, OrderItem, OrderStatus, StockStatus},
    response::{ApiResponse, Meta},
    routes::{cart, health, orders},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        orders::create_order,
        orders::get_order,
        orders::update_order_status,
        orders::list_user_orders,
        cart::add_to_cart,
        cart::remove_from_cart,
        cart::get_cart,
        cart::checkout,
        cart::completed_orders,
    ),
    components(
        schemas(
            Order,
            OrderItem,
            OrderStatus,
            StockStatus,
            ProductType,
            UserInfo,
            CreateOrderItem,
            CreateOrderRequest,
            UpdateStatusRequest,
            OrderList,
            AddToCartRequest,
            CartLine,
            CartView,
            Meta,
            ApiResponse<Order>,
            ApiResponse<OrderItem>,
            ApiResponse<OrderList>,
            ApiResponse<CartView>
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Orders", description = "Order creation and lifecycle"),
        (name = "Cart", description = "Cart endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
