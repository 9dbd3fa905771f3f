//! HTTP-level tests driving the router over the in-memory store.

use std::str::FromStr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use beauty_commerce::api::{self, AppState};
use beauty_commerce::auth;
use beauty_commerce::publisher::EventPublisher;
use beauty_commerce::store::MemoryStore;
use beauty_commerce::Config;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

const ADMIN_EMAIL: &str = "owner@example.com";
const ADMIN_PASSWORD: &str = "admin-password";

struct TestApp {
    router: Router,
}

impl TestApp {
    async fn new() -> Self {
        let config = Config {
            jwt_secret: "integration-test-secret".into(),
            admin_email: Some(ADMIN_EMAIL.into()),
            admin_password: Some(ADMIN_PASSWORD.into()),
            ..Config::default()
        };
        let store = Arc::new(MemoryStore::new());
        auth::ensure_admin(store.as_ref(), &config).await.unwrap();
        let router = api::router(AppState::new(store, config, EventPublisher::disabled()));
        Self { router }
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "email": email, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn register(&self, name: &str, email: &str) -> (String, String) {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(json!({ "name": name, "email": email, "password": "correct horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    /// Active product with `on_hand` units at the main location.
    async fn stocked_product(&self, admin: &str, sku: &str, price: &str, on_hand: i32) -> String {
        let (status, product) = self
            .send(
                Method::POST,
                "/api/v1/admin/products",
                Some(admin),
                Some(json!({ "sku": sku, "name": format!("Product {sku}"), "price": price, "status": "active" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{product}");
        let id = product["id"].as_str().unwrap().to_string();

        let (status, body) = self
            .send(
                Method::POST,
                "/api/v1/staff/inventory/operations",
                Some(admin),
                Some(json!({ "product_id": id, "operation": "receive", "quantity": on_hand })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        id
    }
}

fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

fn address() -> Value {
    json!({
        "name": "Ada Lovelace",
        "line1": "1 Rose Street",
        "city": "London",
        "postal_code": "N1 9GU",
        "country": "GB"
    })
}

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::new().await;
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn route_groups_are_gated_by_role() {
    let app = TestApp::new().await;
    let (customer, _) = app.register("Casey", "casey@example.com").await;
    let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, _) = app.send(Method::GET, "/api/v1/admin/brands", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.send(Method::GET, "/api/v1/admin/brands", Some(&customer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This action is unauthorized.");

    let (status, _) = app.send(Method::GET, "/api/v1/staff/inventory", Some(&customer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send(Method::GET, "/api/v1/admin/brands", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send(Method::GET, "/api/v1/staff/dashboard", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(Method::GET, "/api/v1/auth/me", Some("not-a-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn staff_role_reaches_staff_routes_only() {
    let app = TestApp::new().await;
    let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (_, staff_id) = app.register("Sam", "sam@example.com").await;

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/v1/admin/users/{staff_id}"),
            Some(&admin),
            Some(json!({ "role": "staff" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let staff = app.login("sam@example.com", "correct horse").await;
    let (status, _) = app.send(Method::GET, "/api/v1/staff/orders", Some(&staff), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send(Method::GET, "/api/v1/admin/dashboard", Some(&staff), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn deactivated_user_loses_access() {
    let app = TestApp::new().await;
    let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (customer, customer_id) = app.register("Dee", "dee@example.com").await;

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/api/v1/admin/users/{customer_id}"),
            Some(&admin),
            Some(json!({ "is_active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(Method::GET, "/api/v1/auth/me", Some(&customer), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "dee@example.com", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["email"][0], "This account has been deactivated.");
}

#[tokio::test]
async fn invalid_product_reports_field_errors() {
    let app = TestApp::new().await;
    let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/admin/products",
            Some(&admin),
            Some(json!({
                "sku": "",
                "name": "Lip Oil",
                "price": "0",
                "status": "archived",
                "images": [{ "url": "not a url" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "The given data was invalid.");
    assert_eq!(body["errors"]["price"][0], "The price must be greater than 0.");
    assert_eq!(body["errors"]["status"][0], "The selected status is invalid.");
    assert!(body["errors"]["sku"].is_array());
    assert!(body["errors"]["images.0.url"].is_array());
}

#[tokio::test]
async fn checkout_reserves_stock_and_empties_cart() {
    let app = TestApp::new().await;
    let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let product_id = app.stocked_product(&admin, "SERUM-1", "20.00", 5).await;
    let (customer, _) = app.register("Ada", "ada@example.com").await;

    let (status, cart) = app.send(Method::POST, "/api/v1/carts", Some(&customer), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let cart_id = cart["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/carts/{cart_id}/items"),
            Some(&customer),
            Some(json!({ "product_id": product_id, "quantity": 6 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["quantity"][0], "Insufficient stock: only 5 available.");

    let (status, cart) = app
        .send(
            Method::POST,
            &format!("/api/v1/carts/{cart_id}/items"),
            Some(&customer),
            Some(json!({ "product_id": product_id, "quantity": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{cart}");
    assert_eq!(money(&cart["pricing"]["subtotal"]), Decimal::new(4000, 2));

    let (status, order) = app
        .send(
            Method::POST,
            "/api/v1/checkout",
            Some(&customer),
            Some(json!({ "cart_id": cart_id, "shipping_address": address() })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "unpaid");
    // 40.00 plus flat shipping below the free-shipping threshold
    assert_eq!(money(&order["total"]), Decimal::new(4500, 2));

    let (_, inventory) = app
        .send(
            Method::GET,
            &format!("/api/v1/staff/inventory?product_id={product_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(inventory["data"][0]["on_hand"], 5);
    assert_eq!(inventory["data"][0]["reserved"], 2);

    let (_, cart) = app.send(Method::GET, &format!("/api/v1/carts/{cart_id}"), Some(&customer), None).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 0);

    let (status, mine) = app.send(Method::GET, "/api/v1/orders", Some(&customer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["total"], 1);
}

#[tokio::test]
async fn payment_confirms_order_and_bad_transition_conflicts() {
    let app = TestApp::new().await;
    let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let product_id = app.stocked_product(&admin, "MASK-9", "60.00", 3).await;
    let (customer, _) = app.register("Bea", "bea@example.com").await;

    let (_, cart) = app.send(Method::POST, "/api/v1/carts", Some(&customer), None).await;
    let cart_id = cart["id"].as_str().unwrap().to_string();
    app.send(
        Method::POST,
        &format!("/api/v1/carts/{cart_id}/items"),
        Some(&customer),
        Some(json!({ "product_id": product_id, "quantity": 1 })),
    )
    .await;
    let (status, order) = app
        .send(
            Method::POST,
            "/api/v1/checkout",
            Some(&customer),
            Some(json!({ "cart_id": cart_id, "shipping_address": address() })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    let order_id = order["id"].as_str().unwrap().to_string();
    // over the free-shipping threshold
    assert_eq!(money(&order["total"]), Decimal::new(6000, 2));

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/staff/orders/{order_id}/payments"),
            Some(&admin),
            Some(json!({ "amount": "70.00", "method": "card" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["amount"].is_array());

    let (status, detail) = app
        .send(
            Method::POST,
            &format!("/api/v1/staff/orders/{order_id}/payments"),
            Some(&admin),
            Some(json!({ "amount": "60.00", "method": "card" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{detail}");
    assert_eq!(detail["payment_status"], "paid");
    assert_eq!(detail["status"], "confirmed");

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/v1/staff/orders/{order_id}/transition"),
            Some(&admin),
            Some(json!({ "action": "ship" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    for action in ["process", "ship"] {
        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/v1/staff/orders/{order_id}/transition"),
                Some(&admin),
                Some(json!({ "action": action })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (_, inventory) = app
        .send(
            Method::GET,
            &format!("/api/v1/staff/inventory?product_id={product_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(inventory["data"][0]["on_hand"], 2);
    assert_eq!(inventory["data"][0]["reserved"], 0);

    let (_, audit) = app
        .send(Method::GET, "/api/v1/admin/audit-logs?entity_type=order", Some(&admin), None)
        .await;
    assert_eq!(audit["total"], 3);
}

#[tokio::test]
async fn coupon_applies_after_promotion() {
    let app = TestApp::new().await;
    let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let product_id = app.stocked_product(&admin, "CREAM-2", "50.00", 10).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/admin/promotions",
            Some(&admin),
            Some(json!({ "name": "Spring", "discount": { "type": "percentage", "value": "10" } })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/admin/coupons",
            Some(&admin),
            Some(json!({
                "code": "glow5",
                "discount": { "type": "fixed_amount", "value": "5" },
                "per_customer_limit": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["code"], "GLOW5");

    let (customer, _) = app.register("Cleo", "cleo@example.com").await;
    let checkout = |cart_id: String| {
        json!({ "cart_id": cart_id, "coupon_code": "GLOW5", "shipping_address": address() })
    };

    let (_, cart) = app.send(Method::POST, "/api/v1/carts", Some(&customer), None).await;
    let cart_id = cart["id"].as_str().unwrap().to_string();
    app.send(
        Method::POST,
        &format!("/api/v1/carts/{cart_id}/items"),
        Some(&customer),
        Some(json!({ "product_id": product_id, "quantity": 2 })),
    )
    .await;
    let (status, order) = app
        .send(Method::POST, "/api/v1/checkout", Some(&customer), Some(checkout(cart_id.clone())))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    // 100.00 - 10% promotion - 5.00 coupon, free shipping
    assert_eq!(money(&order["discount_total"]), Decimal::new(1500, 2));
    assert_eq!(money(&order["total"]), Decimal::new(8500, 2));

    app.send(
        Method::POST,
        &format!("/api/v1/carts/{cart_id}/items"),
        Some(&customer),
        Some(json!({ "product_id": product_id, "quantity": 1 })),
    )
    .await;
    let (status, body) = app
        .send(Method::POST, "/api/v1/checkout", Some(&customer), Some(checkout(cart_id)))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["errors"]["coupon_code"][0],
        "You have already used this coupon the maximum number of times."
    );
}

#[tokio::test]
async fn malformed_bodies_report_field_errors() {
    let app = TestApp::new().await;
    let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let product_id = app.stocked_product(&admin, "TINT-3", "12.00", 1).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/staff/inventory/operations",
            Some(&admin),
            Some(json!({ "product_id": product_id, "operation": "receive", "quantity": "ten" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "The given data was invalid.");
    assert_eq!(body["errors"]["quantity"][0], "The quantity field has an invalid value.");

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/admin/products",
            Some(&admin),
            Some(json!({ "sku": "TINT-4", "name": "Tint" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["price"][0], "The price field is required.");
}

#[tokio::test]
async fn prices_beyond_column_size_are_rejected() {
    let app = TestApp::new().await;
    let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/admin/products",
            Some(&admin),
            Some(json!({
                "sku": "GOLD-1",
                "name": "Gold Leaf Cream",
                "price": "79228162514264337593543950335",
                "status": "active"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["price"][0], "The price may not be greater than 9999999999.99.");
}
