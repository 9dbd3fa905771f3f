//! Aggregates module
pub mod audit;
pub mod brand;
pub mod cart;
pub mod category;
pub mod inventory;
pub mod order;
pub mod payment;
pub mod product;
pub mod promotion;
pub mod user;

pub use audit::AuditEntry;
pub use brand::Brand;
pub use cart::{Cart, CartError, CartItem};
pub use category::{Category, CategoryNode};
pub use inventory::{
    InventoryMovement, InventoryRecord, MovementContext, MovementKind, StockChange, StockError, StockKey,
    StockOperation, DEFAULT_LOCATION,
};
pub use order::{Address, Order, OrderAction, OrderError, OrderItem, OrderStatus, PaymentStatus, StockEffect};
pub use payment::{Payment, PaymentMethod, PaymentState};
pub use product::{Product, ProductError, ProductImage, ProductStatus, ProductVariant, Specification};
pub use promotion::{Coupon, CouponRejection, CouponUsage, Discount, Promotion, PromotionScope};
pub use user::{Role, User};
