//! Accounts, bearer tokens and role gates.

use tracing::{info, warn};

use crate::config::Config;
use crate::domain::aggregates::{Role, User};
use crate::error::Result;
use crate::store::Store;

pub mod extract;
pub mod password;
pub mod token;

pub use extract::{AdminUser, CurrentUser, StaffUser};

/// Seeds the configured admin account when no admin exists yet.
pub async fn ensure_admin(store: &dyn Store, config: &Config) -> Result<Option<User>> {
    if store.count_users(Role::Admin).await? > 0 {
        return Ok(None);
    }
    let (Some(email), Some(secret)) = (&config.admin_email, &config.admin_password) else {
        warn!("no admin account exists and ADMIN_EMAIL / ADMIN_PASSWORD are not set");
        return Ok(None);
    };

    let hash = password::hash_password(secret)?;
    let admin = match store.find_user_by_email(email).await? {
        Some(mut existing) => {
            existing.role = Role::Admin;
            existing.is_active = true;
            existing.password_hash = hash;
            existing.touch();
            store.update_user(&existing).await?;
            existing
        }
        None => {
            let admin = User::new("Administrator", email, hash, Role::Admin);
            store.create_user(&admin).await?;
            admin
        }
    };
    info!(email = %admin.email, "seeded admin account");
    Ok(Some(admin))
}
