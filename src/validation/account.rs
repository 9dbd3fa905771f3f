use serde::Deserialize;
use validator::Validate;

use super::{parse_choice, shape};
use crate::domain::aggregates::user::normalize_email;
use crate::domain::aggregates::{Role, User};
use crate::error::{Error, Result};
use crate::store::Store;

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

impl RegisterRequest {
    /// Returns the normalized email once it is known to be free.
    pub async fn validate(&self, store: &dyn Store) -> Result<String> {
        let mut errors = shape(self);
        let email = normalize_email(&self.email);
        if !errors.has("email") && store.find_user_by_email(&email).await?.is_some() {
            errors.add("email", "The email has already been taken.");
        }
        errors.into_result()?;
        Ok(email)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Admin edit of another account.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UserUpdateRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

impl UserUpdateRequest {
    /// Applies the change to `user`. The acting admin cannot demote or
    /// deactivate themselves, so at least one active admin always remains.
    pub fn validate(&self, user: &mut User, actor: &User) -> Result<()> {
        let mut errors = shape(self);
        let role: Option<Role> = match &self.role {
            Some(role) => parse_choice(&mut errors, "role", role),
            None => None,
        };
        if user.id == actor.id {
            if role.is_some_and(|r| r != Role::Admin) {
                errors.add("role", "You cannot change your own role.");
            }
            if self.is_active == Some(false) {
                errors.add("is_active", "You cannot deactivate your own account.");
            }
        }
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        if let Some(name) = &self.name {
            user.name = name.trim().to_string();
        }
        if let Some(role) = role {
            user.role = role;
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        user.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldErrors;
    use crate::store::MemoryStore;

    fn errors_of<T: std::fmt::Debug>(result: Result<T>) -> FieldErrors {
        match result {
            Err(Error::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_rules() {
        let store = MemoryStore::new();
        let request = RegisterRequest {
            name: "Ada".into(),
            email: "not-an-email".into(),
            password: "short".into(),
        };
        let errors = errors_of(request.validate(&store).await);
        assert_eq!(errors.get("email").unwrap(), ["The email must be a valid email address."]);
        assert_eq!(errors.get("password").unwrap(), ["The password must be between 8 and 128 characters."]);

        store
            .create_user(&User::new("Ada", "ada@example.com", String::new(), Role::Customer))
            .await
            .unwrap();
        let taken = RegisterRequest {
            name: "Ada".into(),
            email: " ADA@example.com ".into(),
            password: "long enough".into(),
        };
        let errors = errors_of(taken.validate(&store).await);
        assert_eq!(errors.get("email").unwrap(), ["The email has already been taken."]);
    }

    #[test]
    fn admin_cannot_demote_self() {
        let mut admin = User::new("Root", "root@example.com", String::new(), Role::Admin);
        let actor = admin.clone();
        let request = UserUpdateRequest {
            role: Some("staff".into()),
            is_active: Some(false),
            ..Default::default()
        };
        let errors = errors_of(request.validate(&mut admin, &actor));
        assert!(errors.has("role"));
        assert!(errors.has("is_active"));
        assert_eq!(admin.role, Role::Admin);
    }

    #[test]
    fn admin_updates_other_user() {
        let actor = User::new("Root", "root@example.com", String::new(), Role::Admin);
        let mut user = User::new("Sam", "sam@example.com", String::new(), Role::Customer);
        UserUpdateRequest {
            role: Some("staff".into()),
            is_active: Some(false),
            name: Some(" Sam Lee ".into()),
        }
        .validate(&mut user, &actor)
        .unwrap();
        assert_eq!(user.role, Role::Staff);
        assert!(!user.is_active);
        assert_eq!(user.name, "Sam Lee");

        let errors = errors_of(
            UserUpdateRequest {
                role: Some("owner".into()),
                ..Default::default()
            }
            .validate(&mut user, &actor),
        );
        assert_eq!(errors.get("role").unwrap(), ["The selected role is invalid."]);
    }
}
