use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::user::{User, UserId};
use crate::payments::mobile::normalize_phone;

/// Resolves the recipient of a peer transfer from what the sender typed: an email address or a phone number.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    async fn resolve(&self, identifier: &str) -> Result<Option<User>>;
}

#[derive(Default, Clone)]
pub struct InMemoryUserDirectory {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) -> Result<()> {
        let mut guard = self.inner.write().await;

        guard.insert(user)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn resolve(&self, identifier: &str) -> Result<Option<User>> {
        let guard = self.inner.read().await;

        Ok(guard.resolve(identifier))
    }
}

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    by_email: HashMap<String, UserId>,
    by_phone: HashMap<String, UserId>,
}

impl Inner {
    fn insert(&mut self, user: User) -> Result<()> {
        if self.users.contains_key(&user.id) {
            bail!("Failed to insert user {}. The user already exists", user.id);
        }

        let email = user.email.as_deref().map(normalize_email);
        let phone = match user.phone.as_deref() {
            Some(raw) => match normalize_phone(raw) {
                Some(phone) => Some(phone),
                None => bail!("Failed to insert user {}. {raw} is not a mobile number", user.id),
            },
            None => None,
        };

        if let Some(email) = &email
            && self.by_email.contains_key(email)
        {
            bail!("Failed to insert user {}. Email {email} is taken", user.id);
        }
        if let Some(phone) = &phone
            && self.by_phone.contains_key(phone)
        {
            bail!("Failed to insert user {}. Phone {phone} is taken", user.id);
        }

        if let Some(email) = email {
            self.by_email.insert(email, user.id.clone());
        }
        if let Some(phone) = phone {
            self.by_phone.insert(phone, user.id.clone());
        }
        self.users.insert(user.id.clone(), user);

        Ok(())
    }

    fn resolve(&self, identifier: &str) -> Option<User> {
        let id = if identifier.contains('@') {
            self.by_email.get(&normalize_email(identifier))
        } else {
            normalize_phone(identifier).and_then(|phone| self.by_phone.get(&phone))
        }?;

        self.users.get(id).cloned()
    }
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use claims::{assert_err, assert_none, assert_ok, assert_some};

    use super::*;

    #[tokio::test]
    async fn resolves_by_email_ignoring_case() {
        let directory = InMemoryUserDirectory::new();
        assert_ok!(
            directory
                .insert(User::new(UserId::new("u1")).with_email("Abebe@Example.com"))
                .await
        );

        let user = assert_ok!(directory.resolve(" abebe@example.COM ").await);
        let user = assert_some!(user);

        assert_eq!(user.id, UserId::new("u1"));
    }

    #[tokio::test]
    async fn resolves_by_phone_in_any_national_format() {
        let directory = InMemoryUserDirectory::new();
        assert_ok!(
            directory
                .insert(User::new(UserId::new("u1")).with_phone("0911223344"))
                .await
        );

        for typed in ["+251911223344", "251911223344", "0911223344", "911223344"] {
            let user = assert_ok!(directory.resolve(typed).await);
            assert_some!(user, "Expected {typed} to resolve");
        }
    }

    #[tokio::test]
    async fn unknown_identifier_resolves_to_none() {
        let directory = InMemoryUserDirectory::new();

        assert_none!(assert_ok!(directory.resolve("nobody@example.com").await));
        assert_none!(assert_ok!(directory.resolve("0911000000").await));
    }

    #[tokio::test]
    async fn cant_register_the_same_email_twice() {
        let directory = InMemoryUserDirectory::new();
        assert_ok!(
            directory
                .insert(User::new(UserId::new("u1")).with_email("a@example.com"))
                .await
        );

        let res = directory
            .insert(User::new(UserId::new("u2")).with_email("A@example.com"))
            .await;

        assert_err!(res);
    }

    #[tokio::test]
    async fn cant_register_a_phone_that_is_no_mobile_number() {
        let directory = InMemoryUserDirectory::new();

        let res = directory
            .insert(User::new(UserId::new("u1")).with_phone("0115 51 00 00"))
            .await;

        assert_err!(res);
        assert_none!(assert_ok!(directory.resolve("0115510000").await));
    }
}
