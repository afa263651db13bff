//! Service-level HTTP routes. Authentication routes live in [`crate::auth::routes`].

pub mod health;
